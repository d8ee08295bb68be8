use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use profilepic_types::prelude::*;

pub const DEFAULT_MODEL_PATH: &str = "/app/model/resnet50_profilepic_no_aug.onnx";

/// Profile picture classification service.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Settings {
    /// Model artifact; a sibling `<stem>_weights.bin` is used if the artifact cannot be loaded.
    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Pixel normalisation the model was trained with.
    #[arg(long, env = "MODEL_NORMALIZATION", default_value_t = Normalization::Caffe)]
    pub normalization: Normalization,

    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "BODY_LIMIT_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub body_limit_bytes: usize,
}

impl Settings {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use profilepic::assign::{self, assign_images, load_users, DEFAULT_SEED, MAPPING_FILE};
use profilepic_core::{
    classifier::classify,
    loader::{load_model, ModelState},
    preprocess::{decode_image, Preprocessor},
};
use profilepic_types::prelude::*;
use serde::Serialize;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about = "Profile picture classification tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify a local image with the same pipeline the server uses
    Classify {
        image: PathBuf,
        #[arg(long, env = "MODEL_PATH", default_value = "/app/model/resnet50_profilepic_no_aug.onnx")]
        model_path: PathBuf,
        #[arg(long, env = "MODEL_NORMALIZATION", default_value_t = Normalization::Caffe)]
        normalization: Normalization,
    },
    /// Assign sample profile pictures to users and write a mapping CSV
    AssignImages {
        /// JSON array of `{id, displayName, userPrincipalName?}`
        #[arg(long)]
        users: PathBuf,
        /// Directory containing `fairface`, `avatars` and `animal_faces`
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Overwrite an existing mapping without asking
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Serialize)]
struct Output {
    #[serde(flatten)]
    classification: Classification,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct Fallback {
    error: &'static str,
    classification: Label,
    confidence: f32,
    timestamp: String,
}

fn run_classify(image: PathBuf, model_path: PathBuf, normalization: Normalization) -> anyhow::Result<()> {
    let classifier = match load_model().path(model_path).call() {
        ModelState::Loaded(classifier) => classifier,
        ModelState::Unavailable(reason) => {
            let fallback = Fallback {
                error: "Model not loaded",
                classification: Label::Human,
                confidence: 0.0,
                timestamp: timestamp(),
            };
            println!("{}", serde_json::to_string_pretty(&fallback)?);
            anyhow::bail!(reason);
        }
    };
    let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
    let preprocessor = Preprocessor::builder()
        .size(classifier.input_size())
        .normalization(normalization)
        .build();
    let tensor = preprocessor.tensor(&decode_image(&bytes)?);
    let output = Output {
        classification: classify(classifier.as_ref(), &tensor)?,
        timestamp: timestamp(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_assign(users: PathBuf, source: PathBuf, output: PathBuf, seed: u64, yes: bool) -> anyhow::Result<()> {
    let mapping = output.join(MAPPING_FILE);
    if mapping.exists() && !yes {
        let overwrite = inquire::Confirm::new(&format!("{} exists, overwrite?", mapping.display()))
            .with_default(false)
            .prompt()?;
        if !overwrite {
            tracing::info!("nothing written");
            return Ok(());
        }
    }
    let users = load_users(&users)?;
    tracing::info!(count = users.len(), "loaded users");
    let distribution = assign_images()
        .users(&users)
        .source(&source)
        .output(&output)
        .seed(seed)
        .call()?;
    let total: usize = distribution.values().sum();
    for (category, count) in &distribution {
        let share = *count as f32 / total.max(1) as f32 * 100.0;
        tracing::info!("{category:10}: {count:3} ({share:5.1}%)");
    }
    tracing::info!(
        mapping = %mapping.display(),
        images = %output.join(assign::IMAGES_DIR).display(),
        "done"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()
    {
        eprintln!("Logger already initialized: {err}");
    }

    match Cli::parse().command {
        Command::Classify {
            image,
            model_path,
            normalization,
        } => run_classify(image, model_path, normalization),
        Command::AssignImages {
            users,
            source,
            output,
            seed,
            yes,
        } => run_assign(users, source, output, seed, yes),
    }
}

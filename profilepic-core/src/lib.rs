pub mod classifier;
#[path = "data-url.rs"]
pub mod data_url;
pub mod loader;
pub mod network;
pub mod onnx;
pub mod ops;
pub mod preprocess;
pub mod weights;

/// Reported to clients as the inference framework version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

pub mod camera;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fusion;
pub mod logging;
pub mod monitor;
pub mod onnx;
pub mod pose;
pub mod posture;

pub use error::{Error, Result};
pub use monitor::{Detection, PostureMonitor};
pub use posture::Posture;

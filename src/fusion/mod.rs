pub mod arbiter;
pub mod config;
pub mod warning;

pub use arbiter::{
    AdapterOutcome, CameraAdapter, Decision, DecisionMetadata, DecisionReason, FusedOutcome,
    FusionArbiter, SensorAdapter,
};
pub use config::{
    CameraOnlyPolicy, ConfigSource, FusionConfig, FusionMode, FusionWeights, SharedFusionConfig,
};
pub use warning::{WarningHysteresis, WarningState};

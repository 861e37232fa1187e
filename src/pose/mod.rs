pub mod extractor;
pub mod features;
pub mod keypoint;

pub use extractor::{KeypointExtractor, LetterboxInfo, YoloPoseExtractor};
pub use features::{feature_vector, DerivedFeatures, FEATURE_COUNT};
pub use keypoint::{Keypoint, KeypointIndex, KeypointSet};

pub mod ml_model;
pub mod inference;
pub mod loader;

pub use ml_model::{DigitClassifier, ModelConfig};
pub use inference::{model_to_bytes, InferenceBackend, InferenceEngine};
pub use loader::PackageLoader;

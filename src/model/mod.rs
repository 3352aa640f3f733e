pub mod model_metadata;
pub mod model_storage;
pub mod fetch;
pub mod config;

pub use model_metadata::{ModelMetadata, ARCHITECTURE};
pub use model_storage::{save_model_package, model_package_to_bytes, load_model_package, load_model_package_from_bytes, log_metadata_info, ModelPackage};
pub use fetch::ModelSource;
pub use config::{AppConfig, ModelSettings, CanvasSettings, ControllerSettings, DEFAULT_MODEL_SOURCE};

pub mod topology;
pub mod model_metadata;
#[cfg(feature = "ml")]
pub mod model_storage;
pub mod config;

pub use topology::{ActivationKind, OutputMode, Topology};
pub use model_metadata::{print_metadata_info, ModelMetadata, FORMAT_VERSION};
#[cfg(feature = "ml")]
pub use model_storage::ModelStore;
pub use config::{AppConfig, ModelSettings, PathSettings, TrainingSettings};

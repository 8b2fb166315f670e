pub mod featurizer;
pub mod label;
pub mod builder;

pub use featurizer::{featurize, pixel_feature};
pub use label::encode_label;
pub use builder::{check_dimensions, load_features, DatasetBuilder, FsImageSource, ImageSource};

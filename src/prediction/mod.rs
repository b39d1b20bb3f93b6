//! Expected-points prediction.

pub mod features;
pub mod model;
pub mod service;

pub use features::{FeatureAssembler, Features, FEATURE_COLUMNS};
pub use model::{LinearModel, ModelSet, PointsModel};
pub use service::{ModelInfo, PredictionBreakdown, PredictionService, FALLBACK_VERSION};

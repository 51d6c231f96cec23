//! Static Android package triage: manifest feature extraction, a random
//! forest over static and syscall features, and the artifacts tying the two
//! together.

pub mod apk;
pub mod axml;
pub mod bundle;
pub mod category;
pub mod config;
pub mod dataset;
pub mod error;
pub mod forest;
pub mod inference;
pub mod metrics;
pub mod preprocess;
pub mod train;
pub mod vectorize;
pub mod vocabulary;

pub use apk::{extract_static_features, ApkDescriptor};
pub use bundle::TrainedArtifactBundle;
pub use category::MalwareCategory;
pub use config::{ArtifactPaths, Config, TrainingConfig};
pub use error::{
    AnalysisError, ApkParseError, ArtifactIoError, DatasetError, DimensionError,
    ModelNotTrainedError, TrainingError,
};
pub use inference::{
    analyze_apk, analyze_batch, analyze_batch_with_artifacts, analyze_with_artifacts, try_analyze_apk, AnalysisRecord,
    PredictionResult,
};
pub use train::{train_and_save, train_merged_and_save, TrainingInputs, TrainingReport};
pub use vectorize::{build_feature_vector, reconcile_width, Reconciliation};
pub use vocabulary::FeatureVocabulary;

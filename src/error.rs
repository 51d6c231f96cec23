use std::path::PathBuf;

use thiserror::Error;

/// The APK container or its manifest could not be read.
#[derive(Debug, Error)]
pub enum ApkParseError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a readable zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("AndroidManifest.xml not found in archive")]
    MissingManifest,
    #[error("failed to read manifest entry: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed binary XML at offset {offset}: {reason}")]
    Xml { offset: usize, reason: String },
}

impl ApkParseError {
    pub(crate) fn xml(offset: usize, reason: impl Into<String>) -> Self {
        Self::Xml {
            offset,
            reason: reason.into(),
        }
    }
}

/// A required artifact is absent, so inference cannot run.
#[derive(Debug, Error)]
#[error("model not trained: missing {artifact} ({})", path.display())]
pub struct ModelNotTrainedError {
    pub artifact: &'static str,
    pub path: PathBuf,
}

/// Reading, writing or decoding a persisted artifact failed.
#[derive(Debug, Error)]
pub enum ArtifactIoError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt artifact {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid artifact {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to encode artifact {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A matrix or vector does not have the width a fitted component expects.
#[derive(Debug, Error)]
#[error("{component} expects {expected} features, got {actual}")]
pub struct DimensionError {
    pub component: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Training tables are missing, malformed or empty.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has no `{column}` label column", path.display())]
    MissingLabel { path: PathBuf, column: String },
    #[error("row {row}: label {value:?} is not an integer class")]
    BadLabel { row: usize, value: String },
    #[error("training data is empty: {0}")]
    Empty(&'static str),
    #[error("need at least {needed} samples per class, class {class} has {found}")]
    TooFewSamples {
        class: i64,
        needed: usize,
        found: usize,
    },
}

/// Everything that can stop a single APK from producing a prediction.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    ApkParse(#[from] ApkParseError),
    #[error(transparent)]
    ModelNotTrained(#[from] ModelNotTrainedError),
    #[error(transparent)]
    ArtifactIo(#[from] ArtifactIoError),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
}

/// Failures of an offline training run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    ArtifactIo(#[from] ArtifactIoError),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
}

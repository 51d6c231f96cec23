//! Per-APK analysis: extract, vectorize, reconcile, preprocess, classify.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::apk::extract_static_features;
use crate::bundle::TrainedArtifactBundle;
use crate::category::MalwareCategory;
use crate::config::Config;
use crate::error::{AnalysisError, ApkParseError, DimensionError};
use crate::forest::argmax;
use crate::vectorize::{build_feature_vector, reconcile_width, reconcile_width_strict, Reconciliation};

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub path: PathBuf,
    pub sha256: String,
    pub prediction: MalwareCategory,
    pub predicted_code: i64,
    /// Highest class probability.
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    pub reconciliation: Reconciliation,
}

/// One line of batch output. `result` is `None` when the APK produced no result.
#[derive(Debug, Serialize)]
pub struct AnalysisRecord {
    pub path: PathBuf,
    pub result: Option<PredictionResult>,
    pub error: Option<String>,
}

impl AnalysisRecord {
    fn from_outcome(path: &Path, outcome: Result<PredictionResult, AnalysisError>) -> Self {
        match outcome {
            Ok(result) => Self {
                path: path.to_path_buf(),
                result: Some(result),
                error: None,
            },
            Err(e) => Self::failed(path, &e),
        }
    }

    pub fn failed(path: &Path, error: &AnalysisError) -> Self {
        Self {
            path: path.to_path_buf(),
            result: None,
            error: Some(error.to_string()),
        }
    }
}

fn sha256_file(path: &Path) -> Result<String, ApkParseError> {
    let open_err = |source| ApkParseError::Open {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(open_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(open_err)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Extract, vectorize, reconcile, preprocess and classify one APK. With
/// `strict_width` a width mismatch fails instead of padding/truncating.
pub fn try_analyze_apk(
    path: &Path,
    bundle: &TrainedArtifactBundle,
    strict_width: bool,
) -> Result<PredictionResult, AnalysisError> {
    let attributes = extract_static_features(path)?;
    let vector = build_feature_vector(&bundle.vocabulary, &attributes);
    let target = bundle.expected_width();
    let (vector, reconciliation) = if strict_width {
        reconcile_width_strict(vector, target)?
    } else {
        reconcile_width(vector, target)
    };

    let prepared = bundle.preprocessor().transform(&[vector])?;
    let proba = bundle.model.predict_proba(&prepared[0])?;
    let classes = bundle.model.classes();
    let best = argmax(&proba);
    let predicted_code = *classes.get(best).ok_or(DimensionError {
        component: "classifier classes",
        expected: proba.len(),
        actual: classes.len(),
    })?;
    let prediction = MalwareCategory::from_code(predicted_code);

    let probabilities = classes
        .iter()
        .zip(&proba)
        .map(|(code, p)| (MalwareCategory::from_code(*code).probability_key(), *p))
        .collect();

    log::info!(
        "{} classified as {} ({:.2}%)",
        path.display(),
        prediction,
        proba[best] * 100.0
    );
    Ok(PredictionResult {
        path: path.to_path_buf(),
        sha256: sha256_file(path)?,
        prediction,
        predicted_code,
        confidence: proba[best],
        probabilities,
        reconciliation,
    })
}

/// Never fails: any error is logged with its cause and reported as no result.
pub fn analyze_apk(
    path: &Path,
    bundle: &TrainedArtifactBundle,
    strict_width: bool,
) -> Option<PredictionResult> {
    match try_analyze_apk(path, bundle, strict_width) {
        Ok(result) => Some(result),
        Err(e) => {
            log::error!("No result for {}: {}", path.display(), e);
            None
        }
    }
}

/// Load the configured artifacts and analyze one APK. Missing artifacts are
/// logged as a not-trained error; no model is trained as a fallback.
pub fn analyze_with_artifacts(path: &Path, config: &Config) -> Option<PredictionResult> {
    let bundle = match TrainedArtifactBundle::load(&config.artifacts) {
        Ok(bundle) => bundle,
        Err(e) => {
            log::error!("Cannot analyze {}: {}", path.display(), e);
            return None;
        }
    };
    analyze_apk(path, &bundle, config.strict_width)
}

/// Each file is analyzed independently; a failure never stops the batch.
pub fn analyze_batch<P: AsRef<Path>>(
    paths: &[P],
    bundle: &TrainedArtifactBundle,
    strict_width: bool,
) -> Vec<AnalysisRecord> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let outcome = try_analyze_apk(path, bundle, strict_width);
            if let Err(e) = &outcome {
                log::error!("No result for {}: {}", path.display(), e);
            }
            AnalysisRecord::from_outcome(path, outcome)
        })
        .collect()
}

/// Load the configured artifacts, then analyze every path. If loading fails
/// the cause is logged once and every path gets a record carrying it.
pub fn analyze_batch_with_artifacts<P: AsRef<Path>>(
    paths: &[P],
    config: &Config,
) -> Vec<AnalysisRecord> {
    match TrainedArtifactBundle::load(&config.artifacts) {
        Ok(bundle) => analyze_batch(paths, &bundle, config.strict_width),
        Err(e) => {
            log::error!(
                "Cannot load trained artifacts from {}: {}",
                config.artifacts.dir.display(),
                e
            );
            paths
                .iter()
                .map(|path| AnalysisRecord::failed(path.as_ref(), &e))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn digest_matches_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.apk");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unreadable_file_is_an_open_error() {
        let err = sha256_file(Path::new("/nonexistent/app.apk")).unwrap_err();
        assert!(matches!(err, ApkParseError::Open { .. }));
    }
}

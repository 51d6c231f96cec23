//! The matched set of artifacts produced by one training run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ArtifactPaths;
use crate::error::{AnalysisError, ArtifactIoError, DimensionError, ModelNotTrainedError};
use crate::forest::RandomForest;
use crate::preprocess::{Imputer, Preprocessor, StandardScaler};
use crate::vocabulary::FeatureVocabulary;

/// Classifier, imputer, scaler and vocabulary fit together. Immutable once
/// loaded, so one instance can be shared read-only between analyses.
#[derive(Debug, Clone)]
pub struct TrainedArtifactBundle {
    pub model: RandomForest,
    pub imputer: Imputer,
    pub scaler: StandardScaler,
    pub vocabulary: FeatureVocabulary,
}

impl TrainedArtifactBundle {
    /// Width every preprocessed vector must have.
    pub fn expected_width(&self) -> usize {
        self.imputer.width()
    }

    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor {
            imputer: self.imputer.clone(),
            scaler: self.scaler.clone(),
        }
    }

    /// Load all four artifacts. A missing file is reported as
    /// [`ModelNotTrainedError`]; nothing is ever trained as a fallback.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, AnalysisError> {
        let required = [
            ("classifier", paths.model_path()),
            ("imputer", paths.imputer_path()),
            ("scaler", paths.scaler_path()),
            ("feature vocabulary", paths.vocabulary_path()),
        ];
        for (artifact, path) in &required {
            if !path.is_file() {
                return Err(ModelNotTrainedError {
                    artifact: *artifact,
                    path: path.clone(),
                }
                .into());
            }
        }

        let model: RandomForest = read_json(&paths.model_path())?;
        let imputer: Imputer = read_json(&paths.imputer_path())?;
        let scaler: StandardScaler = read_json(&paths.scaler_path())?;
        let vocabulary = FeatureVocabulary::load(&paths.vocabulary_path())?;

        model.validate().map_err(|reason| ArtifactIoError::Corrupt {
            path: paths.model_path(),
            reason,
        })?;
        if scaler.mean.len() != scaler.scale.len() {
            return Err(ArtifactIoError::Corrupt {
                path: paths.scaler_path(),
                reason: format!(
                    "{} means but {} scales",
                    scaler.mean.len(),
                    scaler.scale.len()
                ),
            }
            .into());
        }

        if scaler.width() != imputer.width() {
            return Err(DimensionError {
                component: "scaler",
                expected: imputer.width(),
                actual: scaler.width(),
            }
            .into());
        }
        if model.n_features() != imputer.width() {
            return Err(DimensionError {
                component: "classifier",
                expected: imputer.width(),
                actual: model.n_features(),
            }
            .into());
        }

        log::info!(
            "Loaded {} trees over {} features ({} vocabulary entries) from {}",
            model.n_trees(),
            imputer.width(),
            vocabulary.len(),
            paths.dir.display()
        );
        Ok(Self {
            model,
            imputer,
            scaler,
            vocabulary,
        })
    }

    pub fn save(&self, paths: &ArtifactPaths) -> Result<(), ArtifactIoError> {
        fs::create_dir_all(&paths.dir).map_err(|source| ArtifactIoError::Io {
            path: paths.dir.clone(),
            source,
        })?;
        write_json(&paths.model_path(), &self.model)?;
        write_json(&paths.imputer_path(), &self.imputer)?;
        write_json(&paths.scaler_path(), &self.scaler)?;
        self.vocabulary.save(&paths.vocabulary_path())?;
        log::info!("Saved model, imputer, scaler and vocabulary to {}", paths.dir.display());
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactIoError> {
    let data = fs::read(path).map_err(|source| ArtifactIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ArtifactIoError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactIoError> {
    let data = serde_json::to_vec(value).map_err(|source| ArtifactIoError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomically(path, &data)
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> Result<(), ArtifactIoError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|source| ArtifactIoError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;
    use tempfile::TempDir;

    fn saved_bundle(dir: &Path) -> ArtifactPaths {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![(i % 2) as f64]).collect();
        let labels: Vec<i64> = (0..12).map(|i| 1 + (i % 2) as i64).collect();
        let params = ForestParams {
            n_estimators: 5,
            ..ForestParams::default()
        };
        let bundle = TrainedArtifactBundle {
            model: RandomForest::fit(&params, &rows, &labels).unwrap(),
            imputer: Imputer::fit(&rows, 0.0).unwrap(),
            scaler: StandardScaler::fit(&rows).unwrap(),
            vocabulary: FeatureVocabulary::from_names(["android.permission.SEND_SMS"]),
        };
        let paths = ArtifactPaths::in_dir(dir);
        bundle.save(&paths).unwrap();
        paths
    }

    #[test]
    fn saved_bundle_loads() {
        let dir = TempDir::new().unwrap();
        let paths = saved_bundle(dir.path());
        let bundle = TrainedArtifactBundle::load(&paths).unwrap();
        assert_eq!(bundle.expected_width(), 1);
        assert_eq!(bundle.model.classes(), &[1, 2]);
    }

    #[test]
    fn undecodable_model_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let paths = saved_bundle(dir.path());
        fs::write(paths.model_path(), b"{not json").unwrap();
        match TrainedArtifactBundle::load(&paths) {
            Err(AnalysisError::ArtifactIo(ArtifactIoError::Decode { path, .. })) => {
                assert_eq!(path, paths.model_path());
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn model_without_classes_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let paths = saved_bundle(dir.path());
        fs::write(
            paths.model_path(),
            br#"{"params":{},"classes":[],"n_features":1,"trees":[]}"#,
        )
        .unwrap();
        match TrainedArtifactBundle::load(&paths) {
            Err(AnalysisError::ArtifactIo(ArtifactIoError::Corrupt { reason, .. })) => {
                assert!(reason.contains("no classes"));
            }
            other => panic!("expected corrupt artifact, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_scaler_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let paths = saved_bundle(dir.path());
        fs::write(paths.scaler_path(), br#"{"mean":[0.5],"scale":[]}"#).unwrap();
        assert!(matches!(
            TrainedArtifactBundle::load(&paths),
            Err(AnalysisError::ArtifactIo(ArtifactIoError::Corrupt { .. }))
        ));
    }
}

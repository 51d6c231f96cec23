use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::forest::ForestParams;

/// Column-name fragments (matched case-insensitively) that mark a static
/// table column as a manifest feature.
pub const DEFAULT_STATIC_PATTERNS: &[&str] = &[
    "permission",
    "api_call",
    "call_",
    "android.intent.action",
    "activity",
    "provider",
    "package",
    "service",
    "receiver",
];

/// Where the four artifacts of a training run live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub model: String,
    pub imputer: String,
    pub scaler: String,
    pub vocabulary: String,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            model: "random_forest_model.json".to_string(),
            imputer: "imputer.json".to_string(),
            scaler: "scaler.json".to_string(),
            vocabulary: "feature_names.txt".to_string(),
        }
    }
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model)
    }

    pub fn imputer_path(&self) -> PathBuf {
        self.dir.join(&self.imputer)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(&self.scaler)
    }

    pub fn vocabulary_path(&self) -> PathBuf {
        self.dir.join(&self.vocabulary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub forest: ForestParams,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub cv_folds: usize,
    pub fill_value: f64,
    pub label_column: String,
    pub static_patterns: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            test_fraction: 0.2,
            split_seed: 42,
            cv_folds: 5,
            fill_value: 0.0,
            label_column: "Class".to_string(),
            static_patterns: DEFAULT_STATIC_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub artifacts: ArtifactPaths,
    pub training: TrainingConfig,
    /// Refuse width mismatches at inference instead of padding/truncating.
    pub strict_width: bool,
}

impl Config {
    /// Load a JSON config; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_slice(&data)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"artifacts": {"dir": "/var/lib/apk-triage"}, "training": {"forest": {"n_estimators": 10}}}"#,
        )
        .unwrap();
        assert_eq!(config.artifacts.dir, PathBuf::from("/var/lib/apk-triage"));
        assert_eq!(config.artifacts.model, "random_forest_model.json");
        assert_eq!(config.training.forest.n_estimators, 10);
        assert_eq!(config.training.forest.max_depth, 15);
        assert_eq!(config.training.label_column, "Class");
        assert!(!config.strict_width);
    }

    #[test]
    fn artifact_paths_join_dir() {
        let paths = ArtifactPaths::in_dir("/models");
        assert_eq!(paths.vocabulary_path(), PathBuf::from("/models/feature_names.txt"));
        assert_eq!(paths.scaler_path(), PathBuf::from("/models/scaler.json"));
    }
}

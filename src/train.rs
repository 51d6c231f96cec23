//! Offline training: merge tables, fit preprocessing and forest, persist.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::bundle::TrainedArtifactBundle;
use crate::config::{Config, TrainingConfig};
use crate::dataset::{merge_sources, vocabulary_from_sources, FeatureSource, MergedDataset};
use crate::error::{DatasetError, TrainingError};
use crate::forest::RandomForest;
use crate::metrics::{accuracy, stratified_folds, stratified_split, ClassificationReport};
use crate::preprocess::Preprocessor;
use crate::vocabulary::FeatureVocabulary;

/// The three source tables, paired by row order.
#[derive(Debug, Clone)]
pub struct TrainingInputs {
    pub static_features: PathBuf,
    pub syscalls: PathBuf,
    pub syscall_binders: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossValidation {
    pub scores: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

impl CrossValidation {
    fn from_scores(scores: Vec<f64>) -> Self {
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        Self { scores, mean, std }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Diagnostics of one training run; reproducible from the same inputs and seeds.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub features: usize,
    pub vocabulary_size: usize,
    pub class_distribution: BTreeMap<i64, usize>,
    pub cross_validation: Option<CrossValidation>,
    pub holdout: ClassificationReport,
    pub feature_importances: Vec<FeatureImportance>,
}

pub struct TrainingOutcome {
    pub bundle: TrainedArtifactBundle,
    pub report: TrainingReport,
}

fn select_rows<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

fn fit_pipeline(
    rows: &[Vec<f64>],
    labels: &[i64],
    config: &TrainingConfig,
) -> Result<(Preprocessor, RandomForest), TrainingError> {
    let preprocessor = Preprocessor::fit(rows, config.fill_value)?;
    let prepared = preprocessor.transform(rows)?;
    let model = RandomForest::fit(&config.forest, &prepared, labels)?;
    Ok((preprocessor, model))
}

fn predict_rows(
    preprocessor: &Preprocessor,
    model: &RandomForest,
    rows: &[Vec<f64>],
) -> Result<Vec<i64>, TrainingError> {
    let prepared = preprocessor.transform(rows)?;
    prepared
        .iter()
        .map(|row| model.predict(row).map_err(TrainingError::from))
        .collect()
}

/// Stratified k-fold accuracy, refitting imputer, scaler and forest per fold.
pub fn cross_validate(
    dataset: &MergedDataset,
    config: &TrainingConfig,
) -> Result<CrossValidation, TrainingError> {
    let mut scores = Vec::with_capacity(config.cv_folds);
    for (fold, (train, test)) in stratified_folds(&dataset.labels, config.cv_folds)
        .into_iter()
        .enumerate()
    {
        if train.is_empty() || test.is_empty() {
            continue;
        }
        let (preprocessor, model) = fit_pipeline(
            &select_rows(&dataset.rows, &train),
            &select_rows(&dataset.labels, &train),
            config,
        )?;
        let predicted = predict_rows(&preprocessor, &model, &select_rows(&dataset.rows, &test))?;
        let score = accuracy(&select_rows(&dataset.labels, &test), &predicted);
        log::debug!("Fold {} accuracy {:.3}", fold + 1, score);
        scores.push(score);
    }
    Ok(CrossValidation::from_scores(scores))
}

/// Split, fit, evaluate. Artifacts are returned, not written.
pub fn train_on_dataset(
    dataset: &MergedDataset,
    vocabulary: FeatureVocabulary,
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    if dataset.rows.is_empty() {
        return Err(DatasetError::Empty("no training rows").into());
    }
    let mut class_distribution = BTreeMap::new();
    for label in &dataset.labels {
        *class_distribution.entry(*label).or_insert(0usize) += 1;
    }
    log::info!(
        "Training on {} samples x {} features, classes {:?}",
        dataset.rows.len(),
        dataset.width(),
        class_distribution
    );

    let (train, test) = stratified_split(&dataset.labels, config.test_fraction, config.split_seed)?;
    let train_labels = select_rows(&dataset.labels, &train);
    let (preprocessor, model) =
        fit_pipeline(&select_rows(&dataset.rows, &train), &train_labels, config)?;

    let test_labels = select_rows(&dataset.labels, &test);
    let predicted = predict_rows(&preprocessor, &model, &select_rows(&dataset.rows, &test))?;
    let holdout = ClassificationReport::new(&test_labels, &predicted);
    log::info!("Held-out accuracy {:.3} on {} samples", holdout.accuracy, test.len());

    let cross_validation = if config.cv_folds >= 2 {
        let cv = cross_validate(dataset, config)?;
        log::info!("Cross-validation accuracy {:.3} (+/- {:.3})", cv.mean, cv.std * 2.0);
        Some(cv)
    } else {
        None
    };

    let mut feature_importances: Vec<FeatureImportance> = dataset
        .column_names
        .iter()
        .zip(model.feature_importances())
        .map(|(feature, importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    feature_importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));

    let report = TrainingReport {
        samples: dataset.rows.len(),
        features: dataset.width(),
        vocabulary_size: vocabulary.len(),
        class_distribution,
        cross_validation,
        holdout,
        feature_importances,
    };
    let bundle = TrainedArtifactBundle {
        model,
        imputer: preprocessor.imputer,
        scaler: preprocessor.scaler,
        vocabulary,
    };
    Ok(TrainingOutcome { bundle, report })
}

/// Load the static, syscall and syscall+binder tables.
pub fn load_sources(
    inputs: &TrainingInputs,
    config: &TrainingConfig,
) -> Result<Vec<FeatureSource>, TrainingError> {
    let label = config.label_column.as_str();
    Ok(vec![
        FeatureSource::load_static(&inputs.static_features, &config.static_patterns, label)?,
        FeatureSource::load_syscalls(&inputs.syscalls, label)?,
        FeatureSource::load_syscall_binders(&inputs.syscall_binders, label)?,
    ])
}

pub fn train_on_sources(
    sources: &[FeatureSource],
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    let dataset = merge_sources(sources)?;
    let vocabulary = vocabulary_from_sources(sources);
    if vocabulary.len() != dataset.width() {
        log::warn!(
            "Vocabulary has {} names but the merged matrix has {} columns; inference will reconcile widths",
            vocabulary.len(),
            dataset.width()
        );
    }
    train_on_dataset(&dataset, vocabulary, config)
}

/// Full run over the three tables; overwrites the configured artifacts.
pub fn train_and_save(inputs: &TrainingInputs, config: &Config) -> Result<TrainingReport, TrainingError> {
    let sources = load_sources(inputs, &config.training)?;
    let outcome = train_on_sources(&sources, &config.training)?;
    outcome.bundle.save(&config.artifacts)?;
    Ok(outcome.report)
}

/// Full run over one pre-merged CSV (every non-label column is a feature).
pub fn train_merged_and_save(path: &std::path::Path, config: &Config) -> Result<TrainingReport, TrainingError> {
    let dataset = MergedDataset::from_csv(path, &config.training.label_column)?;
    let vocabulary = FeatureVocabulary::from_names(&dataset.column_names);
    let outcome = train_on_dataset(&dataset, vocabulary, &config.training)?;
    outcome.bundle.save(&config.artifacts)?;
    Ok(outcome.report)
}

const TOP_IMPORTANCES: usize = 20;

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Samples: {}  Features: {}  Vocabulary: {}",
            self.samples, self.features, self.vocabulary_size
        )?;
        writeln!(f, "\nClass distribution:")?;
        for (label, count) in &self.class_distribution {
            writeln!(f, "{label:>8} {count:>8}")?;
        }
        if let Some(cv) = &self.cross_validation {
            writeln!(
                f,
                "\nCross-validation accuracy: {:.3} (+/- {:.3})",
                cv.mean,
                cv.std * 2.0
            )?;
        }
        writeln!(f, "\nClassification report:\n{}", self.holdout)?;
        writeln!(f, "Confusion matrix:\n{}", self.holdout.confusion)?;
        writeln!(f, "Feature importances (top {TOP_IMPORTANCES}):")?;
        for entry in self.feature_importances.iter().take(TOP_IMPORTANCES) {
            writeln!(f, "{:>10.5}  {}", entry.importance, entry.feature)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            forest: ForestParams {
                n_estimators: 15,
                max_depth: 5,
                ..ForestParams::default()
            },
            cv_folds: 3,
            ..TrainingConfig::default()
        }
    }

    fn toy_dataset() -> MergedDataset {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let label = 1 + (i % 3) as i64;
            let mut row = vec![0.0; 4];
            row[(label - 1) as usize] = 1.0;
            row[3] = (i % 4) as f64;
            rows.push(row);
            labels.push(label);
        }
        MergedDataset {
            column_names: vec!["a".into(), "b".into(), "c".into(), "noise".into()],
            rows,
            labels,
        }
    }

    #[test]
    fn trains_and_reports() {
        let dataset = toy_dataset();
        let vocab = FeatureVocabulary::from_names(&dataset.column_names);
        let outcome = train_on_dataset(&dataset, vocab, &quick_config()).unwrap();

        assert_eq!(outcome.bundle.expected_width(), 4);
        assert_eq!(outcome.bundle.model.classes(), &[1, 2, 3]);
        assert_eq!(outcome.report.holdout.accuracy, 1.0);
        let cv = outcome.report.cross_validation.as_ref().unwrap();
        assert_eq!(cv.scores.len(), 3);
        assert!(cv.mean > 0.9);
        assert_eq!(outcome.report.feature_importances.len(), 4);
        assert_eq!(outcome.report.feature_importances.last().unwrap().feature, "noise");
        assert_eq!(outcome.report.class_distribution[&2], 10);
    }

    #[test]
    fn same_inputs_same_report() {
        let dataset = toy_dataset();
        let config = quick_config();
        let a = train_on_dataset(&dataset, FeatureVocabulary::default(), &config).unwrap();
        let b = train_on_dataset(&dataset, FeatureVocabulary::default(), &config).unwrap();
        assert_eq!(
            serde_json::to_string(&a.report).unwrap(),
            serde_json::to_string(&b.report).unwrap()
        );
    }
}

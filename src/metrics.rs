//! Stratified splitting and classification metrics.

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::category::MalwareCategory;
use crate::error::DatasetError;

fn indices_by_class(labels: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(*label).or_default().push(i);
    }
    by_class
}

/// Shuffled split that keeps each class's share in both partitions. Every
/// class needs at least two samples so both sides get one.
pub fn stratified_split(
    labels: &[i64],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), DatasetError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (class, mut indices) in indices_by_class(labels) {
        if indices.len() < 2 {
            return Err(DatasetError::TooFewSamples {
                class,
                needed: 2,
                found: indices.len(),
            });
        }
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64 * test_fraction).round() as usize)
            .clamp(1, indices.len() - 1);
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// `k` (train, test) index pairs; the j-th sample of each class lands in
/// fold `j % k`, so folds are deterministic and stratified.
pub fn stratified_folds(labels: &[i64], k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let k = k.max(2);
    let mut fold_of = vec![0usize; labels.len()];
    for (class, indices) in indices_by_class(labels) {
        if indices.len() < k {
            log::warn!("Class {class} has only {} samples for {k} folds", indices.len());
        }
        for (j, i) in indices.into_iter().enumerate() {
            fold_of[i] = j % k;
        }
    }
    (0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            (train, test)
        })
        .collect()
}

pub fn accuracy(truth: &[i64], predicted: &[i64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    correct as f64 / truth.len() as f64
}

/// Rows are actual classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<i64>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(truth: &[i64], predicted: &[i64]) -> Self {
        let mut labels: Vec<i64> = truth.iter().chain(predicted).copied().collect();
        labels.sort_unstable();
        labels.dedup();
        let mut counts = vec![vec![0; labels.len()]; labels.len()];
        for (t, p) in truth.iter().zip(predicted) {
            let row = labels.binary_search(t).unwrap_or_default();
            let col = labels.binary_search(p).unwrap_or_default();
            counts[row][col] += 1;
        }
        Self { labels, counts }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for label in &self.labels {
            write!(f, "{label:>8}")?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{label:>8}")?;
            for count in row {
                write!(f, "{count:>8}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: i64,
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class precision/recall/F1 plus accuracy and averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub support: usize,
    pub confusion: ConfusionMatrix,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    pub fn new(truth: &[i64], predicted: &[i64]) -> Self {
        let confusion = ConfusionMatrix::new(truth, predicted);
        let n = confusion.labels.len();
        let classes: Vec<ClassMetrics> = (0..n)
            .map(|i| {
                let tp = confusion.counts[i][i];
                let actual: usize = confusion.counts[i].iter().sum();
                let predicted: usize = confusion.counts.iter().map(|row| row[i]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, actual);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: confusion.labels[i],
                    name: MalwareCategory::from_code(confusion.labels[i]).probability_key(),
                    precision,
                    recall,
                    f1,
                    support: actual,
                }
            })
            .collect();

        let support: usize = classes.iter().map(|c| c.support).sum();
        let mean = |f: fn(&ClassMetrics) -> f64| {
            if classes.is_empty() {
                0.0
            } else {
                classes.iter().map(f).sum::<f64>() / classes.len() as f64
            }
        };
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if support == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / support as f64
            }
        };
        let macro_avg = AveragedMetrics {
            precision: mean(|c| c.precision),
            recall: mean(|c| c.recall),
            f1: mean(|c| c.f1),
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
        };

        Self {
            accuracy: accuracy(truth, predicted),
            classes,
            macro_avg,
            weighted_avg,
            support,
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>14} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support")?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{:>14} {:>10} {:>10} {:>10.2} {:>10}", "accuracy", "", "", self.accuracy, self.support)?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, avg.precision, avg.recall, avg.f1, self.support
            )?;
        }
        Ok(())
    }
}

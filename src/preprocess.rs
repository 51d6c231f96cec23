//! Constant-fill imputer and standard scaler, fit once at training time.

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DimensionError, TrainingError};

fn check_width(component: &'static str, expected: usize, rows: &[Vec<f64>]) -> Result<(), DimensionError> {
    match rows.iter().find(|row| row.len() != expected) {
        Some(row) => Err(DimensionError {
            component,
            expected,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}

fn fitted_width(rows: &[Vec<f64>]) -> Result<usize, DatasetError> {
    let width = rows
        .first()
        .map(Vec::len)
        .ok_or(DatasetError::Empty("cannot fit on zero rows"))?;
    if width == 0 {
        return Err(DatasetError::Empty("cannot fit on zero columns"));
    }
    Ok(width)
}

/// Replaces NaN with a per-column statistic. The fill policy is a constant,
/// so every statistic equals `fill_value`; the vector exists to pin the width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imputer {
    pub fill_value: f64,
    pub statistics: Vec<f64>,
}

impl Imputer {
    pub fn fit(rows: &[Vec<f64>], fill_value: f64) -> Result<Self, DatasetError> {
        let width = fitted_width(rows)?;
        Ok(Self {
            fill_value,
            statistics: vec![fill_value; width],
        })
    }

    /// Number of columns seen at fit time.
    pub fn width(&self) -> usize {
        self.statistics.len()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, DimensionError> {
        check_width("imputer", self.width(), rows)?;
        Ok(rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.statistics)
                    .map(|(value, fill)| if value.is_nan() { *fill } else { *value })
                    .collect()
            })
            .collect())
    }
}

/// Standardizes each column to zero mean and unit (population) variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// NaN cells are ignored when computing the statistics.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, DatasetError> {
        let width = fitted_width(rows)?;
        let mut sum = vec![0.0; width];
        let mut count = vec![0usize; width];
        for row in rows {
            for (col, value) in row.iter().enumerate().take(width) {
                if !value.is_nan() {
                    sum[col] += value;
                    count[col] += 1;
                }
            }
        }
        let mean: Vec<f64> = sum
            .iter()
            .zip(&count)
            .map(|(s, n)| if *n == 0 { 0.0 } else { s / *n as f64 })
            .collect();

        let mut sq = vec![0.0; width];
        for row in rows {
            for (col, value) in row.iter().enumerate().take(width) {
                if !value.is_nan() {
                    sq[col] += (value - mean[col]).powi(2);
                }
            }
        }
        let scale = sq
            .iter()
            .zip(&count)
            .map(|(s, n)| {
                let std = if *n == 0 { 0.0 } else { (s / *n as f64).sqrt() };
                // Constant columns are left unscaled.
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, DimensionError> {
        check_width("scaler", self.width(), rows)?;
        Ok(rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .map(|(value, (mean, scale))| (value - mean) / scale)
                    .collect()
            })
            .collect())
    }
}

/// Imputer followed by scaler, fit on the same matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    pub imputer: Imputer,
    pub scaler: StandardScaler,
}

impl Preprocessor {
    /// Fails with a dimension error when rows differ in width.
    pub fn fit(rows: &[Vec<f64>], fill_value: f64) -> Result<Self, TrainingError> {
        let imputer = Imputer::fit(rows, fill_value)?;
        let filled = imputer.transform(rows)?;
        let scaler = StandardScaler::fit(&filled)?;
        Ok(Self { imputer, scaler })
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, DimensionError> {
        let filled = self.imputer.transform(rows)?;
        self.scaler.transform(&filled)
    }
}

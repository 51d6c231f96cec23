//! Training tables: the static manifest table and the two syscall-frequency
//! tables, merged column-wise by row order.

use std::collections::HashSet;
use std::path::Path;

use crate::error::DatasetError;
use crate::vocabulary::FeatureVocabulary;

/// A numeric table with named columns and optional integer labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Option<Vec<i64>>,
}

/// The three kinds of training table. Each exposes the same
/// `(names, rows)` view so merging never looks inside.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureSource {
    Static(FeatureTable),
    SyscallFrequency(FeatureTable),
    SyscallBinderFrequency(FeatureTable),
}

impl FeatureSource {
    /// Static table restricted to columns matching `patterns`.
    pub fn load_static(
        path: &Path,
        patterns: &[String],
        label_column: &str,
    ) -> Result<Self, DatasetError> {
        let table = read_table(path, label_column, |headers| {
            select_static_columns(headers, patterns, label_column)
        })?;
        log::info!("Selected {} static columns from {}", table.names.len(), path.display());
        Ok(Self::Static(table))
    }

    pub fn load_syscalls(path: &Path, label_column: &str) -> Result<Self, DatasetError> {
        let table = read_table(path, label_column, |headers| {
            feature_columns(headers, label_column)
        })?;
        Ok(Self::SyscallFrequency(table))
    }

    pub fn load_syscall_binders(path: &Path, label_column: &str) -> Result<Self, DatasetError> {
        let table = read_table(path, label_column, |headers| {
            feature_columns(headers, label_column)
        })?;
        if table.labels.is_none() {
            return Err(DatasetError::MissingLabel {
                path: path.to_path_buf(),
                column: label_column.to_string(),
            });
        }
        Ok(Self::SyscallBinderFrequency(table))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::SyscallFrequency(_) => "syscalls",
            Self::SyscallBinderFrequency(_) => "syscalls+binders",
        }
    }

    pub fn table(&self) -> &FeatureTable {
        match self {
            Self::Static(table)
            | Self::SyscallFrequency(table)
            | Self::SyscallBinderFrequency(table) => table,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.table().names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.table().rows
    }
}

/// Columns matching any pattern case-insensitively, first occurrence of each
/// name only. The label column never qualifies.
pub fn select_static_columns(headers: &[String], patterns: &[String], label_column: &str) -> Vec<usize> {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
    let mut seen = HashSet::new();
    headers
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != label_column && !name.trim().is_empty())
        .filter(|(_, name)| {
            let lower = name.to_lowercase();
            patterns.iter().any(|p| lower.contains(p.as_str()))
        })
        .filter(|(_, name)| seen.insert(name.as_str()))
        .map(|(index, _)| index)
        .collect()
}

fn feature_columns(headers: &[String], label_column: &str) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != label_column)
        .map(|(index, _)| index)
        .collect()
}

/// Non-numeric cells become NaN and are filled later by the imputer.
fn parse_cell(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn parse_label(cell: &str, row: usize) -> Result<i64, DatasetError> {
    let trimmed = cell.trim();
    if let Ok(label) = trimmed.parse::<i64>() {
        return Ok(label);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 && value.is_finite() => Ok(value as i64),
        _ => Err(DatasetError::BadLabel {
            row,
            value: cell.to_string(),
        }),
    }
}

fn read_table<F>(path: &Path, label_column: &str, select: F) -> Result<FeatureTable, DatasetError>
where
    F: FnOnce(&[String]) -> Vec<usize>,
{
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(csv_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let columns = select(&headers);
    let label_index = headers.iter().position(|h| h == label_column);

    let mut rows = Vec::new();
    let mut labels = label_index.map(|_| Vec::new());
    let mut skipped = 0usize;
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) if matches!(e.kind(), csv::ErrorKind::UnequalLengths { .. }) => {
                skipped += 1;
                continue;
            }
            Err(e) => return Err(csv_err(e)),
        };
        rows.push(
            columns
                .iter()
                .map(|&c| record.get(c).map(parse_cell).unwrap_or(f64::NAN))
                .collect(),
        );
        if let (Some(index), Some(labels)) = (label_index, labels.as_mut()) {
            labels.push(parse_label(record.get(index).unwrap_or_default(), line + 1)?);
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    log::debug!("Read {} rows x {} columns from {}", rows.len(), columns.len(), path.display());

    Ok(FeatureTable {
        names: columns.iter().map(|&c| headers[c].clone()).collect(),
        rows,
        labels,
    })
}

/// Feature matrix and labels ready for training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedDataset {
    /// One name per matrix column, duplicates across sources included.
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<i64>,
}

impl MergedDataset {
    pub fn width(&self) -> usize {
        self.column_names.len()
    }

    /// Single pre-merged CSV: every column except the label is a feature.
    pub fn from_csv(path: &Path, label_column: &str) -> Result<Self, DatasetError> {
        let table = read_table(path, label_column, |headers| {
            feature_columns(headers, label_column)
        })?;
        let labels = table.labels.ok_or_else(|| DatasetError::MissingLabel {
            path: path.to_path_buf(),
            column: label_column.to_string(),
        })?;
        if table.rows.is_empty() {
            return Err(DatasetError::Empty("merged table has no rows"));
        }
        Ok(Self {
            column_names: table.names,
            rows: table.rows,
            labels,
        })
    }
}

/// Concatenate sources column-wise in the given order. Labels come from the
/// syscall+binder table. Rows are paired by position; a length mismatch keeps
/// the shortest.
pub fn merge_sources(sources: &[FeatureSource]) -> Result<MergedDataset, DatasetError> {
    let labels = sources
        .iter()
        .find_map(|source| match source {
            FeatureSource::SyscallBinderFrequency(table) => table.labels.clone(),
            _ => None,
        })
        .ok_or(DatasetError::Empty("no syscall+binder table with labels"))?;

    let row_count = sources
        .iter()
        .map(|s| s.rows().len())
        .chain(std::iter::once(labels.len()))
        .min()
        .unwrap_or(0);
    if row_count == 0 {
        return Err(DatasetError::Empty("merged tables have no rows"));
    }
    for source in sources {
        if source.rows().len() != row_count {
            log::warn!(
                "{} table has {} rows, merging only the first {}",
                source.kind(),
                source.rows().len(),
                row_count
            );
        }
    }

    let column_names: Vec<String> = sources.iter().flat_map(|s| s.names().to_vec()).collect();
    let rows = (0..row_count)
        .map(|i| {
            sources
                .iter()
                .flat_map(|s| s.rows()[i].iter().copied())
                .collect()
        })
        .collect();

    Ok(MergedDataset {
        column_names,
        rows,
        labels: labels[..row_count].to_vec(),
    })
}

/// De-duplicated union of every source's feature names.
pub fn vocabulary_from_sources(sources: &[FeatureSource]) -> FeatureVocabulary {
    FeatureVocabulary::from_names(sources.iter().flat_map(|s| s.names().iter()))
}

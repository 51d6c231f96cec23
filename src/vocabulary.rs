use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::bundle::write_atomically;
use crate::error::ArtifactIoError;

/// Ordered, de-duplicated feature names. Position `i` of every feature
/// vector corresponds to `names()[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureVocabulary {
    names: Vec<String>,
}

impl FeatureVocabulary {
    /// Keep the first occurrence of each non-empty name, in input order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let names = names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref().trim();
                if name.is_empty() || !seen.insert(name.to_string()) {
                    None
                } else {
                    Some(name.to_string())
                }
            })
            .collect();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// One name per line, trailing newline.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Lines are trimmed; blank lines are skipped. No de-duplication happens
    /// here, the file is taken verbatim.
    pub fn from_text(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { names }
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactIoError> {
        write_atomically(path, self.to_text().as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactIoError> {
        let text = fs::read_to_string(path).map_err(|source| ArtifactIoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(&text))
    }
}

//! Maps an APK's attribute set onto the training feature space.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::DimensionError;
use crate::vocabulary::FeatureVocabulary;

/// Position `i` is 1.0 iff `vocabulary[i]` is in `attributes`.
///
/// Syscall and binder columns are never present in a manifest, so they stay
/// 0.0: dynamic behavior cannot be observed from the file alone.
pub fn build_feature_vector(vocabulary: &FeatureVocabulary, attributes: &HashSet<String>) -> Vec<f64> {
    vocabulary
        .names()
        .iter()
        .map(|name| if attributes.contains(name) { 1.0 } else { 0.0 })
        .collect()
}

/// What the reconciler had to do to fit a vector to the fitted width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reconciliation {
    Unchanged,
    Padded { added: usize },
    Truncated { dropped: usize },
}

/// Pad with trailing zeros or drop trailing entries until `vector.len() == target`.
pub fn reconcile_width(mut vector: Vec<f64>, target: usize) -> (Vec<f64>, Reconciliation) {
    let width = vector.len();
    if width < target {
        let added = target - width;
        vector.resize(target, 0.0);
        log::warn!("Padded {added} zero features to match model width {target} (built {width})");
        (vector, Reconciliation::Padded { added })
    } else if width > target {
        let dropped = width - target;
        vector.truncate(target);
        log::warn!("Dropped {dropped} trailing features to match model width {target} (built {width})");
        (vector, Reconciliation::Truncated { dropped })
    } else {
        (vector, Reconciliation::Unchanged)
    }
}

/// Like [`reconcile_width`], but refuses any mismatch instead of guessing.
pub fn reconcile_width_strict(
    vector: Vec<f64>,
    target: usize,
) -> Result<(Vec<f64>, Reconciliation), DimensionError> {
    if vector.len() != target {
        return Err(DimensionError {
            component: "model",
            expected: target,
            actual: vector.len(),
        });
    }
    Ok((vector, Reconciliation::Unchanged))
}

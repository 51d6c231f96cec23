//! Random forest of CART trees with Gini impurity.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DimensionError};

const MIN_IMPURITY_DECREASE: f64 = 1e-12;

/// Forest hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Weight classes by `n_samples / (n_classes * count_c)`.
    pub balanced_class_weight: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: 15,
            min_samples_split: 3,
            min_samples_leaf: 1,
            balanced_class_weight: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        distribution: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    rng: StdRng,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
    left_weight: f64,
    left_impurity: f64,
    right_weight: f64,
    right_impurity: f64,
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}

impl<'a> TreeBuilder<'a> {
    fn class_weights(&self, samples: &[usize]) -> (Vec<f64>, f64) {
        let mut counts = vec![0.0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += self.weights[s];
        }
        let total = counts.iter().sum();
        (counts, total)
    }

    fn leaf(&mut self, counts: Vec<f64>, total: f64) -> usize {
        let distribution = if total > 0.0 {
            counts.into_iter().map(|c| c / total).collect()
        } else {
            vec![1.0 / self.n_classes as f64; self.n_classes]
        };
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let (counts, total) = self.class_weights(&samples);
        let impurity = gini(&counts, total);

        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || impurity <= MIN_IMPURITY_DECREASE
        {
            return self.leaf(counts, total);
        }

        let best = match self.find_split(&samples) {
            Some(best) if impurity - best.score > MIN_IMPURITY_DECREASE => best,
            _ => return self.leaf(counts, total),
        };

        self.importances[best.feature] += total * impurity
            - best.left_weight * best.left_impurity
            - best.right_weight * best.right_impurity;

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x[s][best.feature] <= best.threshold);

        // Reserve the slot so children land after their parent.
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        index
    }

    /// Visit features in random order until `max_features` non-constant ones
    /// have been tried.
    fn find_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let n_features = self.x[samples[0]].len();
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(&mut self.rng);

        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut tried = 0;
        let mut order: Vec<(f64, usize)> = Vec::with_capacity(samples.len());

        for feature in features {
            if tried >= self.max_features {
                break;
            }
            order.clear();
            order.extend(samples.iter().map(|&s| (self.x[s][feature], s)));
            order.sort_by(|a, b| a.0.total_cmp(&b.0));
            if order[0].0 == order[order.len() - 1].0 {
                continue;
            }
            tried += 1;

            let mut right = vec![0.0; self.n_classes];
            for &(_, s) in &order {
                right[self.y[s]] += self.weights[s];
            }
            let mut left = vec![0.0; self.n_classes];
            let total: f64 = right.iter().sum();
            let mut left_total = 0.0;

            for i in 0..order.len() - 1 {
                let (value, s) = order[i];
                let w = self.weights[s];
                left[self.y[s]] += w;
                right[self.y[s]] -= w;
                left_total += w;

                let next = order[i + 1].0;
                if value == next || i + 1 < min_leaf || order.len() - (i + 1) < min_leaf {
                    continue;
                }
                let right_total = total - left_total;
                let left_impurity = gini(&left, left_total);
                let right_impurity = gini(&right, right_total);
                let score = (left_total * left_impurity + right_total * right_impurity) / total;
                if best.as_ref().map_or(true, |b| score < b.score) {
                    best = Some(BestSplit {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        score,
                        left_weight: left_total,
                        left_impurity,
                        right_weight: right_total,
                        right_impurity,
                    });
                }
            }
        }
        best
    }
}

impl DecisionTree {
    fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        weights: &[f64],
        n_classes: usize,
        params: &ForestParams,
        seed: u64,
    ) -> Self {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let samples: Vec<usize> = (0..x.len()).filter(|&s| weights[s] > 0.0).collect();
        let mut builder = TreeBuilder {
            x,
            y,
            weights,
            n_classes,
            max_features: ((n_features as f64).sqrt() as usize).max(1),
            params,
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.build(samples, 0);

        let total: f64 = builder.importances.iter().sum();
        if total > 0.0 {
            for imp in &mut builder.importances {
                *imp /= total;
            }
        }
        Self {
            nodes: builder.nodes,
            importances: builder.importances,
        }
    }

    fn predict_proba(&self, row: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no nodes".to_string());
        }
        if self.importances.len() != n_features {
            return Err(format!(
                "{} importances for {n_features} features",
                self.importances.len()
            ));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {index} splits on feature {feature}"));
                    }
                    // Children always follow their parent, so walks terminate.
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} has child {child}"));
                        }
                    }
                }
                Node::Leaf { distribution } if distribution.len() != n_classes => {
                    return Err(format!(
                        "leaf {index} has {} probabilities for {n_classes} classes",
                        distribution.len()
                    ));
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

/// Bagged ensemble of [`DecisionTree`]s over integer class labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    classes: Vec<i64>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(params: &ForestParams, x: &[Vec<f64>], labels: &[i64]) -> Result<Self, DatasetError> {
        if x.is_empty() || x.len() != labels.len() {
            return Err(DatasetError::Empty("feature rows and labels must be non-empty and aligned"));
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err(DatasetError::Empty("cannot fit a forest on zero features"));
        }

        let mut class_counts: BTreeMap<i64, usize> = BTreeMap::new();
        for label in labels {
            *class_counts.entry(*label).or_default() += 1;
        }
        let classes: Vec<i64> = class_counts.keys().copied().collect();
        let y: Vec<usize> = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let n = labels.len() as f64;
        let k = classes.len() as f64;
        let class_weight: Vec<f64> = classes
            .iter()
            .map(|c| {
                if params.balanced_class_weight {
                    n / (k * class_counts[c] as f64)
                } else {
                    1.0
                }
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut weights = vec![0.0; x.len()];
        for tree_index in 0..params.n_estimators {
            weights.iter_mut().for_each(|w| *w = 0.0);
            for _ in 0..x.len() {
                weights[rng.gen_range(0..x.len())] += 1.0;
            }
            for (w, class) in weights.iter_mut().zip(&y) {
                *w *= class_weight[*class];
            }
            trees.push(DecisionTree::fit(x, &y, &weights, classes.len(), params, rng.gen()));
            if (tree_index + 1) % 50 == 0 {
                log::debug!("Fitted {}/{} trees", tree_index + 1, params.n_estimators);
            }
        }

        Ok(Self {
            params: params.clone(),
            classes,
            n_features,
            trees,
        })
    }

    /// Sorted class labels; probability vectors follow this order.
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Structural check for a deserialized model: every split points at an
    /// existing feature and at later nodes, every leaf covers all classes.
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("model has no classes".to_string());
        }
        if self.n_features == 0 {
            return Err("model has zero features".to_string());
        }
        if self.trees.is_empty() {
            return Err("model has no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.classes.len())
                .map_err(|reason| format!("tree {t}: {reason}"))?;
        }
        Ok(())
    }

    fn check_width(&self, row: &[f64]) -> Result<(), DimensionError> {
        if row.len() != self.n_features {
            return Err(DimensionError {
                component: "classifier",
                expected: self.n_features,
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// Mean of the per-tree leaf distributions.
    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, DimensionError> {
        self.check_width(row)?;
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (p, leaf) in proba.iter_mut().zip(tree.predict_proba(row)) {
                *p += leaf;
            }
        }
        let n_trees = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n_trees);
        Ok(proba)
    }

    /// Most probable class; ties go to the lowest label.
    pub fn predict(&self, row: &[f64]) -> Result<i64, DimensionError> {
        let proba = self.predict_proba(row)?;
        self.classes
            .get(argmax(&proba))
            .copied()
            .ok_or(DimensionError {
                component: "classifier classes",
                expected: 1,
                actual: 0,
            })
    }

    /// Normalized impurity decrease per feature, averaged over the trees that
    /// split at least once and renormalized to sum to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        for tree in self.trees.iter().filter(|tree| tree.n_nodes() > 1) {
            for (total, imp) in importances.iter_mut().zip(&tree.importances) {
                *total += imp;
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= sum);
        }
        importances
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

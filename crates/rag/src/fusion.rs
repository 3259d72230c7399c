//! Rank fusion
//!
//! Merges ranked candidate lists from several retrievers and query variants
//! into one list, deduplicated by document id.
//!
//! All modes break score ties by first appearance: lists are visited in the
//! order given and documents in rank order, and the final sort is stable.

use std::collections::HashMap;

use askdoc_config::{FusionMode, RagConfig};
use askdoc_core::Document;

/// One retriever's ranked answer to one query variant, best first
#[derive(Debug, Clone)]
pub struct RankedList {
    /// Position of the producing retriever, used for weights
    pub retriever: usize,
    /// Query variant that produced the list
    pub query: String,
    pub documents: Vec<Document>,
}

impl RankedList {
    pub fn new(retriever: usize, query: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            retriever,
            query: query.into(),
            documents,
        }
    }
}

/// Fusion policy
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub mode: FusionMode,
    /// Smoothing constant for reciprocal rank fusion
    pub rrf_k: f32,
    /// Results kept after fusion
    pub top_k: usize,
    /// Per-retriever weights for score-based modes; equal when unset
    pub weights: Option<Vec<f32>>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for FusionConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            mode: config.fusion_mode,
            rrf_k: config.rrf_k,
            top_k: config.top_k,
            weights: config.retriever_weights.clone(),
        }
    }
}

impl FusionConfig {
    fn weight(&self, retriever: usize, retriever_count: usize) -> f32 {
        let equal = 1.0 / retriever_count.max(1) as f32;
        match &self.weights {
            Some(weights) => {
                let total: f32 = weights.iter().sum();
                match weights.get(retriever) {
                    Some(w) if total > 0.0 => w / total,
                    _ => equal,
                }
            }
            None => equal,
        }
    }
}

/// Accumulates fused scores while remembering first-seen order
struct Accumulator {
    order: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn add(&mut self, document: &Document, score: f32, combine: impl Fn(f32, f32) -> f32) {
        match self.positions.get(&document.id) {
            Some(&pos) => {
                let existing = &mut self.order[pos];
                existing.score = combine(existing.score, score);
            }
            None => {
                self.positions.insert(document.id.clone(), self.order.len());
                self.order.push(document.clone().with_score(score));
            }
        }
    }

    fn finish(mut self, top_k: usize) -> Vec<Document> {
        // sort_by is stable, so ties keep first-seen order
        self.order.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.order.truncate(top_k);
        self.order
    }
}

/// Fuse ranked lists according to `config.mode`
pub fn fuse(lists: &[RankedList], config: &FusionConfig) -> Vec<Document> {
    let fused = match config.mode {
        FusionMode::ReciprocalRank => reciprocal_rank(lists, config.rrf_k),
        FusionMode::RelativeScore => normalized_score(lists, config, min_max_bounds),
        FusionMode::DistBased => normalized_score(lists, config, distribution_bounds),
        FusionMode::Simple => simple(lists),
    };
    let result = fused.finish(config.top_k);
    tracing::debug!(
        mode = ?config.mode,
        lists = lists.len(),
        fused = result.len(),
        "Fused ranked lists"
    );
    result
}

/// Σ 1 / (rank + k) with 1-indexed ranks
fn reciprocal_rank(lists: &[RankedList], k: f32) -> Accumulator {
    let mut acc = Accumulator::new();
    for list in lists {
        for (rank, document) in list.documents.iter().enumerate() {
            let score = 1.0 / ((rank + 1) as f32 + k);
            acc.add(document, score, |a, b| a + b);
        }
    }
    acc
}

/// Deduplicate keeping the highest raw score
fn simple(lists: &[RankedList]) -> Accumulator {
    let mut acc = Accumulator::new();
    for list in lists {
        for document in &list.documents {
            acc.add(document, document.score, f32::max);
        }
    }
    acc
}

fn min_max_bounds(scores: &[f32]) -> (f32, f32) {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (min, max)
}

/// Mean ± 3 standard deviations
fn distribution_bounds(scores: &[f32]) -> (f32, f32) {
    let n = scores.len() as f32;
    let mean = scores.iter().sum::<f32>() / n;
    let variance = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
    let std = variance.sqrt();
    (mean - 3.0 * std, mean + 3.0 * std)
}

/// Normalize each list into [0, 1], weight by retriever, sum across lists
fn normalized_score(
    lists: &[RankedList],
    config: &FusionConfig,
    bounds: fn(&[f32]) -> (f32, f32),
) -> Accumulator {
    let retriever_count = lists.iter().map(|l| l.retriever + 1).max().unwrap_or(1);
    let mut variants: Vec<&str> = Vec::new();
    for list in lists {
        if !variants.contains(&list.query.as_str()) {
            variants.push(list.query.as_str());
        }
    }
    let query_count = variants.len().max(1) as f32;

    let mut acc = Accumulator::new();
    for list in lists {
        if list.documents.is_empty() {
            continue;
        }
        let scores: Vec<f32> = list.documents.iter().map(|d| d.score).collect();
        let (low, high) = bounds(&scores);
        let weight = config.weight(list.retriever, retriever_count);

        for document in &list.documents {
            let normalized = if high > low {
                ((document.score - low) / (high - low)).clamp(0.0, 1.0)
            } else {
                1.0
            };
            acc.add(document, normalized * weight / query_count, |a, b| a + b);
        }
    }
    acc
}

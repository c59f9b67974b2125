//! Attempt planning: layer-major enumeration of (layer, strategy) pairs.

use crate::download::formats::FormatLayer;
use crate::download::strategies::Strategy;

/// One (layer, strategy) combination, tried at most once in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based position in the plan
    pub index: usize,
    pub layer: FormatLayer,
    pub strategy: Strategy,
}

/// Number of attempts a request may issue: `layers x strategies`, capped.
pub fn attempt_budget(layer_count: usize, strategy_count: usize, max_attempts: usize) -> usize {
    layer_count.saturating_mul(strategy_count).min(max_attempts)
}

/// Enumerates every strategy for layer 1, then every strategy for layer 2,
/// and so on. A better format with any strategy beats a worse format.
/// Combinations past `max_attempts` (the lowest layers) are dropped.
pub fn plan(layers: &[FormatLayer], strategies: &[Strategy], max_attempts: usize) -> Vec<Attempt> {
    layers
        .iter()
        .flat_map(|layer| strategies.iter().map(move |strategy| (layer, strategy)))
        .take(max_attempts)
        .enumerate()
        .map(|(i, (layer, strategy))| Attempt {
            index: i + 1,
            layer: layer.clone(),
            strategy: strategy.clone(),
        })
        .collect()
}

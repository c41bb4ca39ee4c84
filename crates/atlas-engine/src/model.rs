//! Models that bias operator choices, trained on traces.
//!
//! The engine only needs two things from a model: a score per candidate of
//! an operator call, and a way to learn from recorded runs. Anything richer
//! (neural encoders, batching) lives behind [`OpModel`].

use std::collections::BTreeMap;

use atlas_core::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AtlasError, AtlasResult};
use crate::namespace::CallArgs;
use crate::tracer::GeneratorTrace;

/// One operator call to score.
#[derive(Debug, Clone, Copy)]
pub struct OpQuery<'a> {
    pub op_name: &'a str,
    pub sid: &'a str,
    pub candidates: &'a [Value],
    /// The `context=` keyword of the call, if given.
    pub context: Option<&'a Value>,
    pub args: &'a CallArgs,
}

/// A trainable scorer of operator candidates.
pub trait OpModel {
    /// One score per candidate, higher is better.
    fn score(&self, query: &OpQuery<'_>) -> AtlasResult<Vec<f64>>;

    fn train(&mut self, traces: &[GeneratorTrace]) -> AtlasResult<()>;
}

fn default_smoothing() -> f64 {
    1.0
}

/// Counts how often each value was chosen at each static id.
///
/// Scores are smoothed relative frequencies:
/// `(count + alpha) / (total + alpha * candidates)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyModel {
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    /// sid → value repr → count.
    #[serde(default)]
    counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Default for FrequencyModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyModel {
    pub fn new() -> Self {
        Self {
            smoothing: default_smoothing(),
            counts: BTreeMap::new(),
        }
    }

    /// Set the additive smoothing constant (builder pattern).
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn count(&self, sid: &str, value: &Value) -> u64 {
        self.counts
            .get(sid)
            .and_then(|by_value| by_value.get(&value.repr()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of static ids seen in training.
    pub fn sites(&self) -> usize {
        self.counts.len()
    }
}

impl OpModel for FrequencyModel {
    fn score(&self, query: &OpQuery<'_>) -> AtlasResult<Vec<f64>> {
        let total: u64 = self
            .counts
            .get(query.sid)
            .map(|by_value| by_value.values().sum())
            .unwrap_or(0);
        let denominator = total as f64 + self.smoothing * query.candidates.len() as f64;
        Ok(query
            .candidates
            .iter()
            .map(|c| {
                let count = self.count(query.sid, c) as f64;
                if denominator > 0.0 {
                    (count + self.smoothing) / denominator
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn train(&mut self, traces: &[GeneratorTrace]) -> AtlasResult<()> {
        if self.smoothing.is_nan() || self.smoothing < 0.0 {
            return Err(AtlasError::Model(format!(
                "smoothing must be non-negative, got {}",
                self.smoothing
            )));
        }
        let mut records = 0usize;
        for trace in traces {
            for record in &trace.records {
                *self
                    .counts
                    .entry(record.sid.clone())
                    .or_default()
                    .entry(record.retval.repr())
                    .or_insert(0) += 1;
                records += 1;
            }
        }
        debug!(traces = traces.len(), records, sites = self.counts.len(), "model_trained");
        Ok(())
    }
}

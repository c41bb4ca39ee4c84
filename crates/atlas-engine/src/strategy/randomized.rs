//! Uniform random choice.

use std::any::Any;

use atlas_core::Value;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{OpTable, ResolvedOp, Strategy};
use crate::namespace::{CallArgs, RunResult, Signal};

/// Samples every operator uniformly. Never finishes: enumerations under this
/// strategy are infinite and should be bounded by the caller (`take(n)`).
pub struct RandomizedStrategy {
    ops: OpTable,
    rng: StdRng,
    seed: Option<u64>,
}

impl RandomizedStrategy {
    pub fn new() -> Self {
        Self {
            ops: OpTable::new(),
            rng: StdRng::from_entropy(),
            seed: None,
        }
    }

    /// Reproducible sampling: the generator is reseeded on every `init`, so
    /// each enumeration draws the same sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            ops: OpTable::new(),
            rng: StdRng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl Default for RandomizedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RandomizedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomizedStrategy")
            .field("seed", &self.seed)
            .field("ops", &self.ops)
            .finish()
    }
}

impl Strategy for RandomizedStrategy {
    fn name(&self) -> &str {
        "randomized"
    }

    fn op_table(&self) -> &OpTable {
        &self.ops
    }

    fn op_table_mut(&mut self) -> &mut OpTable {
        &mut self.ops
    }

    fn invoke(&mut self, op: &ResolvedOp, call: &CallArgs) -> RunResult<Value> {
        op.sample(call, &mut self.rng)?.ok_or(Signal::Skip)
    }

    fn init(&mut self) {
        if let Some(seed) = self.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn suspend(&mut self) -> Box<dyn Any> {
        Box::new(self.rng.clone())
    }

    fn resume(&mut self, state: Box<dyn Any>) {
        if let Ok(rng) = state.downcast::<StdRng>() {
            self.rng = *rng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;
    use crate::strategy::OpKind;

    fn draw(strategy: &mut RandomizedStrategy, n: usize) -> Vec<Value> {
        let op = ResolvedOp {
            op_name: "Select".into(),
            sid: "g/Select#0".into(),
            oid: None,
            kind: OpKind::Builtin(Operator::Select),
        };
        let call = CallArgs::new(vec![Value::from(vec![1, 2, 3, 4, 5, 6])]);
        strategy.init();
        (0..n).map(|_| strategy.invoke(&op, &call).unwrap()).collect()
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let mut strategy = RandomizedStrategy::with_seed(11);
        let first = draw(&mut strategy, 16);
        let second = draw(&mut strategy, 16);
        assert_eq!(first, second);
        assert!(!strategy.is_finished());
    }
}

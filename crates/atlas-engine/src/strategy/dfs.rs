//! Exhaustive depth-first exploration.

use std::any::Any;

use atlas_core::Value;
use tracing::trace;

use super::{OpTable, ResolvedOp, Strategy};
use crate::error::AtlasResult;
use crate::namespace::{CallArgs, RunResult, Signal};

#[derive(Debug, Clone)]
struct ChoicePoint {
    sid: String,
    candidates: Vec<Value>,
    index: usize,
}

/// Stack of choice points indexed by the dynamic order of operator calls
/// within a run.
///
/// During a run, positions below the stack depth replay the current choice;
/// the first call past the top pushes a new point at its first candidate.
/// Between runs, [`SearchTree::backtrack`] advances the deepest point that
/// still has alternatives and pops everything above it.
#[derive(Debug, Default)]
pub(crate) struct SearchTree {
    points: Vec<ChoicePoint>,
    cursor: usize,
    exhausted: bool,
}

impl SearchTree {
    pub(crate) fn reset(&mut self) {
        self.points.clear();
        self.cursor = 0;
        self.exhausted = false;
    }

    pub(crate) fn begin_run(&mut self) {
        self.cursor = 0;
    }

    /// Current value for the next choice point. `candidates` is only called
    /// when a new point is pushed; an empty candidate list skips the run.
    pub(crate) fn choose(
        &mut self,
        op: &ResolvedOp,
        candidates: impl FnOnce() -> AtlasResult<Vec<Value>>,
    ) -> RunResult<Value> {
        let pos = self.cursor;
        self.cursor += 1;
        if let Some(point) = self.points.get(pos) {
            if point.sid == op.sid {
                return Ok(point.candidates[point.index].clone());
            }
            // The run diverged from the recorded path: forget the stale suffix.
            self.points.truncate(pos);
        }
        let candidates = candidates()?;
        let Some(first) = candidates.first().cloned() else {
            trace!(sid = %op.sid, position = pos, "choice_point_empty");
            return Err(Signal::Skip);
        };
        self.points.push(ChoicePoint {
            sid: op.sid.clone(),
            candidates,
            index: 0,
        });
        Ok(first)
    }

    pub(crate) fn backtrack(&mut self) {
        self.points.truncate(self.cursor);
        while let Some(point) = self.points.last_mut() {
            if point.index + 1 < point.candidates.len() {
                point.index += 1;
                break;
            }
            self.points.pop();
        }
        if self.points.is_empty() {
            self.exhausted = true;
        }
        self.cursor = 0;
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn depth(&self) -> usize {
        self.points.len()
    }
}

/// Enumerates every combination of choices, first candidates first.
#[derive(Debug, Default)]
pub struct DfsStrategy {
    ops: OpTable,
    tree: SearchTree,
}

impl DfsStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of choice points on the current path.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }
}

impl Strategy for DfsStrategy {
    fn name(&self) -> &str {
        "dfs"
    }

    fn op_table(&self) -> &OpTable {
        &self.ops
    }

    fn op_table_mut(&mut self) -> &mut OpTable {
        &mut self.ops
    }

    fn invoke(&mut self, op: &ResolvedOp, call: &CallArgs) -> RunResult<Value> {
        self.tree.choose(op, || op.candidates(call))
    }

    fn init(&mut self) {
        self.tree.reset();
    }

    fn init_run(&mut self) {
        self.tree.begin_run();
    }

    fn finish_run(&mut self) {
        self.tree.backtrack();
    }

    fn is_finished(&self) -> bool {
        self.tree.is_exhausted()
    }

    fn suspend(&mut self) -> Box<dyn Any> {
        Box::new(std::mem::take(&mut self.tree))
    }

    fn resume(&mut self, state: Box<dyn Any>) {
        if let Ok(tree) = state.downcast::<SearchTree>() {
            self.tree = *tree;
        }
    }
}

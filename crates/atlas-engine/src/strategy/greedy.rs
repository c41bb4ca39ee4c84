//! Model-guided depth-first search.

use std::any::Any;

use atlas_core::Value;

use super::{OpTable, ResolvedOp, SearchTree, Strategy};
use crate::error::{AtlasError, AtlasResult};
use crate::model::{OpModel, OpQuery};
use crate::namespace::{CallArgs, RunResult};

/// Depth-first search whose candidates are visited in descending model
/// score, so the first run follows the most probable path.
pub struct GreedyStrategy {
    ops: OpTable,
    tree: SearchTree,
    model: Box<dyn OpModel>,
}

impl GreedyStrategy {
    pub fn new<M: OpModel + 'static>(model: M) -> Self {
        Self {
            ops: OpTable::new(),
            tree: SearchTree::default(),
            model: Box::new(model),
        }
    }

    pub fn model(&self) -> &dyn OpModel {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn OpModel {
        self.model.as_mut()
    }
}

/// Reorder `candidates` by descending score. Ties keep their original order.
fn rank(model: &dyn OpModel, op: &ResolvedOp, call: &CallArgs, candidates: Vec<Value>) -> AtlasResult<Vec<Value>> {
    if candidates.len() < 2 {
        return Ok(candidates);
    }
    let query = OpQuery {
        op_name: &op.op_name,
        sid: &op.sid,
        candidates: &candidates,
        context: call.kwarg("context"),
        args: call,
    };
    let scores = model.score(&query)?;
    if scores.len() != candidates.len() {
        return Err(AtlasError::Model(format!(
            "model returned {} scores for {} candidates at {}",
            scores.len(),
            candidates.len(),
            op.sid
        )));
    }
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut slots: Vec<Option<Value>> = candidates.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

impl Strategy for GreedyStrategy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn op_table(&self) -> &OpTable {
        &self.ops
    }

    fn op_table_mut(&mut self) -> &mut OpTable {
        &mut self.ops
    }

    fn invoke(&mut self, op: &ResolvedOp, call: &CallArgs) -> RunResult<Value> {
        let model = self.model.as_ref();
        self.tree
            .choose(op, || rank(model, op, call, op.candidates(call)?))
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

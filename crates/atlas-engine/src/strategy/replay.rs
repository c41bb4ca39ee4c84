//! Replays the choices of a recorded run.

use std::any::Any;

use atlas_core::Value;

use super::{OpTable, ResolvedOp, Strategy};
use crate::error::AtlasError;
use crate::namespace::{CallArgs, RunResult, Signal};
use crate::tracer::GeneratorTrace;

/// Returns the recorded value of each operator call in order, checking that
/// the operator name and static id match the record. Finished after one run.
#[derive(Debug)]
pub struct ReplayStrategy {
    ops: OpTable,
    trace: GeneratorTrace,
    cursor: usize,
    done: bool,
}

impl ReplayStrategy {
    pub fn new(trace: GeneratorTrace) -> Self {
        Self {
            ops: OpTable::new(),
            trace,
            cursor: 0,
            done: false,
        }
    }

    pub fn trace(&self) -> &GeneratorTrace {
        &self.trace
    }

    fn mismatch(&self, message: String) -> Signal {
        Signal::Fail(AtlasError::TraceMismatch {
            position: self.cursor,
            message,
        })
    }
}

impl Strategy for ReplayStrategy {
    fn name(&self) -> &str {
        "replay"
    }

    fn op_table(&self) -> &OpTable {
        &self.ops
    }

    fn op_table_mut(&mut self) -> &mut OpTable {
        &mut self.ops
    }

    fn invoke(&mut self, op: &ResolvedOp, _call: &CallArgs) -> RunResult<Value> {
        let Some(record) = self.trace.records.get(self.cursor) else {
            return Err(self.mismatch(format!("trace has no record for {}", op.sid)));
        };
        if record.op_name != op.op_name || record.sid != op.sid {
            return Err(self.mismatch(format!(
                "expected {} ({}), found {} ({})",
                record.sid, record.op_name, op.sid, op.op_name
            )));
        }
        let value = record.retval.clone();
        self.cursor += 1;
        Ok(value)
    }

    fn init(&mut self) {
        self.cursor = 0;
        self.done = false;
    }

    fn init_run(&mut self) {
        self.cursor = 0;
    }

    fn finish_run(&mut self) {
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done
    }

    fn suspend(&mut self) -> Box<dyn Any> {
        let state = (self.cursor, self.done);
        self.cursor = 0;
        self.done = false;
        Box::new(state)
    }

    fn resume(&mut self, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<(usize, bool)>() {
            (self.cursor, self.done) = *state;
        }
    }
}

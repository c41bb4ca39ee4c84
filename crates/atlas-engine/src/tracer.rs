//! Recording of operator calls per run.

use std::collections::BTreeMap;

use atlas_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::AtlasResult;
use crate::generator::GeneratorInfo;
use crate::hook::{Hook, OpEvent};
use crate::namespace::CallArgs;

/// One operator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRecord {
    pub op_name: String,
    /// Lexical static id of the call site.
    pub sid: String,
    /// Dynamic position of the call within the run.
    pub position: usize,
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    pub retval: Value,
}

/// All operator invocations of one run, in call order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorTrace {
    /// Arguments the generator was invoked with.
    pub inputs: CallArgs,
    pub records: Vec<OpRecord>,
}

impl GeneratorTrace {
    pub fn new(inputs: CallArgs) -> Self {
        Self {
            inputs,
            records: Vec::new(),
        }
    }

    /// Chosen values, in call order.
    pub fn choices(&self) -> Vec<&Value> {
        self.records.iter().map(|r| &r.retval).collect()
    }

    pub fn to_json(&self) -> AtlasResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> AtlasResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Hook that records every operator call of the current run and keeps the
/// trace of the most recently completed run.
#[derive(Debug, Default)]
pub struct DefaultTracer {
    current: Option<GeneratorTrace>,
    last: Option<GeneratorTrace>,
}

impl DefaultTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_trace(&self) -> Option<&GeneratorTrace> {
        self.last.as_ref()
    }

    pub fn take_last_trace(&mut self) -> Option<GeneratorTrace> {
        self.last.take()
    }
}

impl Hook for DefaultTracer {
    fn init_run(&mut self, _generator: &GeneratorInfo, args: &CallArgs) -> AtlasResult<()> {
        self.current = Some(GeneratorTrace::new(args.clone()));
        Ok(())
    }

    fn after_op(&mut self, event: &OpEvent<'_>, retval: &Value) -> AtlasResult<()> {
        let trace = self.current.get_or_insert_with(GeneratorTrace::default);
        trace.records.push(OpRecord {
            op_name: event.op_name.to_string(),
            sid: event.sid.to_string(),
            position: trace.records.len(),
            args: event.args.args.clone(),
            kwargs: event.args.kwargs.clone(),
            retval: retval.clone(),
        });
        Ok(())
    }

    fn finish_run(&mut self, _generator: &GeneratorInfo) -> AtlasResult<()> {
        self.last = self.current.take();
        Ok(())
    }
}

//! Strategies: the semantics of choice-point operators.
//!
//! A strategy decides which value each operator call returns and owns the
//! exploration state across runs. The compiler asks it to resolve every
//! operator call site once ([`Strategy::process_op`]); the rewritten call
//! then delegates to [`Strategy::invoke`] on every execution.
//!
//! ## Lifecycle
//!
//! ```text
//! init ── (init_run ── run ── finish_run)* ── finish
//!                                   └── until is_finished()
//! ```

mod dfs;
mod greedy;
mod randomized;
mod replay;

use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use atlas_core::Value;
use rand::Rng;
use tracing::warn;

use crate::error::{AtlasError, AtlasResult};
use crate::generator::GeneratorInfo;
use crate::namespace::{CallArgs, RunResult, Signal};
use crate::operators::Operator;

pub use dfs::DfsStrategy;
pub use greedy::GreedyStrategy;
pub use randomized::RandomizedStrategy;
pub use replay::ReplayStrategy;

pub(crate) use dfs::SearchTree;

/// User-supplied candidate list for one operator call site.
pub type CandidateFn = Rc<dyn Fn(&CallArgs) -> AtlasResult<Vec<Value>>>;

/// How a resolved call site produces its candidates.
#[derive(Clone)]
pub enum OpKind {
    Builtin(Operator),
    Custom(CandidateFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Builtin(op) => f.debug_tuple("Builtin").field(op).finish(),
            OpKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// An operator call site after resolution by a strategy.
#[derive(Debug, Clone)]
pub struct ResolvedOp {
    pub op_name: String,
    /// Static id, `{generator}/{op}@{oid}` or `{generator}/{op}#{n}`.
    pub sid: String,
    pub oid: Option<String>,
    pub kind: OpKind,
}

impl ResolvedOp {
    pub fn candidates(&self, call: &CallArgs) -> AtlasResult<Vec<Value>> {
        match &self.kind {
            OpKind::Builtin(op) => op.candidates(call),
            OpKind::Custom(provider) => provider(call),
        }
    }

    pub fn sample<R: Rng>(&self, call: &CallArgs, rng: &mut R) -> AtlasResult<Option<Value>> {
        match &self.kind {
            OpKind::Builtin(op) => op.sample(call, rng),
            OpKind::Custom(provider) => {
                let candidates = provider(call)?;
                if candidates.is_empty() {
                    return Ok(None);
                }
                let i = rng.gen_range(0..candidates.len());
                Ok(candidates.into_iter().nth(i))
            }
        }
    }
}

/// An operator call found by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub op_name: String,
    /// The `oid="..."` annotation, if any.
    pub oid: Option<String>,
    /// Lexical occurrence index among calls to the same operator.
    pub occurrence: usize,
    /// Lexical index among all operator calls of the function.
    pub index: usize,
    pub line: u32,
}

impl CallSite {
    pub fn static_id(&self, generator: &GeneratorInfo) -> String {
        match &self.oid {
            Some(oid) => format!("{}/{}@{}", generator.label(), self.op_name, oid),
            None => format!("{}/{}#{}", generator.label(), self.op_name, self.occurrence),
        }
    }

    /// Name the call is renamed to in the compiled body.
    pub fn callable_name(&self) -> String {
        format!("__atlas_{}_{}", self.op_name, self.index)
    }
}

/// Result of [`Strategy::process_op`].
#[derive(Debug, Clone)]
pub struct ProcessedOp {
    pub callable_name: String,
    pub sid: String,
    pub op: ResolvedOp,
}

/// Known operators plus per-call-site overrides keyed `"{op}_{oid}"`.
#[derive(Clone, Default)]
pub struct OpTable {
    overrides: HashMap<String, CandidateFn>,
}

impl OpTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_override(&mut self, op_name: &str, oid: &str, provider: CandidateFn) {
        self.overrides.insert(format!("{}_{}", op_name, oid), provider);
    }

    pub fn known_ops(&self) -> BTreeSet<String> {
        Operator::ALL.iter().map(|op| op.name().to_string()).collect()
    }

    /// Resolve a call site. An override for the site's oid wins over the
    /// generic operator.
    pub fn resolve(&self, strategy: &str, generator: &GeneratorInfo, site: &CallSite) -> AtlasResult<ProcessedOp> {
        let unknown = || AtlasError::UnknownOperator {
            strategy: strategy.to_string(),
            op: site.op_name.clone(),
        };
        let builtin = Operator::from_name(&site.op_name).ok_or_else(unknown)?;
        let kind = site
            .oid
            .as_ref()
            .and_then(|oid| self.overrides.get(&format!("{}_{}", site.op_name, oid)))
            .map(|provider| OpKind::Custom(provider.clone()))
            .unwrap_or(OpKind::Builtin(builtin));
        let sid = site.static_id(generator);
        Ok(ProcessedOp {
            callable_name: site.callable_name(),
            sid: sid.clone(),
            op: ResolvedOp {
                op_name: site.op_name.clone(),
                sid,
                oid: site.oid.clone(),
                kind,
            },
        })
    }
}

impl fmt::Debug for OpTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.overrides.keys().collect();
        keys.sort();
        f.debug_struct("OpTable").field("overrides", &keys).finish()
    }
}

/// Semantics of choice points plus exploration state.
///
/// Implementations must not call back into generator code: the handle holds
/// a mutable borrow of the strategy for the duration of each method.
pub trait Strategy {
    fn name(&self) -> &str;

    fn op_table(&self) -> &OpTable;

    fn op_table_mut(&mut self) -> &mut OpTable;

    fn known_ops(&self) -> BTreeSet<String> {
        self.op_table().known_ops()
    }

    /// Resolve one operator call site at compile time.
    fn process_op(&mut self, generator: &GeneratorInfo, site: &CallSite) -> AtlasResult<ProcessedOp> {
        self.op_table().resolve(self.name(), generator, site)
    }

    /// Produce the value of one operator call.
    fn invoke(&mut self, op: &ResolvedOp, call: &CallArgs) -> RunResult<Value>;

    fn init(&mut self) {}

    fn init_run(&mut self) {}

    fn finish_run(&mut self) {}

    fn finish(&mut self) {}

    fn is_finished(&self) -> bool;

    /// Move the exploration state out, leaving a fresh one, so an unrelated
    /// call can run to completion in between.
    fn suspend(&mut self) -> Box<dyn Any> {
        Box::new(())
    }

    /// Put back state taken by [`Strategy::suspend`].
    fn resume(&mut self, _state: Box<dyn Any>) {}

    /// Register a custom candidate provider for `op_name` calls annotated
    /// with `oid`.
    fn register_override(&mut self, op_name: &str, oid: &str, provider: CandidateFn) {
        self.op_table_mut().insert_override(op_name, oid, provider);
    }
}

struct StrategyCell {
    strategy: RefCell<Box<dyn Strategy>>,
    sessions: Cell<usize>,
    running: Cell<usize>,
}

/// Shared handle to a strategy. Generators of one group hold clones of the
/// same handle.
#[derive(Clone)]
pub struct StrategyHandle(Rc<StrategyCell>);

impl StrategyHandle {
    pub fn new<S: Strategy + 'static>(strategy: S) -> Self {
        Self::from_box(Box::new(strategy))
    }

    pub fn from_box(strategy: Box<dyn Strategy>) -> Self {
        Self(Rc::new(StrategyCell {
            strategy: RefCell::new(strategy),
            sessions: Cell::new(0),
            running: Cell::new(0),
        }))
    }

    /// Build one of the named strategies (`"dfs"`, `"randomized"`).
    pub fn named(name: &str) -> AtlasResult<Self> {
        match name {
            "dfs" => Ok(Self::new(DfsStrategy::new())),
            "randomized" => Ok(Self::new(RandomizedStrategy::new())),
            other => Err(AtlasError::UnknownStrategy(other.to_string())),
        }
    }

    pub fn ptr_eq(&self, other: &StrategyHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn borrow_mut(&self) -> AtlasResult<RefMut<'_, Box<dyn Strategy>>> {
        self.0
            .strategy
            .try_borrow_mut()
            .map_err(|_| AtlasError::Config("strategy re-entered while in use".to_string()))
    }

    /// Inspect or reconfigure the strategy.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut dyn Strategy) -> R) -> AtlasResult<R> {
        let mut strategy = self.borrow_mut()?;
        Ok(f(strategy.as_mut()))
    }

    pub fn name(&self) -> String {
        self.0
            .strategy
            .try_borrow()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|_| "<in use>".to_string())
    }

    pub fn known_ops(&self) -> AtlasResult<BTreeSet<String>> {
        Ok(self.borrow_mut()?.known_ops())
    }

    pub(crate) fn process_op(&self, generator: &GeneratorInfo, site: &CallSite) -> AtlasResult<ProcessedOp> {
        self.borrow_mut()?.process_op(generator, site)
    }

    pub(crate) fn invoke(&self, op: &ResolvedOp, call: &CallArgs) -> RunResult<Value> {
        let mut strategy = self.borrow_mut().map_err(Signal::Fail)?;
        strategy.invoke(op, call)
    }

    pub(crate) fn init(&self) -> AtlasResult<()> {
        self.borrow_mut()?.init();
        Ok(())
    }

    pub(crate) fn init_run(&self) -> AtlasResult<()> {
        self.borrow_mut()?.init_run();
        Ok(())
    }

    pub(crate) fn finish_run(&self) -> AtlasResult<()> {
        self.borrow_mut()?.finish_run();
        Ok(())
    }

    pub(crate) fn finish(&self) -> AtlasResult<()> {
        self.borrow_mut()?.finish();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.0
            .strategy
            .try_borrow()
            .map(|s| s.is_finished())
            .unwrap_or(false)
    }

    /// Whether an enumeration or bracketed call is open, running or not.
    pub fn in_session(&self) -> bool {
        self.0.sessions.get() > 0
    }

    /// Whether a run under this strategy is executing right now.
    pub fn is_running(&self) -> bool {
        self.0.running.get() > 0
    }

    pub(crate) fn enter_session(&self) -> SessionCount {
        self.0.sessions.set(self.0.sessions.get() + 1);
        SessionCount(self.clone())
    }

    pub(crate) fn enter_run(&self) -> RunDepth {
        self.0.running.set(self.0.running.get() + 1);
        RunDepth(self.clone())
    }

    /// Set the exploration state aside until the returned guard drops.
    pub(crate) fn suspend(&self) -> AtlasResult<Suspended> {
        let state = self.borrow_mut()?.suspend();
        Ok(Suspended {
            handle: self.clone(),
            state: Some(state),
        })
    }
}

impl fmt::Debug for StrategyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyHandle")
            .field("name", &self.name())
            .field("sessions", &self.0.sessions.get())
            .field("running", &self.0.running.get())
            .finish()
    }
}

/// Marks a strategy as in use until dropped.
pub(crate) struct SessionCount(StrategyHandle);

impl Drop for SessionCount {
    fn drop(&mut self) {
        let sessions = &self.0 .0.sessions;
        sessions.set(sessions.get().saturating_sub(1));
    }
}

/// Marks a run as executing until dropped.
pub(crate) struct RunDepth(StrategyHandle);

impl Drop for RunDepth {
    fn drop(&mut self) {
        let running = &self.0 .0.running;
        running.set(running.get().saturating_sub(1));
    }
}

/// Exploration state set aside by [`StrategyHandle::suspend`]; restored on
/// drop.
pub(crate) struct Suspended {
    handle: StrategyHandle,
    state: Option<Box<dyn Any>>,
}

impl Drop for Suspended {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        match self.handle.borrow_mut() {
            Ok(mut strategy) => strategy.resume(state),
            Err(err) => warn!(strategy = %self.handle.name(), error = %err, "strategy_resume_failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> GeneratorInfo {
        GeneratorInfo::new("g")
    }

    fn site(op: &str, oid: Option<&str>, occurrence: usize) -> CallSite {
        CallSite {
            op_name: op.to_string(),
            oid: oid.map(str::to_string),
            occurrence,
            index: 3,
            line: 1,
        }
    }

    #[test]
    fn test_static_ids() {
        assert_eq!(site("Select", None, 2).static_id(&info()), "g/Select#2");
        assert_eq!(site("Select", Some("d"), 2).static_id(&info()), "g/Select@d");
        assert_eq!(site("Select", None, 0).callable_name(), "__atlas_Select_3");
    }

    #[test]
    fn test_named_strategies() {
        assert_eq!(StrategyHandle::named("dfs").unwrap().name(), "dfs");
        assert_eq!(StrategyHandle::named("randomized").unwrap().name(), "randomized");
        match StrategyHandle::named("beam") {
            Err(AtlasError::UnknownStrategy(name)) => assert_eq!(name, "beam"),
            other => panic!("unexpected {:?}", other.map(|h| h.name())),
        }
    }

    #[test]
    fn test_override_takes_precedence() {
        let mut table = OpTable::new();
        let provider: CandidateFn = Rc::new(|_: &CallArgs| Ok(vec![Value::from(42)]));
        table.insert_override("Select", "x", provider);
        let call = CallArgs::new(vec![Value::from(vec![1, 2])]);

        let custom = table.resolve("dfs", &info(), &site("Select", Some("x"), 0)).unwrap();
        assert_eq!(custom.op.candidates(&call).unwrap(), vec![Value::from(42)]);

        let generic = table.resolve("dfs", &info(), &site("Select", Some("y"), 0)).unwrap();
        assert_eq!(generic.op.candidates(&call).unwrap().len(), 2);

        assert!(matches!(
            table.resolve("dfs", &info(), &site("Choose", None, 0)),
            Err(AtlasError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_session_count() {
        let handle = StrategyHandle::named("dfs").unwrap();
        assert!(!handle.in_session());
        {
            let _outer = handle.enter_session();
            let _inner = handle.enter_session();
            assert!(handle.in_session());
        }
        assert!(!handle.in_session());
    }
}

//! Generator compilation and execution for the atlas language.
//!
//! A generator is an ordinary function whose *operator calls* (`Select`,
//! `Subset`, `OrderedSubset`, `Product`, `Sequence`) are choice points. The
//! compiler rewrites each operator call site into a callback bound to the
//! generator's strategy, so the same function can be run once, enumerated
//! exhaustively, sampled, traced and replayed.
//!
//! ## Pipeline
//!
//! ```text
//! source ──► compiler ──► CompiledFunction ──► Session (strategy + hooks)
//!               │                                   │
//!               └── Op(..., oid="x") ──► __atlas_Op_n ──► Strategy::invoke
//! ```
//!
//! ## Core Concepts
//!
//! - **Generator**: handle owning source, strategy, hooks and globals
//! - **Strategy**: decides what each operator call returns (`dfs`,
//!   `randomized`, `greedy`, `replay`)
//! - **Hook**: observes runs and operator calls; [`DefaultTracer`] records
//!   traces
//! - **Registry**: named generators and groups sharing one strategy
//!
//! ## Example
//!
//! ```no_run
//! use atlas_engine::{Generator, Value};
//!
//! let bits = Generator::from_source(
//!     "bits.atlas",
//!     r#"@generator
//! fn bits(n) {
//!     let s = "";
//!     for i in range(n) { s += Select(["0", "1"]); }
//!     return s;
//! }"#,
//! )?;
//! for value in bits.generate(vec![Value::from(2)])? {
//!     println!("{}", value?);
//! }
//! # Ok::<(), atlas_engine::AtlasError>(())
//! ```

mod builtins;
pub mod compiler;
pub mod config;
mod error;
mod generator;
pub mod hook;
mod interp;
pub mod model;
mod module;
mod namespace;
pub mod operators;
mod registry;
pub mod strategy;
pub mod tracer;

pub use atlas_core::Value;

pub use compiler::{compile_func, CompileRequest, GENERATOR_DECORATOR};
pub use config::{GeneratorConfig, StrategyConfig};
pub use error::{AtlasError, AtlasResult};
pub use generator::{
    Enumeration, FunctionSource, Generator, GeneratorBuilder, GeneratorInfo, RunOutcome,
    TraceEnumeration, WeakGenerator,
};
pub use hook::{compile_op, hook_handle, same_hook, shared_hook, Hook, HookHandle, OpEvent};
pub use interp::CompiledFunction;
pub use model::{FrequencyModel, OpModel, OpQuery};
pub use module::Module;
pub use namespace::{Binding, CallArgs, Namespace, NativeFn, RunResult, Signal};
pub use operators::Operator;
pub use registry::Registry;
pub use strategy::{
    CallSite, CandidateFn, DfsStrategy, GreedyStrategy, OpKind, OpTable, ProcessedOp,
    RandomizedStrategy, ReplayStrategy, ResolvedOp, Strategy, StrategyHandle,
};
pub use tracer::{DefaultTracer, GeneratorTrace, OpRecord};

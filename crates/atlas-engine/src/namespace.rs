//! Execution namespaces: the table of names a compiled generator can see.
//!
//! A compiled function never looks names up dynamically in some ambient
//! scope; everything it can call is bound here before the body runs. The
//! rewritten operator call sites are bound the same way, which is what makes
//! the namespace the callback table that redirects choice points to the
//! active strategy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use atlas_core::{FnDef, Value};
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::generator::{Generator, WeakGenerator};

/// Arguments of a single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    /// Add a keyword argument (builder pattern).
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Positional argument `index`, falling back to keyword `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(args: Vec<Value>) -> Self {
        CallArgs::new(args)
    }
}

impl From<()> for CallArgs {
    fn from(_: ()) -> Self {
        CallArgs::default()
    }
}

/// Why a run stopped before producing a value.
#[derive(Debug)]
pub enum Signal {
    /// The run asked to be skipped (`skip;`, an empty operator domain, or a
    /// native function returning [`Signal::Skip`]).
    Skip,
    /// A genuine error.
    Fail(AtlasError),
}

impl Signal {
    /// Convert to an error for callers outside an enumeration loop.
    pub fn into_error(self, generator: &str) -> AtlasError {
        match self {
            Signal::Skip => AtlasError::RunSkipped {
                generator: generator.to_string(),
            },
            Signal::Fail(err) => err,
        }
    }
}

impl From<AtlasError> for Signal {
    fn from(err: AtlasError) -> Self {
        Signal::Fail(err)
    }
}

/// Result of evaluating generator code.
pub type RunResult<T> = Result<T, Signal>;

/// A callable implemented in Rust: builtins, user natives and compiled operators.
pub type NativeFn = Rc<dyn Fn(&CallArgs) -> RunResult<Value>>;

/// What a name is bound to.
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    Native(NativeFn),
    /// A helper function executed by the evaluator, in the caller's namespace.
    Function(Rc<FnDef>),
    /// Another generator, invoked through its direct-call form.
    Generator(WeakGenerator),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Binding::Native(_) => f.write_str("Native(..)"),
            Binding::Function(def) => f.debug_tuple("Function").field(&def.name).finish(),
            Binding::Generator(g) => f.debug_tuple("Generator").field(&g.label()).finish(),
        }
    }
}

/// Name → binding table.
#[derive(Clone, Default)]
pub struct Namespace {
    bindings: HashMap<String, Binding>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a constant (builder pattern).
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, Binding::Value(value.into()));
        self
    }

    /// Bind a Rust function (builder pattern).
    pub fn with_native<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CallArgs) -> RunResult<Value> + 'static,
    {
        self.insert(name, Binding::Native(Rc::new(f)));
        self
    }

    /// Bind a helper function under its own name (builder pattern).
    pub fn with_function(mut self, def: FnDef) -> Self {
        let name = def.name.clone();
        self.insert(name, Binding::Function(Rc::new(def)));
        self
    }

    /// Bind another generator (builder pattern). Only a weak reference is
    /// kept, so generators may refer to each other.
    pub fn with_generator(mut self, name: impl Into<String>, generator: &Generator) -> Self {
        self.insert(name, Binding::Generator(generator.downgrade()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(name.into(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("names", &self.names())
            .finish()
    }
}

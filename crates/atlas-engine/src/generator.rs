//! Generators: user-facing handles over a function with choice points.
//!
//! A [`Generator`] owns the function's source text, its strategy, hooks and
//! globals, and caches the compiled form. Any change to strategy, hooks or
//! globals drops the cache; the next use recompiles.
//!
//! Three ways to run one:
//! - [`Generator::call`]: one run under the strategy's first/best policy.
//! - [`Generator::generate`]: a lazy [`Enumeration`] over every value the
//!   strategy explores.
//! - [`Generator::trace`]: like `generate`, paired with each run's trace.
//!
//! Handles are `Rc`-based and not `Send`. No borrow of a generator, its
//! strategy or its hooks is held while generator code runs, so generators
//! may call each other (and themselves) freely.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use atlas_core::{parse_function, Value};
use tracing::{debug, info, warn};

use crate::compiler::{compile_func, CompileRequest, GENERATOR_DECORATOR};
use crate::config::GeneratorConfig;
use crate::error::{AtlasError, AtlasResult};
use crate::hook::{each_hook, same_hook, HookHandle};
use crate::interp::CompiledFunction;
use crate::model::OpModel;
use crate::namespace::{Binding, CallArgs, Namespace, RunResult, Signal};
use crate::registry::Registry;
use crate::strategy::{ReplayStrategy, SessionCount, StrategyHandle};
use crate::tracer::{DefaultTracer, GeneratorTrace};

/// Identity of a generator as seen by strategies and hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInfo {
    pub fn_name: String,
    pub name: Option<String>,
    pub group: Option<String>,
}

impl GeneratorInfo {
    pub fn new(fn_name: impl Into<String>) -> Self {
        Self {
            fn_name: fn_name.into(),
            name: None,
            group: None,
        }
    }

    /// Registered name, or the function name.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.fn_name)
    }
}

/// Source text of one function and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSource {
    pub file: String,
    pub text: String,
    /// Line of `text`'s first line within `file` (1-based).
    pub start_line: u32,
}

impl FunctionSource {
    pub fn new(file: impl Into<String>, text: impl Into<String>, start_line: u32) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
            start_line,
        }
    }
}

/// Outcome of a single run.
#[derive(Debug)]
pub enum RunOutcome {
    Produced(Value),
    Skipped,
    Failed(AtlasError),
}

struct GeneratorInner {
    source: FunctionSource,
    info: GeneratorInfo,
    metadata: serde_json::Map<String, serde_json::Value>,
    strategy: StrategyHandle,
    hooks: Vec<HookHandle>,
    globals: Namespace,
    registry: Registry,
    compiled: Option<Rc<CompiledFunction>>,
}

impl GeneratorInner {
    fn invalidate(&mut self) {
        if self.compiled.take().is_some() {
            debug!(generator = %self.info.label(), "compiled_invalidated");
        }
    }
}

/// Handle to a generator. Clones refer to the same generator.
#[derive(Clone)]
pub struct Generator {
    inner: Rc<RefCell<GeneratorInner>>,
}

/// Non-owning reference to a generator, as held by namespaces and registries.
#[derive(Clone)]
pub struct WeakGenerator {
    inner: Weak<RefCell<GeneratorInner>>,
    label: String,
}

impl WeakGenerator {
    pub fn upgrade(&self) -> Option<Generator> {
        self.inner.upgrade().map(|inner| Generator { inner })
    }

    /// Label of the generator at the time the reference was taken.
    pub fn label(&self) -> String {
        self.label.clone()
    }

    pub fn points_to(&self, generator: &Generator) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&generator.inner))
    }
}

/// Builder for [`Generator`]. Explicit settings take precedence over the
/// arguments of the function's `@generator` decorator.
pub struct GeneratorBuilder {
    source: FunctionSource,
    config: GeneratorConfig,
    strategy: Option<StrategyHandle>,
    hooks: Vec<HookHandle>,
    globals: Namespace,
    registry: Option<Registry>,
}

impl GeneratorBuilder {
    /// Registry to register the generator (and its group) in.
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    pub fn strategy(mut self, strategy: StrategyHandle) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = Some(group.into());
        self
    }

    /// Apply a loaded configuration; set fields override earlier ones.
    pub fn config(mut self, config: GeneratorConfig) -> Self {
        let GeneratorConfig {
            strategy,
            name,
            group,
            metadata,
        } = config;
        self.config.strategy = strategy.or(self.config.strategy.take());
        self.config.name = name.or(self.config.name.take());
        self.config.group = group.or(self.config.group.take());
        self.config.metadata.extend(metadata);
        self
    }

    pub fn hook(mut self, hook: HookHandle) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn globals(mut self, globals: Namespace) -> Self {
        self.globals = globals;
        self
    }

    pub fn build(self) -> AtlasResult<Generator> {
        let GeneratorBuilder {
            source,
            config: explicit,
            strategy,
            hooks,
            globals,
            registry,
        } = self;

        let def = parse_function(&source.file, &source.text)?;
        let mut config = match def
            .decorators
            .iter()
            .find(|d| d.base_name() == GENERATOR_DECORATOR)
        {
            Some(decorator) => {
                let mut decorator = decorator.clone();
                decorator.span.line += source.start_line.saturating_sub(1);
                GeneratorConfig::from_decorator(&decorator, &source.file)?
            }
            None => GeneratorConfig::default(),
        };
        config.strategy = explicit.strategy.or(config.strategy);
        config.name = explicit.name.or(config.name);
        config.group = explicit.group.or(config.group);
        config.metadata.extend(explicit.metadata);

        let registry = registry.unwrap_or_default();
        let group_strategy = config
            .group
            .as_deref()
            .and_then(|group| registry.group(group).into_iter().next())
            .map(|member| member.strategy());
        let strategy = match (group_strategy, strategy) {
            (Some(shared), _) => shared,
            (None, Some(explicit)) => explicit,
            (None, None) => match &config.strategy {
                Some(strategy) => strategy.build()?,
                None => StrategyHandle::named("dfs")?,
            },
        };

        let info = GeneratorInfo {
            fn_name: def.name.clone(),
            name: config.name.clone(),
            group: config.group.clone(),
        };
        let generator = Generator {
            inner: Rc::new(RefCell::new(GeneratorInner {
                source,
                info: info.clone(),
                metadata: config.metadata,
                strategy: strategy.clone(),
                hooks,
                globals,
                registry: registry.clone(),
                compiled: None,
            })),
        };
        if let Some(name) = &info.name {
            registry.register_generator(name.clone(), &generator);
        }
        if let Some(group) = &info.group {
            registry.register_group(group.clone(), &generator);
        }
        info!(
            generator = %info.label(),
            group = ?info.group,
            strategy = %strategy.name(),
            "generator_created"
        );
        Ok(generator)
    }
}

impl Generator {
    pub fn builder(file: impl Into<String>, text: impl Into<String>) -> GeneratorBuilder {
        Self::builder_from(FunctionSource::new(file, text, 1))
    }

    pub fn builder_from(source: FunctionSource) -> GeneratorBuilder {
        GeneratorBuilder {
            source,
            config: GeneratorConfig::default(),
            strategy: None,
            hooks: Vec::new(),
            globals: Namespace::new(),
            registry: None,
        }
    }

    /// A generator configured by its own decorator, in a private registry.
    pub fn from_source(file: impl Into<String>, text: impl Into<String>) -> AtlasResult<Self> {
        Self::builder(file, text).build()
    }

    pub fn downgrade(&self) -> WeakGenerator {
        WeakGenerator {
            inner: Rc::downgrade(&self.inner),
            label: self.name(),
        }
    }

    pub fn ptr_eq(&self, other: &Generator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self) -> GeneratorInfo {
        self.inner.borrow().info.clone()
    }

    /// Registered name, or the function name.
    pub fn name(&self) -> String {
        self.inner.borrow().info.label().to_string()
    }

    pub fn fn_name(&self) -> String {
        self.inner.borrow().info.fn_name.clone()
    }

    pub fn group(&self) -> Option<String> {
        self.inner.borrow().info.group.clone()
    }

    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        self.inner.borrow().metadata.clone()
    }

    pub fn strategy(&self) -> StrategyHandle {
        self.inner.borrow().strategy.clone()
    }

    pub fn hooks(&self) -> Vec<HookHandle> {
        self.inner.borrow().hooks.clone()
    }

    pub fn registry(&self) -> Registry {
        self.inner.borrow().registry.clone()
    }

    pub fn is_compiled(&self) -> bool {
        self.inner.borrow().compiled.is_some()
    }

    /// The compiled function, compiling it first if needed.
    pub fn compiled(&self) -> AtlasResult<Rc<CompiledFunction>> {
        if let Some(compiled) = &self.inner.borrow().compiled {
            return Ok(compiled.clone());
        }
        let (source, info, strategy, hooks, globals, registry) = {
            let inner = self.inner.borrow();
            (
                inner.source.clone(),
                inner.info.clone(),
                inner.strategy.clone(),
                inner.hooks.clone(),
                inner.globals.clone(),
                inner.registry.clone(),
            )
        };
        let compiled = Rc::new(compile_func(CompileRequest {
            source: &source,
            info: &info,
            strategy: &strategy,
            hooks: &hooks,
            globals: &globals,
            registry: &registry,
        })?);
        self.inner.borrow_mut().compiled = Some(compiled.clone());
        Ok(compiled)
    }

    /// Members of this generator's group, or just itself.
    fn targets(&self, as_group: bool) -> Vec<Generator> {
        let (group, registry) = {
            let inner = self.inner.borrow();
            (inner.info.group.clone(), inner.registry.clone())
        };
        let mut targets = vec![self.clone()];
        if let (true, Some(group)) = (as_group, group) {
            for member in registry.group(&group) {
                if !member.ptr_eq(self) {
                    targets.push(member);
                }
            }
        }
        targets
    }

    /// Replace the strategy. With `as_group`, every member of the group
    /// switches to the same instance.
    pub fn set_strategy(&self, strategy: StrategyHandle, as_group: bool) {
        for target in self.targets(as_group) {
            let mut inner = target.inner.borrow_mut();
            inner.strategy = strategy.clone();
            inner.invalidate();
        }
        debug!(generator = %self.name(), strategy = %strategy.name(), as_group, "strategy_set");
    }

    /// Replace the strategy with one of the named strategies.
    pub fn set_strategy_name(&self, name: &str, as_group: bool) -> AtlasResult<()> {
        self.set_strategy(StrategyHandle::named(name)?, as_group);
        Ok(())
    }

    /// Append hooks, keeping registration order.
    pub fn register_hooks(&self, hooks: &[HookHandle], as_group: bool) {
        for target in self.targets(as_group) {
            let mut inner = target.inner.borrow_mut();
            inner.hooks.extend(hooks.iter().cloned());
            inner.invalidate();
        }
    }

    /// Remove the first registration of a hook. Fails if this generator does
    /// not have it; group members without it are left alone.
    pub fn deregister_hook(&self, hook: &HookHandle, as_group: bool) -> AtlasResult<()> {
        if !self.inner.borrow().hooks.iter().any(|h| same_hook(h, hook)) {
            return Err(AtlasError::HookNotRegistered {
                generator: self.name(),
            });
        }
        for target in self.targets(as_group) {
            let mut inner = target.inner.borrow_mut();
            if let Some(i) = inner.hooks.iter().position(|h| same_hook(h, hook)) {
                inner.hooks.remove(i);
                inner.invalidate();
            }
        }
        Ok(())
    }

    /// Bind a name visible to the generator body.
    pub fn set_global(&self, name: impl Into<String>, binding: Binding, as_group: bool) {
        let name = name.into();
        for target in self.targets(as_group) {
            let mut inner = target.inner.borrow_mut();
            inner.globals.insert(name.clone(), binding.clone());
            inner.invalidate();
        }
    }

    /// Run once. A skipped run is reported as [`AtlasError::RunSkipped`].
    pub fn call(&self, args: impl Into<CallArgs>) -> AtlasResult<Value> {
        self.call_signal(&args.into())
            .map_err(|signal| signal.into_error(&self.name()))
    }

    /// Run once, keeping a skip as a signal. Called from inside a running
    /// body of the same strategy (recursion, a group member), the run takes
    /// part in that search. Otherwise it is bracketed by a full strategy and
    /// hook lifecycle; an open enumeration's position is set aside meanwhile.
    pub(crate) fn call_signal(&self, args: &CallArgs) -> RunResult<Value> {
        let compiled = self.compiled()?;
        let strategy = self.strategy();
        if strategy.is_running() {
            return compiled.invoke(args);
        }
        let _suspended = match strategy.in_session() {
            true => Some(strategy.suspend()?),
            false => None,
        };
        let session = Session::open(self, compiled, args)?;
        let outcome = session.run(args);
        drop(session);
        match outcome {
            RunOutcome::Produced(value) => Ok(value),
            RunOutcome::Skipped => Err(Signal::Skip),
            RunOutcome::Failed(err) => Err(Signal::Fail(err)),
        }
    }

    /// Enumerate every value the strategy explores, lazily.
    pub fn generate(&self, args: impl Into<CallArgs>) -> AtlasResult<Enumeration> {
        let args = args.into();
        let compiled = self.compiled()?;
        let session = Session::open(self, compiled, &args)?;
        info!(generator = %self.name(), strategy = %session.strategy.name(), "enumeration_start");
        Ok(Enumeration {
            session,
            args,
            done: false,
            produced: 0,
            skipped: 0,
        })
    }

    /// Enumerate like [`Generator::generate`], pairing each value with the
    /// trace of its run. A tracer is registered on the whole group for the
    /// lifetime of the returned iterator.
    pub fn trace(&self, args: impl Into<CallArgs>) -> AtlasResult<TraceEnumeration> {
        let tracer = Rc::new(RefCell::new(DefaultTracer::new()));
        let handle: HookHandle = tracer.clone();
        self.register_hooks(std::slice::from_ref(&handle), true);
        let guard = TracerGuard {
            generator: self.clone(),
            hook: handle,
        };
        let inner = self.generate(args)?;
        Ok(TraceEnumeration {
            inner,
            tracer,
            _guard: guard,
        })
    }

    /// Re-run with the choices recorded in `trace`.
    ///
    /// The generator and its group run under a [`ReplayStrategy`] for the
    /// duration, so recursive and group-member calls consume the trace too.
    /// Strategies and compiled forms are restored afterwards. Hooks observe
    /// the replayed run.
    pub fn replay(&self, trace: &GeneratorTrace) -> AtlasResult<Value> {
        let replay = StrategyHandle::new(ReplayStrategy::new(trace.clone()));
        let _restore = StrategyRestore::install(self.targets(true), &replay);
        let compiled = self.compiled()?;
        let session = Session::open(self, compiled, &trace.inputs)?;
        let outcome = session.run(&trace.inputs);
        drop(session);
        debug!(generator = %self.name(), records = trace.records.len(), "trace_replayed");
        match outcome {
            RunOutcome::Produced(value) => Ok(value),
            RunOutcome::Skipped => Err(AtlasError::RunSkipped {
                generator: self.name(),
            }),
            RunOutcome::Failed(err) => Err(err),
        }
    }

    /// Hand recorded traces to a model.
    pub fn train(&self, data: &[GeneratorTrace], model: &mut dyn OpModel) -> AtlasResult<()> {
        info!(generator = %self.name(), traces = data.len(), "training_start");
        model.train(data)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Generator")
            .field("name", &inner.info.label())
            .field("group", &inner.info.group)
            .field("strategy", &inner.strategy)
            .field("hooks", &inner.hooks.len())
            .field("compiled", &inner.compiled.is_some())
            .finish()
    }
}

impl fmt::Debug for WeakGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakGenerator").field(&self.label).finish()
    }
}

/// An open strategy lifecycle: `init` on open, `finish` on drop.
struct Session {
    info: GeneratorInfo,
    strategy: StrategyHandle,
    hooks: Vec<HookHandle>,
    compiled: Rc<CompiledFunction>,
    _count: SessionCount,
}

impl Session {
    fn open(generator: &Generator, compiled: Rc<CompiledFunction>, args: &CallArgs) -> AtlasResult<Self> {
        let info = generator.info();
        let strategy = generator.strategy();
        let hooks = generator.hooks();
        strategy.init()?;
        let count = strategy.enter_session();
        if let Err(err) = each_hook(&hooks, |hook| hook.init(&info, args)) {
            if let Err(finish_err) = strategy.finish() {
                warn!(generator = %info.label(), error = %finish_err, "strategy_finish_failed");
            }
            return Err(err);
        }
        Ok(Self {
            info,
            strategy,
            hooks,
            compiled,
            _count: count,
        })
    }

    fn run(&self, args: &CallArgs) -> RunOutcome {
        let started = self
            .strategy
            .init_run()
            .and_then(|_| each_hook(&self.hooks, |hook| hook.init_run(&self.info, args)));
        let outcome = match started {
            Err(err) => RunOutcome::Failed(err),
            Ok(()) => {
                let _running = self.strategy.enter_run();
                match self.compiled.invoke(args) {
                    Ok(value) => RunOutcome::Produced(value),
                    Err(Signal::Skip) => RunOutcome::Skipped,
                    Err(Signal::Fail(err)) => RunOutcome::Failed(err),
                }
            }
        };
        let finished = self
            .strategy
            .finish_run()
            .and_then(|_| each_hook(&self.hooks, |hook| hook.finish_run(&self.info)));
        match (outcome, finished) {
            (RunOutcome::Failed(err), _) | (_, Err(err)) => RunOutcome::Failed(err),
            (outcome, Ok(())) => outcome,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.strategy.finish() {
            warn!(generator = %self.info.label(), error = %err, "strategy_finish_failed");
        }
        if let Err(err) = each_hook(&self.hooks, |hook| hook.finish(&self.info)) {
            warn!(generator = %self.info.label(), error = %err, "hook_finish_failed");
        }
    }
}

/// Lazy sequence of the values of a generator's runs.
///
/// Skipped runs are omitted. A failed run yields its error once and ends
/// the sequence. Dropping the enumeration finishes the strategy and hooks.
pub struct Enumeration {
    session: Session,
    args: CallArgs,
    done: bool,
    produced: usize,
    skipped: usize,
}

impl Enumeration {
    /// Values produced so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Runs skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Enumeration {
    type Item = AtlasResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.session.strategy.is_finished() {
                self.done = true;
                info!(
                    generator = %self.session.info.label(),
                    produced = self.produced,
                    skipped = self.skipped,
                    "enumeration_complete"
                );
                break;
            }
            match self.session.run(&self.args) {
                RunOutcome::Produced(value) => {
                    self.produced += 1;
                    return Some(Ok(value));
                }
                RunOutcome::Skipped => {
                    self.skipped += 1;
                    debug!(generator = %self.session.info.label(), skipped = self.skipped, "run_skipped");
                }
                RunOutcome::Failed(err) => {
                    self.done = true;
                    warn!(generator = %self.session.info.label(), error = %err, "run_failed");
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

impl fmt::Debug for Enumeration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enumeration")
            .field("generator", &self.session.info.label())
            .field("produced", &self.produced)
            .field("skipped", &self.skipped)
            .field("done", &self.done)
            .finish()
    }
}

/// Points generators at a temporary strategy; puts back their own strategy
/// and compiled form when dropped.
struct StrategyRestore {
    saved: Vec<(Generator, StrategyHandle, Option<Rc<CompiledFunction>>)>,
}

impl StrategyRestore {
    fn install(targets: Vec<Generator>, strategy: &StrategyHandle) -> Self {
        let saved = targets
            .into_iter()
            .map(|target| {
                let (previous, compiled) = {
                    let mut inner = target.inner.borrow_mut();
                    let previous = std::mem::replace(&mut inner.strategy, strategy.clone());
                    (previous, inner.compiled.take())
                };
                (target, previous, compiled)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for StrategyRestore {
    fn drop(&mut self) {
        for (target, strategy, compiled) in self.saved.drain(..) {
            let mut inner = target.inner.borrow_mut();
            inner.strategy = strategy;
            inner.compiled = compiled;
        }
    }
}

/// Removes the tracer from the group when dropped.
struct TracerGuard {
    generator: Generator,
    hook: HookHandle,
}

impl Drop for TracerGuard {
    fn drop(&mut self) {
        if let Err(err) = self.generator.deregister_hook(&self.hook, true) {
            warn!(generator = %self.generator.name(), error = %err, "tracer_deregister_failed");
        }
    }
}

/// [`Enumeration`] paired with the trace of each produced value.
pub struct TraceEnumeration {
    // Declared before the guard: the enumeration finishes before the tracer
    // is removed.
    inner: Enumeration,
    tracer: Rc<RefCell<DefaultTracer>>,
    _guard: TracerGuard,
}

impl Iterator for TraceEnumeration {
    type Item = AtlasResult<(Value, GeneratorTrace)>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = match self.inner.next()? {
            Ok(value) => value,
            Err(err) => return Some(Err(err)),
        };
        let trace = self
            .tracer
            .borrow_mut()
            .take_last_trace()
            .unwrap_or_else(|| GeneratorTrace::new(self.args().clone()));
        Some(Ok((value, trace)))
    }
}

impl TraceEnumeration {
    fn args(&self) -> &CallArgs {
        &self.inner.args
    }
}

//! Integration tests for atlas-engine: whole generators, from source text to
//! enumerated values.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::Result;
use atlas_engine::{
    compile_op, shared_hook, AtlasError, AtlasResult, Binding, CallArgs, CandidateFn,
    FrequencyModel, Generator, GeneratorConfig, GeneratorInfo, GeneratorTrace, GreedyStrategy,
    Hook, HookHandle, Module, Namespace, NativeFn, OpEvent, OpKind, Operator, Registry,
    ResolvedOp, StrategyHandle, Value,
};

// ============================================================================
// Fixtures
// ============================================================================

const BITS: &str = r#"@generator(name="bits")
fn bits(length) {
    let s = "";
    for i in range(length) {
        s += Select(["0", "1"], oid="digit");
    }
    return s;
}"#;

fn strings(values: &[&str]) -> Vec<Value> {
    values.iter().map(|s| Value::from(*s)).collect()
}

fn collect(generator: &Generator, args: Vec<Value>) -> AtlasResult<Vec<Value>> {
    generator.generate(args)?.collect()
}

fn build_in(registry: &Registry, src: &str) -> Generator {
    Generator::builder("<test>", src)
        .registry(registry)
        .build()
        .unwrap()
}

/// Records lifecycle and operator events as `tag:event` strings.
struct EventLog {
    tag: &'static str,
    events: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    fn new(tag: &'static str, events: &Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            tag,
            events: events.clone(),
        }
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(format!("{}:{}", self.tag, event));
    }
}

impl Hook for EventLog {
    fn init(&mut self, _generator: &GeneratorInfo, _args: &CallArgs) -> AtlasResult<()> {
        self.push("init".into());
        Ok(())
    }

    fn init_run(&mut self, _generator: &GeneratorInfo, _args: &CallArgs) -> AtlasResult<()> {
        self.push("init_run".into());
        Ok(())
    }

    fn before_op(&mut self, event: &OpEvent<'_>) -> AtlasResult<()> {
        self.push(format!("before {}", event.sid));
        Ok(())
    }

    fn after_op(&mut self, _event: &OpEvent<'_>, retval: &Value) -> AtlasResult<()> {
        self.push(format!("after {}", retval));
        Ok(())
    }

    fn finish_run(&mut self, _generator: &GeneratorInfo) -> AtlasResult<()> {
        self.push("finish_run".into());
        Ok(())
    }

    fn finish(&mut self, _generator: &GeneratorInfo) -> AtlasResult<()> {
        self.push("finish".into());
        Ok(())
    }
}

// ============================================================================
// Depth-first enumeration
// ============================================================================

#[test]
fn single_select_yields_each_candidate_once() -> Result<()> {
    let g = Generator::from_source("<test>", "@generator\nfn g(n) { return Select(range(n)); }")?;
    let values = collect(&g, vec![Value::from(5)])?;
    assert_eq!(values, (0..5).map(Value::from).collect::<Vec<_>>());
    assert!(g.strategy().is_finished());
    Ok(())
}

#[test]
fn nested_selects_enumerate_in_dfs_order() -> Result<()> {
    let g = Generator::from_source(
        "<test>",
        r#"fn pair() {
    let n = Select([1, 2, 3]);
    let c = Select(["a", "b"]);
    return str(n) + c;
}"#,
    )?;
    let values = collect(&g, vec![])?;
    assert_eq!(values, strings(&["1a", "1b", "2a", "2b", "3a", "3b"]));
    Ok(())
}

#[test]
fn binary_strings() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let values: BTreeSet<String> = collect(&g, vec![Value::from(2)])?
        .iter()
        .map(|v| v.to_string())
        .collect();
    let expected: BTreeSet<String> = ["00", "01", "10", "11"].iter().map(|s| s.to_string()).collect();
    assert_eq!(values, expected);
    assert_eq!(g.call(vec![Value::from(2)])?, Value::from("00"));
    Ok(())
}

#[test]
fn function_without_choices_runs_once() -> Result<()> {
    let g = Generator::from_source("<test>", "fn one() { return 42; }")?;
    assert_eq!(collect(&g, vec![])?, vec![Value::from(42)]);
    Ok(())
}

#[test]
fn collection_operators_enumerate_their_candidates() -> Result<()> {
    let g = Generator::from_source(
        "<test>",
        r#"fn ops(kind) {
    if kind == "subset" { return Subset([1, 2, 3], lengths=2); }
    if kind == "ordered" { return OrderedSubset([1, 2, 3], lengths=2); }
    if kind == "product" { return Product([[1, 2], ["a", "b", "c"]]); }
    return Sequence(["x", "y"], max_len=2);
}"#,
    )?;
    let count = |kind: &str| collect(&g, vec![Value::from(kind)]).map(|v| v.len());
    assert_eq!(count("subset")?, 3);
    assert_eq!(count("ordered")?, 6);
    assert_eq!(count("product")?, 6);
    // lengths 1 and 2: 2 + 4
    assert_eq!(count("sequence")?, 6);
    Ok(())
}

// ============================================================================
// Skips and failures
// ============================================================================

#[test]
fn skipped_runs_are_omitted() -> Result<()> {
    let g = Generator::from_source(
        "<test>",
        r#"fn odd() {
    let x = Select([1, 2, 3, 4, 5]);
    if x % 2 == 0 { skip; }
    return x;
}"#,
    )?;
    let mut values = g.generate(vec![])?;
    let produced: Vec<Value> = values.by_ref().collect::<AtlasResult<_>>()?;
    assert_eq!(produced, vec![Value::from(1), Value::from(3), Value::from(5)]);
    assert_eq!(values.skipped(), 2);
    assert_eq!(values.produced(), 3);
    Ok(())
}

#[test]
fn empty_domain_skips_the_run() -> Result<()> {
    let g = Generator::from_source(
        "<test>",
        r#"fn g() {
    let n = Select([0, 1, 2]);
    let xs = Select(range(n));
    return xs;
}"#,
    )?;
    assert_eq!(collect(&g, vec![])?, vec![Value::from(0), Value::from(0), Value::from(1)]);
    Ok(())
}

#[test]
fn direct_call_reports_skip() -> Result<()> {
    let g = Generator::from_source("<test>", "fn g() { return Select([]); }")?;
    assert!(matches!(g.call(()), Err(AtlasError::RunSkipped { .. })));
    Ok(())
}

#[test]
fn failure_is_yielded_once_and_ends_enumeration() -> Result<()> {
    let g = Generator::from_source(
        "<test>",
        r#"fn g() {
    let x = Select([1, 0, 2]);
    return 10 / x + missing;
}"#,
    )?;
    let mut values = g.generate(vec![])?;
    assert!(matches!(
        values.next(),
        Some(Err(AtlasError::NameNotFound { ref name, .. })) if name == "missing"
    ));
    assert!(values.next().is_none());
    Ok(())
}

#[test]
fn wrong_argument_count_is_an_error() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    assert!(matches!(
        g.call(vec![Value::from(1), Value::from(2)]),
        Err(AtlasError::InvalidArguments { .. })
    ));
    Ok(())
}

#[test]
fn non_literal_oid_fails_at_compile_time() {
    let g = Generator::from_source(
        "gen.atlas",
        "fn g(k) {\n    return Select([1, 2], oid=k);\n}",
    )
    .unwrap();
    match g.generate(vec![Value::from("a")]) {
        Err(AtlasError::InvalidOid { call, line, .. }) => {
            assert_eq!(call, "Select([1, 2], oid=k)");
            assert_eq!(line, 2);
        }
        other => panic!("expected InvalidOid, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_strategy_in_decorator() {
    let err = Generator::from_source("<test>", "@generator(strategy=\"bfs\")\nfn g() { return 1; }")
        .unwrap_err();
    assert!(matches!(err, AtlasError::UnknownStrategy(ref s) if s == "bfs"));
}

// ============================================================================
// Tracing and replay
// ============================================================================

#[test]
fn trace_replay_reproduces_outputs() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let runs: Vec<(Value, GeneratorTrace)> = g.trace(vec![Value::from(3)])?.collect::<AtlasResult<_>>()?;
    assert_eq!(runs.len(), 8);
    for (value, trace) in &runs {
        assert_eq!(trace.records.len(), 3);
        assert!(trace.records.iter().all(|r| r.sid == "bits/Select@digit"));
        let positions: Vec<usize> = trace.records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(&g.replay(trace)?, value);
    }
    assert!(g.hooks().is_empty());
    Ok(())
}

#[test]
fn trace_survives_json() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let (value, trace) = g
        .trace(vec![Value::from(2)])?
        .nth(2)
        .ok_or_else(|| anyhow::anyhow!("missing run"))??;
    let restored = GeneratorTrace::from_json(&trace.to_json()?)?;
    assert_eq!(restored, trace);
    assert_eq!(g.replay(&restored)?, value);
    Ok(())
}

#[test]
fn replay_detects_divergence() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let (_, trace) = g
        .trace(vec![Value::from(1)])?
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing run"))??;
    let other = Generator::from_source(
        "<test>",
        "@generator(name=\"bits\")\nfn bits(length) { return Subset([\"0\", \"1\"]); }",
    )?;
    assert!(matches!(other.replay(&trace), Err(AtlasError::TraceMismatch { .. })));
    Ok(())
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn zero_hooks_keep_the_raw_callable() {
    let op = ResolvedOp {
        op_name: "Select".into(),
        sid: "g/Select#0".into(),
        oid: None,
        kind: OpKind::Builtin(Operator::Select),
    };
    let raw: NativeFn = Rc::new(|_: &CallArgs| Ok(Value::from(1)));
    let info = Rc::new(GeneratorInfo::new("g"));

    let unwrapped = compile_op(info.clone(), &op, raw.clone(), &[]);
    assert!(Rc::ptr_eq(&unwrapped, &raw));

    let events = Rc::new(RefCell::new(Vec::new()));
    let (_, hook) = shared_hook(EventLog::new("h", &events));
    let wrapped = compile_op(info, &op, raw.clone(), &[hook]);
    assert!(!Rc::ptr_eq(&wrapped, &raw));
    assert_eq!(wrapped(&CallArgs::default()).unwrap(), Value::from(1));
    assert_eq!(*events.borrow(), vec!["h:before g/Select#0", "h:after 1"]);
}

#[test]
fn hooks_run_in_registration_order() -> Result<()> {
    let g = Generator::from_source("<test>", "fn g() { return Select([7]); }")?;
    let events = Rc::new(RefCell::new(Vec::new()));
    let (_, first) = shared_hook(EventLog::new("a", &events));
    let (_, second) = shared_hook(EventLog::new("b", &events));
    g.register_hooks(&[first, second], true);

    assert_eq!(collect(&g, vec![])?, vec![Value::from(7)]);
    let expected = [
        "a:init",
        "b:init",
        "a:init_run",
        "b:init_run",
        "a:before g/Select#0",
        "b:before g/Select#0",
        "a:after 7",
        "b:after 7",
        "a:finish_run",
        "b:finish_run",
        "a:finish",
        "b:finish",
    ];
    assert_eq!(*events.borrow(), expected);
    Ok(())
}

#[test]
fn dropping_enumeration_early_finishes_hooks() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let events = Rc::new(RefCell::new(Vec::new()));
    let (_, hook) = shared_hook(EventLog::new("h", &events));
    g.register_hooks(std::slice::from_ref(&hook), false);
    {
        let mut values = g.generate(vec![Value::from(4)])?;
        assert_eq!(values.next().transpose()?, Some(Value::from("0000")));
    }
    assert_eq!(events.borrow().last().map(String::as_str), Some("h:finish"));
    assert!(!g.strategy().in_session());

    g.deregister_hook(&hook, false)?;
    assert!(matches!(
        g.deregister_hook(&hook, false),
        Err(AtlasError::HookNotRegistered { .. })
    ));
    Ok(())
}

#[test]
fn failing_hook_aborts_the_run() -> Result<()> {
    struct Refuse;
    impl Hook for Refuse {
        fn before_op(&mut self, event: &OpEvent<'_>) -> AtlasResult<()> {
            Err(AtlasError::Hook(format!("refused {}", event.sid)))
        }
    }
    let g = Generator::from_source("<test>", "fn g() { return Select([1, 2]); }")?;
    let (_, hook) = shared_hook(Refuse);
    g.register_hooks(&[hook], false);
    assert!(matches!(g.call(()), Err(AtlasError::Hook(_))));
    Ok(())
}

// ============================================================================
// Strategies
// ============================================================================

#[test]
fn strategy_change_forces_recompilation() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    g.compiled()?;
    assert!(g.is_compiled());

    g.set_strategy(StrategyHandle::new(atlas_engine::RandomizedStrategy::with_seed(9)), true);
    assert!(!g.is_compiled());
    assert_eq!(g.strategy().name(), "randomized");

    let samples = g
        .generate(vec![Value::from(2)])?
        .take(20)
        .collect::<AtlasResult<Vec<_>>>()?;
    assert_eq!(samples.len(), 20);
    assert!(samples
        .iter()
        .all(|s| strings(&["00", "01", "10", "11"]).contains(s)));
    assert!(g.is_compiled());
    Ok(())
}

#[test]
fn seeded_randomized_runs_are_reproducible() -> Result<()> {
    let config = GeneratorConfig::from_toml_str("strategy = { kind = \"randomized\", seed = 42 }")?;
    let sample = || -> Result<Vec<Value>> {
        let g = Generator::builder("bits.atlas", BITS)
            .config(config.clone())
            .build()?;
        assert_eq!(g.strategy().name(), "randomized");
        Ok(g.generate(vec![Value::from(3)])?.take(10).collect::<AtlasResult<_>>()?)
    };
    assert_eq!(sample()?, sample()?);
    Ok(())
}

#[test]
fn greedy_follows_trained_model() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let favourite: Vec<GeneratorTrace> = g
        .trace(vec![Value::from(2)])?
        .filter_map(|run| run.ok())
        .filter(|(value, _)| *value == Value::from("11"))
        .map(|(_, trace)| trace)
        .collect();
    let mut model = FrequencyModel::new();
    g.train(&favourite, &mut model)?;
    assert_eq!(model.count("bits/Select@digit", &Value::from("1")), 2);

    g.set_strategy(StrategyHandle::new(GreedyStrategy::new(model)), false);
    assert_eq!(g.call(vec![Value::from(2)])?, Value::from("11"));
    let all = collect(&g, vec![Value::from(2)])?;
    assert_eq!(all.len(), 4);
    assert_eq!(all[0], Value::from("11"));
    Ok(())
}

#[test]
fn override_replaces_operator_candidates() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let provider: CandidateFn = Rc::new(|_: &CallArgs| Ok(vec![Value::from("x"), Value::from("y")]));
    g.strategy()
        .with_mut(|s| s.register_override("Select", "digit", provider))?;
    assert_eq!(
        collect(&g, vec![Value::from(1)])?,
        strings(&["x", "y"])
    );
    Ok(())
}

// ============================================================================
// Groups, registry and recursion
// ============================================================================

const GROUPED_A: &str = r#"@generator(name="a", group="g")
fn a() {
    return str(Select([1, 2])) + b();
}"#;

const GROUPED_B: &str = r#"@generator(name="b", group="g")
fn b() {
    return Select(["x", "y"]);
}"#;

#[test]
fn grouped_generators_share_one_search() -> Result<()> {
    let registry = Registry::new();
    let a = build_in(&registry, GROUPED_A);
    let b = build_in(&registry, GROUPED_B);
    assert!(a.strategy().ptr_eq(&b.strategy()));
    assert_eq!(
        collect(&a, vec![])?,
        strings(&["1x", "1y", "2x", "2y"])
    );
    // Outside an enumeration the callee brackets its own run.
    assert_eq!(b.call(())?, Value::from("x"));
    Ok(())
}

#[test]
fn ungrouped_callee_keeps_its_own_strategy() -> Result<()> {
    let registry = Registry::new();
    let a = build_in(&registry, GROUPED_A);
    let b = build_in(&registry, &GROUPED_B.replace(", group=\"g\"", ""));
    assert!(!a.strategy().ptr_eq(&b.strategy()));
    assert_eq!(collect(&a, vec![])?, strings(&["1x", "2x"]));
    Ok(())
}

#[test]
fn group_propagation_on_and_off() -> Result<()> {
    let registry = Registry::new();
    let a = build_in(&registry, GROUPED_A);
    let b = build_in(&registry, GROUPED_B);
    a.compiled()?;
    b.compiled()?;

    a.set_strategy_name("randomized", false)?;
    assert_eq!(a.strategy().name(), "randomized");
    assert_eq!(b.strategy().name(), "dfs");
    assert!(b.is_compiled());

    let shared = StrategyHandle::named("dfs")?;
    a.set_strategy(shared.clone(), true);
    assert!(a.strategy().ptr_eq(&shared));
    assert!(b.strategy().ptr_eq(&shared));
    assert!(!b.is_compiled());

    let events = Rc::new(RefCell::new(Vec::new()));
    let (_, hook) = shared_hook(EventLog::new("h", &events));
    b.register_hooks(std::slice::from_ref(&hook), true);
    assert_eq!(a.hooks().len(), 1);
    a.deregister_hook(&hook, false)?;
    assert!(a.hooks().is_empty());
    assert_eq!(b.hooks().len(), 1);
    Ok(())
}

#[test]
fn set_global_is_visible_to_the_body() -> Result<()> {
    let g = Generator::from_source("<test>", "fn g() { return Select(colors); }")?;
    g.set_global("colors", Binding::Value(Value::from(vec!["red", "blue"])), false);
    assert_eq!(collect(&g, vec![])?, strings(&["red", "blue"]));

    let native = Namespace::new().with_native("shout", |args: &CallArgs| {
        Ok(Value::from(format!("{}!", args.args[0])))
    });
    let h = Generator::builder("<test>", "fn h() { return shout(Select([\"a\"])); }")
        .globals(native)
        .build()?;
    assert_eq!(h.call(())?, Value::from("a!"));
    Ok(())
}

#[test]
fn recursive_generator_participates_in_search() -> Result<()> {
    let registry = Registry::new();
    let chain = build_in(
        &registry,
        r#"@generator(name="chain")
fn chain(n) {
    if n == 0 { return ""; }
    return Select(["a", "b"]) + chain(n - 1);
}"#,
    );
    assert_eq!(
        collect(&chain, vec![Value::from(2)])?,
        strings(&["aa", "ab", "ba", "bb"])
    );
    Ok(())
}

#[test]
fn recursive_generator_replays_every_trace() -> Result<()> {
    let registry = Registry::new();
    let chain = build_in(
        &registry,
        r#"@generator(name="chain")
fn chain(n) {
    if n == 0 { return ""; }
    return Select(["a", "b"]) + chain(n - 1);
}"#,
    );
    let before = chain.strategy();
    let runs: Vec<(Value, GeneratorTrace)> = chain.trace(vec![Value::from(2)])?.collect::<AtlasResult<_>>()?;
    assert_eq!(runs.len(), 4);
    for (value, trace) in &runs {
        assert_eq!(trace.records.len(), 2);
        assert_eq!(&chain.replay(trace)?, value);
    }
    assert!(chain.strategy().ptr_eq(&before));
    assert!(!before.in_session());
    assert_eq!(collect(&chain, vec![Value::from(1)])?, strings(&["a", "b"]));
    Ok(())
}

#[test]
fn group_member_calls_replay_from_the_trace() -> Result<()> {
    let registry = Registry::new();
    let a = build_in(
        &registry,
        r#"@generator(name="a", group="g")
fn a() {
    return str(Select([1, 2])) + b() + str(Select([3, 4]));
}"#,
    );
    let b = build_in(&registry, GROUPED_B);
    let runs: Vec<(Value, GeneratorTrace)> = a.trace(())?.collect::<AtlasResult<_>>()?;
    assert_eq!(runs.len(), 8);
    assert_eq!(runs[0].0, Value::from("1x3"));
    for (value, trace) in &runs {
        let sids: Vec<&str> = trace.records.iter().map(|r| r.sid.as_str()).collect();
        assert_eq!(sids, vec!["a/Select#0", "b/Select#0", "a/Select#1"]);
        assert_eq!(&a.replay(trace)?, value);
    }
    assert!(a.strategy().ptr_eq(&b.strategy()));
    assert_eq!(a.strategy().name(), "dfs");
    assert_eq!(b.call(())?, Value::from("x"));
    Ok(())
}

#[test]
fn direct_call_during_enumeration_starts_fresh() -> Result<()> {
    let g = Generator::from_source("bits.atlas", BITS)?;
    let mut values = g.generate(vec![Value::from(2)])?;
    assert_eq!(values.next().transpose()?, Some(Value::from("00")));
    assert_eq!(g.call(vec![Value::from(2)])?, Value::from("00"));
    assert_eq!(values.next().transpose()?, Some(Value::from("01")));

    let registry = Registry::new();
    let a = build_in(&registry, GROUPED_A);
    let b = build_in(&registry, GROUPED_B);
    let mut joined = a.generate(())?;
    assert_eq!(joined.next().transpose()?, Some(Value::from("1x")));
    assert_eq!(b.call(())?, Value::from("x"));
    let rest: Vec<Value> = joined.collect::<AtlasResult<_>>()?;
    assert_eq!(rest, strings(&["1y", "2x", "2y"]));
    Ok(())
}

#[test]
fn dropped_generator_leaves_registry() {
    let registry = Registry::new();
    let b = build_in(&registry, GROUPED_B);
    assert!(registry.generator("b").is_some());
    drop(b);
    assert!(registry.generator("b").is_none());
    assert!(registry.group("g").is_empty());
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn module_generators_call_helpers_and_each_other() -> Result<()> {
    let source = r#"// two-digit words
fn wrap(s) {
    return "[" + s + "]";
}

@generator(group="words")
fn letter() {
    return Select(["p", "q"]);
}

@generator(group="words", metadata=[["kind", "demo"]])
fn word() {
    return wrap(letter() + letter());
}
"#;
    let registry = Registry::new();
    let module = Module::load("words.atlas", source, Namespace::new(), &registry)?;
    let word = module
        .generator("word")
        .ok_or_else(|| anyhow::anyhow!("word not loaded"))?;
    assert_eq!(word.metadata()["kind"], serde_json::json!("demo"));
    assert_eq!(
        collect(word, vec![])?,
        strings(&["[pp]", "[pq]", "[qp]", "[qq]"])
    );
    Ok(())
}

#[test]
fn module_rejects_bad_decorators() {
    let source = "@generator(\"dfs\")\nfn g() { return 1; }\n";
    let err = Module::load("bad.atlas", source, Namespace::new(), &Registry::new()).unwrap_err();
    assert!(matches!(err, AtlasError::InvalidDecorator { line: 1, .. }), "{}", err);
}

#[test]
fn hook_handles_are_compared_by_identity() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let (_, a): (_, HookHandle) = shared_hook(EventLog::new("a", &events));
    let b = a.clone();
    assert!(atlas_engine::same_hook(&a, &b));
}

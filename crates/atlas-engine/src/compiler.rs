//! The generator compiler: rewrites operator call sites of a function and
//! binds them, together with every free name, in a fresh namespace.
//!
//! ```text
//! source ── parse ── shift lines ── strip @generator
//!        ── rewrite Op(..., oid="x") → __atlas_Op_n(...)   (pre-order)
//!        ── resolve free names: globals → registry → builtins
//!        ── CompiledFunction { body, namespace }
//! ```
//!
//! Matching is lexical: every bare-name call whose callee is a known
//! operator is rewritten, even if a local variable of the same name is in
//! scope at that point.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use atlas_core::visit::{free_names, shift_lines, walk_calls_mut};
use atlas_core::{parse_function, Callee, Expr, Literal};
use tracing::{debug, info};

use crate::builtins;
use crate::error::{AtlasError, AtlasResult};
use crate::generator::{FunctionSource, GeneratorInfo};
use crate::hook::{compile_op, HookHandle};
use crate::interp::CompiledFunction;
use crate::namespace::{Binding, CallArgs, Namespace, NativeFn};
use crate::registry::Registry;
use crate::strategy::{CallSite, StrategyHandle};

/// Name of the registration decorator stripped before compilation.
pub const GENERATOR_DECORATOR: &str = "generator";

/// Everything the compiler needs from a generator.
pub struct CompileRequest<'a> {
    pub source: &'a FunctionSource,
    pub info: &'a GeneratorInfo,
    pub strategy: &'a StrategyHandle,
    pub hooks: &'a [HookHandle],
    pub globals: &'a Namespace,
    pub registry: &'a Registry,
}

/// Compile a generator function.
pub fn compile_func(request: CompileRequest<'_>) -> AtlasResult<CompiledFunction> {
    let CompileRequest {
        source,
        info,
        strategy,
        hooks,
        globals,
        registry,
    } = request;

    let mut def = parse_function(&source.file, &source.text)?;
    shift_lines(&mut def, source.start_line.saturating_sub(1));
    def.decorators
        .retain(|decorator| decorator.base_name() != GENERATOR_DECORATOR);

    let known_ops = strategy.known_ops()?;
    let info_rc = Rc::new(info.clone());
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut ops: Vec<(String, NativeFn)> = Vec::new();

    walk_calls_mut(&mut def, &mut |call, span| {
        let Some(op_name) = call.callee.as_name().map(str::to_string) else {
            return Ok(());
        };
        if !known_ops.contains(&op_name) {
            return Ok(());
        }
        let quoted = call.to_string();
        let oid = match call.take_keyword("oid") {
            None => None,
            Some(kw) => match kw.value.node {
                Expr::Literal(Literal::Str(oid)) => Some(oid),
                _ => {
                    return Err(AtlasError::InvalidOid {
                        call: quoted,
                        file: source.file.clone(),
                        line: span.line,
                    })
                }
            },
        };
        let occurrence = occurrences.entry(op_name.clone()).or_insert(0);
        let site = CallSite {
            op_name,
            oid,
            occurrence: *occurrence,
            index: ops.len(),
            line: span.line,
        };
        *occurrence += 1;

        let processed = strategy.process_op(info, &site)?;
        let raw: NativeFn = {
            let strategy = strategy.clone();
            let op = processed.op.clone();
            Rc::new(move |args: &CallArgs| strategy.invoke(&op, args))
        };
        let callable = compile_op(info_rc.clone(), &processed.op, raw, hooks);
        debug!(
            generator = %info.label(),
            sid = %processed.sid,
            callable = %processed.callable_name,
            line = span.line,
            "op_rewritten"
        );
        call.callee = Callee::Name(processed.callable_name.clone());
        ops.push((processed.callable_name, callable));
        Ok(())
    })?;

    let mut namespace = Namespace::new();
    for (name, callable) in &ops {
        namespace.insert(name.clone(), Binding::Native(callable.clone()));
    }
    let unresolved = resolve_names(&def, &mut namespace, globals, registry);

    info!(
        generator = %info.label(),
        strategy = %strategy.name(),
        ops = ops.len(),
        hooks = hooks.len(),
        "generator_compiled"
    );
    if !unresolved.is_empty() {
        debug!(generator = %info.label(), names = ?unresolved, "names_unresolved");
    }
    Ok(CompiledFunction::new(def, namespace, source.file.clone()))
}

/// Bind the free names of `def` and, transitively, of the helper functions
/// it uses. Returns the names found nowhere; using one at run time fails
/// with a name error.
fn resolve_names(
    def: &atlas_core::FnDef,
    namespace: &mut Namespace,
    globals: &Namespace,
    registry: &Registry,
) -> BTreeSet<String> {
    let mut pending: Vec<String> = free_names(def).into_iter().collect();
    let mut unresolved = BTreeSet::new();
    while let Some(name) = pending.pop() {
        if namespace.contains(&name) || unresolved.contains(&name) {
            continue;
        }
        let binding = if let Some(binding) = globals.get(&name) {
            binding.clone()
        } else if let Some(generator) = registry.generator(&name) {
            Binding::Generator(generator.downgrade())
        } else if let Some(native) = builtins::lookup(&name) {
            Binding::Native(native)
        } else {
            unresolved.insert(name);
            continue;
        };
        if let Binding::Function(helper) = &binding {
            pending.extend(free_names(helper));
        }
        namespace.insert(name, binding);
    }
    unresolved
}

//! Tree-walking evaluator for compiled generator bodies.
//!
//! A [`CompiledFunction`] pairs a rewritten function definition with the
//! namespace it was compiled against. Evaluation never mutates either, so a
//! compiled function can be invoked re-entrantly (a generator calling itself
//! or another member of its group).

use std::cmp::Ordering;
use std::collections::HashMap;

use atlas_core::{AssignOp, BinOp, Call, Callee, Expr, FnDef, Span, Spanned, Stmt, UnaryOp, Value};

use crate::error::AtlasError;
use crate::namespace::{Binding, CallArgs, NativeFn, Namespace, RunResult, Signal};

/// Largest string or list `*` may produce.
const MAX_REPEAT_LEN: usize = 1 << 24;

/// Order two values: numbers (ints and floats mix), strings, booleans and
/// lists (lexicographically). Other combinations are unordered.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) | (Value::Float(_), Value::Float(_)) => {
            a.as_float()?.partial_cmp(&b.as_float()?)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::List(xs), Value::List(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

/// Equality with numeric coercion (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            compare(a, b) == Some(Ordering::Equal)
        }
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

/// Bind call arguments to parameter names.
pub(crate) fn bind_params(def: &FnDef, call: &CallArgs) -> Result<HashMap<String, Value>, AtlasError> {
    if call.args.len() > def.params.len() {
        return Err(AtlasError::invalid_arguments(
            &def.name,
            format!(
                "takes {} positional arguments but {} were given",
                def.params.len(),
                call.args.len()
            ),
        ));
    }
    let mut bound: HashMap<String, Value> = def
        .params
        .iter()
        .cloned()
        .zip(call.args.iter().cloned())
        .collect();
    for (name, value) in &call.kwargs {
        if !def.params.contains(name) {
            return Err(AtlasError::invalid_arguments(
                &def.name,
                format!("unexpected keyword argument `{}`", name),
            ));
        }
        if bound.insert(name.clone(), value.clone()).is_some() {
            return Err(AtlasError::invalid_arguments(
                &def.name,
                format!("multiple values for argument `{}`", name),
            ));
        }
    }
    if let Some(missing) = def.params.iter().find(|p| !bound.contains_key(*p)) {
        return Err(AtlasError::invalid_arguments(
            &def.name,
            format!("missing argument `{}`", missing),
        ));
    }
    Ok(bound)
}

/// A generator function after rewriting, ready to run.
#[derive(Debug)]
pub struct CompiledFunction {
    def: FnDef,
    namespace: Namespace,
    file: String,
}

impl CompiledFunction {
    pub(crate) fn new(def: FnDef, namespace: Namespace, file: impl Into<String>) -> Self {
        Self {
            def,
            namespace,
            file: file.into(),
        }
    }

    /// The rewritten definition. Its `Display` shows the renamed call sites.
    pub fn definition(&self) -> &FnDef {
        &self.def
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The callable bound for a rewritten operator call site.
    pub fn op(&self, name: &str) -> Option<&NativeFn> {
        match self.namespace.get(name) {
            Some(Binding::Native(f)) => Some(f),
            _ => None,
        }
    }

    /// Run the body once.
    pub fn invoke(&self, call: &CallArgs) -> RunResult<Value> {
        let params = bind_params(&self.def, call)?;
        let mut frame = Frame::new(&self.namespace, &self.file, params);
        frame.run_function(&self.def)
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break(u32),
    Continue(u32),
}

/// One function activation: lexical scopes over a shared namespace.
struct Frame<'a> {
    namespace: &'a Namespace,
    file: &'a str,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Frame<'a> {
    fn new(namespace: &'a Namespace, file: &'a str, params: HashMap<String, Value>) -> Self {
        Self {
            namespace,
            file,
            scopes: vec![params],
        }
    }

    fn type_error(&self, span: Span, message: impl Into<String>) -> Signal {
        Signal::Fail(AtlasError::Type {
            message: message.into(),
            file: self.file.to_string(),
            line: span.line,
        })
    }

    /// Validate `len * n` for `*` repetition; negative counts repeat zero times.
    fn repeat_count(&self, span: Span, len: usize, n: i64) -> RunResult<usize> {
        let times = usize::try_from(n.max(0)).map_err(|_| self.type_error(span, "integer overflow"))?;
        match len.checked_mul(times) {
            Some(total) if total <= MAX_REPEAT_LEN => Ok(times),
            _ => Err(self.type_error(
                span,
                format!("repetition result exceeds {} elements", MAX_REPEAT_LEN),
            )),
        }
    }

    fn name_error(&self, span: Span, name: &str) -> Signal {
        Signal::Fail(AtlasError::NameNotFound {
            name: name.to_string(),
            file: self.file.to_string(),
            line: span.line,
        })
    }

    fn run_function(&mut self, def: &FnDef) -> RunResult<Value> {
        match self.exec_block(&def.body)? {
            Flow::Normal => Ok(Value::Null),
            Flow::Return(value) => Ok(value),
            Flow::Break(line) | Flow::Continue(line) => Err(Signal::Fail(AtlasError::Type {
                message: "`break` or `continue` outside of a loop".to_string(),
                file: self.file.to_string(),
                line,
            })),
        }
    }

    fn scoped<T>(&mut self, scope: HashMap<String, Value>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push(scope);
        let out = f(self);
        self.scopes.pop();
        out
    }

    fn exec_block(&mut self, block: &[Spanned<Stmt>]) -> RunResult<Flow> {
        for stmt in block {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_nested(&mut self, block: &[Spanned<Stmt>]) -> RunResult<Flow> {
        self.scoped(HashMap::new(), |frame| frame.exec_block(block))
    }

    fn exec_stmt(&mut self, stmt: &Spanned<Stmt>) -> RunResult<Flow> {
        let span = stmt.span;
        match &stmt.node {
            Stmt::Let { name, value } => {
                let value = self.eval(value)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign { name, op, value } => {
                let rhs = self.eval(value)?;
                let new_value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => {
                        let current = self.lookup(name, span)?;
                        self.binary(BinOp::Add, current, rhs, span)?
                    }
                };
                match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
                    Some(slot) => {
                        *slot = new_value;
                        Ok(Flow::Normal)
                    }
                    None => Err(self.name_error(span, name)),
                }
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.exec_nested(then_block)
                } else if let Some(block) = else_block {
                    self.exec_nested(block)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For { var, iter, body } => {
                let iterable = self.eval(iter)?;
                let items = iterable.elements().ok_or_else(|| {
                    self.type_error(iter.span, format!("{} is not iterable", iterable.type_name()))
                })?;
                for item in items {
                    let scope = HashMap::from([(var.clone(), item)]);
                    match self.scoped(scope, |frame| frame.exec_block(body))? {
                        Flow::Normal | Flow::Continue(_) => {}
                        Flow::Break(_) => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    match self.exec_nested(body)? {
                        Flow::Normal | Flow::Continue(_) => {}
                        Flow::Break(_) => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Skip => Err(Signal::Skip),
            Stmt::Break => Ok(Flow::Break(span.line)),
            Stmt::Continue => Ok(Flow::Continue(span.line)),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn lookup(&self, name: &str, span: Span) -> RunResult<Value> {
        if let Some(value) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Ok(value.clone());
        }
        match self.namespace.get(name) {
            Some(Binding::Value(value)) => Ok(value.clone()),
            Some(_) => Err(self.type_error(span, format!("`{}` is callable and cannot be used as a value", name))),
            None => Err(self.name_error(span, name)),
        }
    }

    fn eval(&mut self, expr: &Spanned<Expr>) -> RunResult<Value> {
        let span = expr.span;
        match &expr.node {
            Expr::Literal(lit) => Ok(lit.to_value()),
            Expr::Name(name) => self.lookup(name, span),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<RunResult<Vec<_>>>()
                .map(Value::List),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| self.type_error(span, "integer overflow")),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => {
                        Err(self.type_error(span, format!("cannot negate {}", other.type_name())))
                    }
                }
            }
            Expr::Binary {
                op: BinOp::And,
                lhs,
                rhs,
            } => {
                let truthy = self.eval(lhs)?.is_truthy() && self.eval(rhs)?.is_truthy();
                Ok(Value::Bool(truthy))
            }
            Expr::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
            } => {
                let truthy = self.eval(lhs)?.is_truthy() || self.eval(rhs)?.is_truthy();
                Ok(Value::Bool(truthy))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, lhs, rhs, span)
            }
            Expr::Index { expr, index } => {
                let target = self.eval(expr)?;
                let index = self.eval(index)?;
                self.index(target, index, span)
            }
            Expr::Call(call) => self.call(call, span),
        }
    }

    fn index(&self, target: Value, index: Value, span: Span) -> RunResult<Value> {
        let Value::Int(i) = index else {
            return Err(self.type_error(span, format!("index must be int, got {}", index.type_name())));
        };
        let items = match &target {
            Value::List(_) | Value::Str(_) => target.elements().unwrap_or_default(),
            other => return Err(self.type_error(span, format!("{} is not indexable", other.type_name()))),
        };
        let len = items.len() as i64;
        let resolved = if i < 0 { len + i } else { i };
        if resolved < 0 || resolved >= len {
            return Err(self.type_error(span, format!("index {} out of range for length {}", i, len)));
        }
        Ok(items[resolved as usize].clone())
    }

    fn binary(&self, op: BinOp, lhs: Value, rhs: Value, span: Span) -> RunResult<Value> {
        use Value::*;
        let overflow = || self.type_error(span, "integer overflow");
        match (op, lhs, rhs) {
            (BinOp::Eq, a, b) => Ok(Bool(values_equal(&a, &b))),
            (BinOp::Ne, a, b) => Ok(Bool(!values_equal(&a, &b))),
            (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, a, b) => {
                let ord = compare(&a, &b).ok_or_else(|| {
                    self.type_error(
                        span,
                        format!("cannot compare {} and {}", a.type_name(), b.type_name()),
                    )
                })?;
                Ok(Bool(match op {
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Le => ord != Ordering::Greater,
                    BinOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            (BinOp::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(overflow),
            (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(overflow),
            (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(overflow),
            (BinOp::Add, Str(a), Str(b)) => Ok(Str(a + &b)),
            (BinOp::Add, List(mut a), List(b)) => {
                a.extend(b);
                Ok(List(a))
            }
            (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
                let times = self.repeat_count(span, s.len(), n)?;
                Ok(Str(s.repeat(times)))
            }
            (BinOp::Mul, List(items), Int(n)) | (BinOp::Mul, Int(n), List(items)) => {
                let times = self.repeat_count(span, items.len(), n)?;
                let mut out = Vec::with_capacity(items.len() * times);
                for _ in 0..times {
                    out.extend(items.iter().cloned());
                }
                Ok(List(out))
            }
            (BinOp::Mod, Int(_), Int(0)) | (BinOp::Div, Int(_), Int(0)) => {
                Err(self.type_error(span, "division by zero"))
            }
            (BinOp::Mod, Int(a), Int(b)) => a.checked_rem_euclid(b).map(Int).ok_or_else(overflow),
            (op @ (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div), a, b)
                if a.as_float().is_some() && b.as_float().is_some() =>
            {
                let (x, y) = (a.as_float().unwrap_or_default(), b.as_float().unwrap_or_default());
                match op {
                    BinOp::Add => Ok(Float(x + y)),
                    BinOp::Sub => Ok(Float(x - y)),
                    BinOp::Mul => Ok(Float(x * y)),
                    _ if y == 0.0 => Err(self.type_error(span, "division by zero")),
                    _ => Ok(Float(x / y)),
                }
            }
            (op, a, b) => Err(self.type_error(
                span,
                format!(
                    "unsupported operand types for {}: {} and {}",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                ),
            )),
        }
    }

    fn call(&mut self, call: &Call, span: Span) -> RunResult<Value> {
        let name = call.callee.qualified();
        if let Callee::Name(local) = &call.callee {
            if self.scopes.iter().any(|scope| scope.contains_key(local)) {
                return Err(self.type_error(span, format!("`{}` is not callable", local)));
            }
        }
        let binding = self
            .namespace
            .get(&name)
            .cloned()
            .ok_or_else(|| self.name_error(span, &name))?;

        let mut args = CallArgs::new(
            call.args
                .iter()
                .map(|arg| self.eval(arg))
                .collect::<RunResult<Vec<_>>>()?,
        );
        for kw in &call.keywords {
            let value = self.eval(&kw.value)?;
            args.kwargs.insert(kw.name.clone(), value);
        }

        match binding {
            Binding::Value(value) => Err(self.type_error(
                span,
                format!("`{}` is a {} and not callable", name, value.type_name()),
            )),
            Binding::Native(f) => f(&args),
            Binding::Function(def) => {
                let params = bind_params(&def, &args)?;
                let mut frame = Frame::new(self.namespace, self.file, params);
                frame.run_function(&def)
            }
            Binding::Generator(weak) => {
                let generator = weak
                    .upgrade()
                    .ok_or_else(|| Signal::Fail(AtlasError::GeneratorDropped(weak.label())))?;
                generator.call_signal(&args)
            }
        }
    }
}

//! Syntax tree traversals used by the generator compiler.

use std::collections::BTreeSet;

use crate::ast::*;
use crate::span::{Span, Spanned};

/// Visit every call expression of a function body in pre-order (a call is
/// visited before the calls nested in its arguments). The callback may
/// rewrite the call in place.
pub fn walk_calls_mut<E, F>(def: &mut FnDef, f: &mut F) -> Result<(), E>
where
    F: FnMut(&mut Call, Span) -> Result<(), E>,
{
    for stmt in &mut def.body {
        walk_stmt_calls(stmt, f)?;
    }
    Ok(())
}

fn walk_block_calls<E, F>(block: &mut Block, f: &mut F) -> Result<(), E>
where
    F: FnMut(&mut Call, Span) -> Result<(), E>,
{
    for stmt in block {
        walk_stmt_calls(stmt, f)?;
    }
    Ok(())
}

fn walk_stmt_calls<E, F>(stmt: &mut Spanned<Stmt>, f: &mut F) -> Result<(), E>
where
    F: FnMut(&mut Call, Span) -> Result<(), E>,
{
    match &mut stmt.node {
        Stmt::Let { value, .. } | Stmt::Assign { value, .. } => walk_expr_calls(value, f),
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            walk_expr_calls(cond, f)?;
            walk_block_calls(then_block, f)?;
            if let Some(block) = else_block {
                walk_block_calls(block, f)?;
            }
            Ok(())
        }
        Stmt::For { iter, body, .. } => {
            walk_expr_calls(iter, f)?;
            walk_block_calls(body, f)
        }
        Stmt::While { cond, body } => {
            walk_expr_calls(cond, f)?;
            walk_block_calls(body, f)
        }
        Stmt::Return(Some(value)) | Stmt::Expr(value) => walk_expr_calls(value, f),
        Stmt::Return(None) | Stmt::Skip | Stmt::Break | Stmt::Continue => Ok(()),
    }
}

fn walk_expr_calls<E, F>(expr: &mut Spanned<Expr>, f: &mut F) -> Result<(), E>
where
    F: FnMut(&mut Call, Span) -> Result<(), E>,
{
    let span = expr.span;
    match &mut expr.node {
        Expr::Literal(_) | Expr::Name(_) => Ok(()),
        Expr::List(items) => {
            for item in items {
                walk_expr_calls(item, f)?;
            }
            Ok(())
        }
        Expr::Unary { expr, .. } => walk_expr_calls(expr, f),
        Expr::Binary { lhs, rhs, .. } => {
            walk_expr_calls(lhs, f)?;
            walk_expr_calls(rhs, f)
        }
        Expr::Index { expr, index } => {
            walk_expr_calls(expr, f)?;
            walk_expr_calls(index, f)
        }
        Expr::Call(call) => {
            f(call, span)?;
            for arg in &mut call.args {
                walk_expr_calls(arg, f)?;
            }
            for kw in &mut call.keywords {
                walk_expr_calls(&mut kw.value, f)?;
            }
            Ok(())
        }
    }
}

/// Names a function refers to but does not bind itself (parameters, `let`
/// and loop variables are bound). Callee paths are reported joined (`a.b`).
pub fn free_names(def: &FnDef) -> BTreeSet<String> {
    let mut collector = NameCollector::default();
    collector.bound.extend(def.params.iter().cloned());
    collector.block(&def.body);
    collector
        .referenced
        .into_iter()
        .filter(|name| !collector.bound.contains(name))
        .collect()
}

#[derive(Default)]
struct NameCollector {
    referenced: BTreeSet<String>,
    bound: BTreeSet<String>,
}

impl NameCollector {
    fn block(&mut self, block: &Block) {
        for stmt in block {
            self.stmt(&stmt.node);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value } => {
                self.bound.insert(name.clone());
                self.expr(&value.node);
            }
            Stmt::Assign { value, .. } => self.expr(&value.node),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(&cond.node);
                self.block(then_block);
                if let Some(block) = else_block {
                    self.block(block);
                }
            }
            Stmt::For { var, iter, body } => {
                self.bound.insert(var.clone());
                self.expr(&iter.node);
                self.block(body);
            }
            Stmt::While { cond, body } => {
                self.expr(&cond.node);
                self.block(body);
            }
            Stmt::Return(Some(value)) | Stmt::Expr(value) => self.expr(&value.node),
            Stmt::Return(None) | Stmt::Skip | Stmt::Break | Stmt::Continue => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Name(name) => {
                self.referenced.insert(name.clone());
            }
            Expr::List(items) => items.iter().for_each(|item| self.expr(&item.node)),
            Expr::Unary { expr, .. } => self.expr(&expr.node),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(&lhs.node);
                self.expr(&rhs.node);
            }
            Expr::Index { expr, index } => {
                self.expr(&expr.node);
                self.expr(&index.node);
            }
            Expr::Call(call) => {
                self.referenced.insert(call.callee.qualified());
                call.args.iter().for_each(|arg| self.expr(&arg.node));
                call.keywords.iter().for_each(|kw| self.expr(&kw.value.node));
            }
        }
    }
}

/// Add `delta` to every line number in the function, so a definition parsed
/// from an excerpt reports positions of the enclosing file.
pub fn shift_lines(def: &mut FnDef, delta: u32) {
    if delta == 0 {
        return;
    }
    def.span.line += delta;
    for decorator in &mut def.decorators {
        decorator.span.line += delta;
        if let Some(args) = &mut decorator.args {
            for arg in &mut args.positional {
                shift_expr(arg, delta);
            }
            for kw in &mut args.keywords {
                shift_expr(&mut kw.value, delta);
            }
        }
    }
    shift_block(&mut def.body, delta);
}

fn shift_block(block: &mut Block, delta: u32) {
    for stmt in block {
        stmt.span.line += delta;
        match &mut stmt.node {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => shift_expr(value, delta),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                shift_expr(cond, delta);
                shift_block(then_block, delta);
                if let Some(block) = else_block {
                    shift_block(block, delta);
                }
            }
            Stmt::For { iter, body, .. } => {
                shift_expr(iter, delta);
                shift_block(body, delta);
            }
            Stmt::While { cond, body } => {
                shift_expr(cond, delta);
                shift_block(body, delta);
            }
            Stmt::Return(Some(value)) | Stmt::Expr(value) => shift_expr(value, delta),
            Stmt::Return(None) | Stmt::Skip | Stmt::Break | Stmt::Continue => {}
        }
    }
}

fn shift_expr(expr: &mut Spanned<Expr>, delta: u32) {
    expr.span.line += delta;
    match &mut expr.node {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::List(items) => items.iter_mut().for_each(|item| shift_expr(item, delta)),
        Expr::Unary { expr, .. } => shift_expr(expr, delta),
        Expr::Binary { lhs, rhs, .. } => {
            shift_expr(lhs, delta);
            shift_expr(rhs, delta);
        }
        Expr::Index { expr, index } => {
            shift_expr(expr, delta);
            shift_expr(index, delta);
        }
        Expr::Call(call) => {
            call.args.iter_mut().for_each(|arg| shift_expr(arg, delta));
            call.keywords
                .iter_mut()
                .for_each(|kw| shift_expr(&mut kw.value, delta));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_function;

    const SRC: &str = r#"fn g(n) {
    let s = "";
    for i in range(n) {
        s += Select(pick(DIGITS), oid="d");
    }
    return lib.finish(s, Select([1, 2]));
}"#;

    #[test]
    fn calls_are_visited_in_preorder() {
        let mut def = parse_function("<test>", SRC).unwrap();
        let mut seen = Vec::new();
        walk_calls_mut::<(), _>(&mut def, &mut |call, _| {
            seen.push(call.callee.qualified());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["range", "Select", "pick", "lib.finish", "Select"]);
    }

    #[test]
    fn callback_can_rename_and_abort() {
        let mut def = parse_function("<test>", SRC).unwrap();
        walk_calls_mut::<(), _>(&mut def, &mut |call, _| {
            if call.callee.as_name() == Some("Select") {
                call.callee = Callee::Name("__op".into());
            }
            Ok(())
        })
        .unwrap();
        assert!(def.to_string().contains("__op(pick(DIGITS), oid=\"d\")"));

        let err = walk_calls_mut(&mut def, &mut |call, span| {
            if call.callee.as_name() == Some("pick") {
                Err(span.line)
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert_eq!(err, 4);
    }

    #[test]
    fn free_names_exclude_locals() {
        let def = parse_function("<test>", SRC).unwrap();
        let names: Vec<_> = free_names(&def).into_iter().collect();
        assert_eq!(names, vec!["DIGITS", "Select", "lib.finish", "pick", "range"]);
    }

    #[test]
    fn shift_lines_moves_every_node() {
        let mut def = parse_function("<test>", SRC).unwrap();
        shift_lines(&mut def, 10);
        assert_eq!(def.span.line, 11);
        let mut lines = Vec::new();
        walk_calls_mut::<(), _>(&mut def, &mut |_, span| {
            lines.push(span.line);
            Ok(())
        })
        .unwrap();
        assert_eq!(lines, vec![13, 14, 14, 16, 16]);
    }
}

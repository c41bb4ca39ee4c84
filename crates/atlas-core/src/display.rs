//! Source rendering of syntax trees ("unparse").
//!
//! Used in diagnostics that quote an offending call and to inspect the
//! rewritten body of a compiled generator.

use std::fmt::{self, Display, Formatter, Write};

use crate::ast::*;

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl Display for Callee {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

fn write_args(f: &mut Formatter<'_>, args: &[crate::Spanned<Expr>], keywords: &[Keyword]) -> fmt::Result {
    write!(f, "(")?;
    let mut first = true;
    for arg in args {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{}", arg.node)?;
    }
    for kw in keywords {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{}={}", kw.name, kw.value.node)?;
    }
    write!(f, ")")
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callee)?;
        write_args(f, &self.args, &self.keywords)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Name(name) => write!(f, "{}", name),
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.node)?;
                }
                write!(f, "]")
            }
            Expr::Unary { op, expr } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                write!(f, "{}{}", symbol, Parens(&expr.node))
            }
            Expr::Binary { op, lhs, rhs } => {
                write!(f, "{} {} {}", Parens(&lhs.node), op.symbol(), Parens(&rhs.node))
            }
            Expr::Index { expr, index } => write!(f, "{}[{}]", Parens(&expr.node), index.node),
            Expr::Call(call) => write!(f, "{}", call),
        }
    }
}

/// Parenthesizes compound operands so the output re-parses unambiguously.
struct Parens<'a>(&'a Expr);

impl Display for Parens<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::Binary { .. } | Expr::Unary { .. } => write!(f, "({})", self.0),
            other => write!(f, "{}", other),
        }
    }
}

impl Display for Decorator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.callee)?;
        if let Some(args) = &self.args {
            write_args(f, &args.positional, &args.keywords)?;
        }
        Ok(())
    }
}

fn write_block(out: &mut String, block: &Block, depth: usize) -> fmt::Result {
    for stmt in block {
        write_stmt(out, &stmt.node, depth)?;
    }
    Ok(())
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) -> fmt::Result {
    let indent = "    ".repeat(depth);
    match stmt {
        Stmt::Let { name, value } => writeln!(out, "{}let {} = {};", indent, name, value.node),
        Stmt::Assign { name, op, value } => {
            let symbol = match op {
                AssignOp::Set => "=",
                AssignOp::Add => "+=",
            };
            writeln!(out, "{}{} {} {};", indent, name, symbol, value.node)
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            writeln!(out, "{}if {} {{", indent, cond.node)?;
            write_block(out, then_block, depth + 1)?;
            match else_block {
                Some(block) => {
                    writeln!(out, "{}}} else {{", indent)?;
                    write_block(out, block, depth + 1)?;
                    writeln!(out, "{}}}", indent)
                }
                None => writeln!(out, "{}}}", indent),
            }
        }
        Stmt::For { var, iter, body } => {
            writeln!(out, "{}for {} in {} {{", indent, var, iter.node)?;
            write_block(out, body, depth + 1)?;
            writeln!(out, "{}}}", indent)
        }
        Stmt::While { cond, body } => {
            writeln!(out, "{}while {} {{", indent, cond.node)?;
            write_block(out, body, depth + 1)?;
            writeln!(out, "{}}}", indent)
        }
        Stmt::Return(Some(value)) => writeln!(out, "{}return {};", indent, value.node),
        Stmt::Return(None) => writeln!(out, "{}return;", indent),
        Stmt::Skip => writeln!(out, "{}skip;", indent),
        Stmt::Break => writeln!(out, "{}break;", indent),
        Stmt::Continue => writeln!(out, "{}continue;", indent),
        Stmt::Expr(expr) => writeln!(out, "{}{};", indent, expr.node),
    }
}

impl Display for FnDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for decorator in &self.decorators {
            writeln!(out, "{}", decorator)?;
        }
        writeln!(out, "fn {}({}) {{", self.name, self.params.join(", "))?;
        write_block(&mut out, &self.body, 1)?;
        write!(out, "}}")?;
        f.write_str(&out)
    }
}

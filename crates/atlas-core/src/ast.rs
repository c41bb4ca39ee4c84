//! Syntax tree of the atlas language.
//!
//! A source file is a [`Program`]: a list of function definitions, each with
//! optional decorators. Generator compilation rewrites [`Call`] nodes in place,
//! so every node that matters for diagnostics carries a [`Span`].

use crate::span::{Span, Spanned};
use crate::value::Value;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<FnDef>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FnDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A function definition, `@deco fn name(a, b) { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub decorators: Vec<Decorator>,
    pub body: Block,
    /// Covers the decorators and the whole body.
    pub span: Span,
}

/// A decorator: `@name`, `@a.b` or `@name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decorator {
    pub callee: Callee,
    /// `None` for the bare form, `Some` (possibly empty) for the call form.
    pub args: Option<DecoratorArgs>,
    pub span: Span,
}

impl Decorator {
    /// Last path segment: `generator` for `@generator`, `@atlas.generator`
    /// and `@generator(...)`.
    pub fn base_name(&self) -> &str {
        self.callee.last_segment()
    }
}

/// Arguments of a call-form decorator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecoratorArgs {
    pub positional: Vec<Spanned<Expr>>,
    pub keywords: Vec<Keyword>,
}

pub type Block = Vec<Spanned<Stmt>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Spanned<Expr>,
    },
    Assign {
        name: String,
        op: AssignOp,
        value: Spanned<Expr>,
    },
    If {
        cond: Spanned<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    For {
        var: String,
        iter: Spanned<Expr>,
        body: Block,
    },
    While {
        cond: Spanned<Expr>,
        body: Block,
    },
    Return(Option<Spanned<Expr>>),
    /// Abandon the current run without producing a value.
    Skip,
    Break,
    Continue,
    Expr(Spanned<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Spanned<Expr>>),
    Unary {
        op: UnaryOp,
        expr: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Index {
        expr: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    Call(Call),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Left and right binding power for the Pratt parser.
    pub fn binding_power(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 2),
            BinOp::And => (3, 4),
            BinOp::Eq | BinOp::Ne => (5, 6),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (7, 8),
            BinOp::Add | BinOp::Sub => (9, 10),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (11, 12),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

/// A call expression. Operator call sites are the calls whose callee is a
/// bare [`Callee::Name`] recognized by the active strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Spanned<Expr>>,
    pub keywords: Vec<Keyword>,
}

impl Call {
    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.name == name)
    }

    /// Remove and return the keyword argument `name`, if present.
    pub fn take_keyword(&mut self, name: &str) -> Option<Keyword> {
        let idx = self.keywords.iter().position(|k| k.name == name)?;
        Some(self.keywords.remove(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// A bare name, `Select(..)`.
    Name(String),
    /// A dotted path, `lib.helper(..)`.
    Path(Vec<String>),
}

impl Callee {
    /// The bare name, if this callee is one.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Callee::Name(n) => Some(n),
            Callee::Path(_) => None,
        }
    }

    /// Name used to look the callee up in a namespace (`a.b` for paths).
    pub fn qualified(&self) -> String {
        match self {
            Callee::Name(n) => n.clone(),
            Callee::Path(parts) => parts.join("."),
        }
    }

    pub fn last_segment(&self) -> &str {
        match self {
            Callee::Name(n) => n,
            Callee::Path(parts) => parts.last().map(String::as_str).unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub value: Spanned<Expr>,
}

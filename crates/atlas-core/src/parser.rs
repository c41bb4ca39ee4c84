//! Recursive-descent parser for the atlas language.
//!
//! Expressions use a Pratt loop driven by [`BinOp::binding_power`].

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::{Lexer, Token};
use crate::span::{Span, Spanned};

type ParseResult<T> = Result<T, SyntaxError>;

/// Parse a whole source file.
pub fn parse_program(file: &str, source: &str) -> ParseResult<Program> {
    Parser::new(file, source)?.parse_program()
}

/// Parse a source snippet that must contain exactly one function.
pub fn parse_function(file: &str, source: &str) -> ParseResult<FnDef> {
    let program = parse_program(file, source)?;
    let count = program.functions.len();
    let mut functions = program.functions.into_iter();
    match (functions.next(), count) {
        (Some(def), 1) => Ok(def),
        _ => Err(SyntaxError::new(
            file,
            1,
            1,
            format!("expected exactly one function definition, found {}", count),
        )),
    }
}

pub struct Parser<'src> {
    file: &'src str,
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    pub fn new(file: &'src str, source: &'src str) -> ParseResult<Self> {
        let tokens = Lexer::new(file, source).tokenize()?;
        Ok(Self {
            file,
            tokens,
            pos: 0,
        })
    }

    pub fn parse_program(&mut self) -> ParseResult<Program> {
        let mut functions = Vec::new();
        while !self.at(&Token::Eof) {
            functions.push(self.parse_function()?);
        }
        Ok(Program { functions })
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].node
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) -> Spanned<Token> {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let span = self.current_span();
        SyntaxError::new(self.file, span.line, span.column, message)
    }

    fn expect(&mut self, token: &Token, context: &str) -> ParseResult<Span> {
        if self.at(token) {
            Ok(self.advance().span)
        } else {
            Err(self.error_here(format!(
                "expected {} {}, found {}",
                token.describe(),
                context,
                self.peek().describe()
            )))
        }
    }

    fn expect_ident(&mut self, context: &str) -> ParseResult<(String, Span)> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            other => Err(self.error_here(format!(
                "expected identifier {}, found {}",
                context,
                other.describe()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    fn parse_function(&mut self) -> ParseResult<FnDef> {
        let start = self.current_span();
        let mut decorators = Vec::new();
        while self.at(&Token::At) {
            decorators.push(self.parse_decorator()?);
        }

        self.expect(&Token::Fn, "to start a function definition")?;
        let (name, _) = self.expect_ident("after `fn`")?;

        self.expect(&Token::LParen, "after the function name")?;
        let mut params = Vec::new();
        while !self.at(&Token::RParen) {
            let (param, span) = self.expect_ident("in parameter list")?;
            if params.contains(&param) {
                return Err(SyntaxError::new(
                    self.file,
                    span.line,
                    span.column,
                    format!("duplicate parameter `{}`", param),
                ));
            }
            params.push(param);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "to close the parameter list")?;

        let body = self.parse_block()?;
        let span = start.merge(self.prev_span());

        Ok(FnDef {
            name,
            params,
            decorators,
            body,
            span,
        })
    }

    fn parse_decorator(&mut self) -> ParseResult<Decorator> {
        let start = self.expect(&Token::At, "to start a decorator")?;
        let callee = self.parse_callee_path()?;
        let args = if self.at(&Token::LParen) {
            let (positional, keywords) = self.parse_call_args()?;
            Some(DecoratorArgs {
                positional,
                keywords,
            })
        } else {
            None
        };
        Ok(Decorator {
            callee,
            args,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_callee_path(&mut self) -> ParseResult<Callee> {
        let (first, _) = self.expect_ident("as callee")?;
        if !self.at(&Token::Dot) {
            return Ok(Callee::Name(first));
        }
        let mut parts = vec![first];
        while self.eat(&Token::Dot) {
            let (segment, _) = self.expect_ident("after `.`")?;
            parts.push(segment);
        }
        Ok(Callee::Path(parts))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> ParseResult<Block> {
        self.expect(&Token::LBrace, "to open a block")?;
        let mut stmts = Vec::new();
        while !self.at(&Token::RBrace) {
            if self.at(&Token::Eof) {
                return Err(self.error_here("unexpected end of input inside block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace, "to close the block")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> ParseResult<Spanned<Stmt>> {
        let start = self.current_span();
        let stmt = match self.peek().clone() {
            Token::Let => {
                self.advance();
                let (name, _) = self.expect_ident("after `let`")?;
                self.expect(&Token::Assign, "in `let` statement")?;
                let value = self.parse_expr()?;
                self.expect(&Token::Semi, "after `let` statement")?;
                Stmt::Let { name, value }
            }
            Token::If => return self.parse_if(),
            Token::For => {
                self.advance();
                let (var, _) = self.expect_ident("after `for`")?;
                self.expect(&Token::In, "in `for` loop")?;
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                Stmt::For { var, iter, body }
            }
            Token::While => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Stmt::While { cond, body }
            }
            Token::Return => {
                self.advance();
                let value = if self.at(&Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semi, "after `return`")?;
                Stmt::Return(value)
            }
            Token::Skip => {
                self.advance();
                self.expect(&Token::Semi, "after `skip`")?;
                Stmt::Skip
            }
            Token::Break => {
                self.advance();
                self.expect(&Token::Semi, "after `break`")?;
                Stmt::Break
            }
            Token::Continue => {
                self.advance();
                self.expect(&Token::Semi, "after `continue`")?;
                Stmt::Continue
            }
            Token::Ident(name)
                if matches!(self.peek_nth(1), Token::Assign | Token::PlusAssign) =>
            {
                self.advance();
                let op = if self.advance().node == Token::PlusAssign {
                    AssignOp::Add
                } else {
                    AssignOp::Set
                };
                let value = self.parse_expr()?;
                self.expect(&Token::Semi, "after assignment")?;
                Stmt::Assign { name, op, value }
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semi, "after expression statement")?;
                Stmt::Expr(expr)
            }
        };
        Ok(Spanned::new(stmt, start.merge(self.prev_span())))
    }

    fn parse_if(&mut self) -> ParseResult<Spanned<Stmt>> {
        let start = self.expect(&Token::If, "to start `if`")?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.at(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Spanned::new(
            Stmt::If {
                cond,
                then_block,
                else_block,
            },
            start.merge(self.prev_span()),
        ))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> ParseResult<Spanned<Expr>> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> ParseResult<Spanned<Expr>> {
        let mut lhs = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Token::OrOr => BinOp::Or,
                Token::AndAnd => BinOp::And,
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };

            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }

            self.advance();
            let rhs = self.parse_expr_bp(r_bp)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Spanned<Expr>> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };
        let start = self.advance().span;
        let expr = self.parse_unary()?;
        let span = start.merge(expr.span);
        Ok(Spanned::new(
            Expr::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        ))
    }

    /// Postfix indexing: `e[i][j]`.
    fn parse_postfix(&mut self, mut expr: Spanned<Expr>) -> ParseResult<Spanned<Expr>> {
        while self.eat(&Token::LBracket) {
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket, "to close the index")?;
            let span = expr.span.merge(self.prev_span());
            expr = Spanned::new(
                Expr::Index {
                    expr: Box::new(expr),
                    index: Box::new(index),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Spanned<Expr>> {
        let start = self.current_span();

        let literal = match self.peek().clone() {
            Token::Int(i) => Some(Literal::Int(i)),
            Token::Float(f) => Some(Literal::Float(f)),
            Token::Str(s) => Some(Literal::Str(s)),
            Token::True => Some(Literal::Bool(true)),
            Token::False => Some(Literal::Bool(false)),
            Token::Null => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Spanned::new(Expr::Literal(literal), start));
        }

        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "to close the parenthesized expression")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&Token::RBracket) && !self.at(&Token::Eof) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "to close the list")?;
                Ok(Spanned::new(Expr::List(items), start.merge(self.prev_span())))
            }
            Token::Ident(name) => {
                if !matches!(self.peek_nth(1), Token::LParen | Token::Dot) {
                    self.advance();
                    return Ok(Spanned::new(Expr::Name(name), start));
                }
                let callee = self.parse_callee_path()?;
                if !self.at(&Token::LParen) {
                    return Err(self.error_here(format!(
                        "attribute access `{}` is only supported as a call",
                        callee.qualified()
                    )));
                }
                let (args, keywords) = self.parse_call_args()?;
                Ok(Spanned::new(
                    Expr::Call(Call {
                        callee,
                        args,
                        keywords,
                    }),
                    start.merge(self.prev_span()),
                ))
            }
            other => Err(self.error_here(format!("expected expression, found {}", other.describe()))),
        }
    }

    /// `( positional..., name=value... )`; keywords must follow positionals.
    fn parse_call_args(&mut self) -> ParseResult<(Vec<Spanned<Expr>>, Vec<Keyword>)> {
        self.expect(&Token::LParen, "to open the argument list")?;
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.at(&Token::RParen) && !self.at(&Token::Eof) {
            let keyword_name = match (self.peek(), self.peek_nth(1)) {
                (Token::Ident(name), Token::Assign) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword_name {
                let name_span = self.current_span();
                self.advance();
                self.advance();
                if keywords.iter().any(|k| k.name == name) {
                    return Err(SyntaxError::new(
                        self.file,
                        name_span.line,
                        name_span.column,
                        format!("keyword argument `{}` repeated", name),
                    ));
                }
                let value = self.parse_expr()?;
                keywords.push(Keyword { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "to close the argument list")?;
        Ok((args, keywords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: &str = r#"
@generator(strategy="dfs")
fn bits(length) {
    let s = "";
    for i in range(length) {
        s += Select(["0", "1"], oid="digit");
    }
    return s;
}
"#;

    #[test]
    fn parses_generator_function() {
        let def = parse_function("<test>", BITS).unwrap();
        assert_eq!(def.name, "bits");
        assert_eq!(def.params, vec!["length".to_string()]);
        assert_eq!(def.decorators.len(), 1);
        assert_eq!(def.decorators[0].base_name(), "generator");
        assert_eq!(def.body.len(), 3);
        assert_eq!(def.span.line, 2);

        let Stmt::For { body, .. } = &def.body[1].node else {
            panic!("expected for loop");
        };
        let Stmt::Assign { op, value, .. } = &body[0].node else {
            panic!("expected assignment");
        };
        assert_eq!(*op, AssignOp::Add);
        let Expr::Call(call) = &value.node else {
            panic!("expected call");
        };
        assert_eq!(call.callee, Callee::Name("Select".into()));
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.keyword("oid").unwrap().value.node, Expr::Literal(Literal::Str("digit".into())));
        assert_eq!(value.span.line, 6);
    }

    #[test]
    fn precedence() {
        let def = parse_function("<test>", "fn f() { return 1 + 2 * 3 == 7 && true; }").unwrap();
        let Stmt::Return(Some(expr)) = &def.body[0].node else {
            panic!("expected return");
        };
        let Expr::Binary { op, lhs, .. } = &expr.node else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::And);
        let Expr::Binary { op, lhs, .. } = &lhs.node else {
            panic!("expected comparison");
        };
        assert_eq!(*op, BinOp::Eq);
        let Expr::Binary { op, rhs, .. } = &lhs.node else {
            panic!("expected sum");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.node, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn decorator_forms() {
        let src = "@generator\n@atlas.generator\n@generator(name=\"g\")\nfn g() { return 1; }";
        let def = parse_function("<test>", src).unwrap();
        assert!(def.decorators[0].args.is_none());
        assert_eq!(def.decorators[1].callee, Callee::Path(vec!["atlas".into(), "generator".into()]));
        assert_eq!(def.decorators[2].args.as_ref().unwrap().keywords[0].name, "name");
        assert!(def.decorators.iter().all(|d| d.base_name() == "generator"));
    }

    #[test]
    fn else_if_chain_and_paths() {
        let src = "fn f(x) { if x < 0 { return lib.neg(x); } else if x == 0 { skip; } else { return x[-1]; } }";
        let def = parse_function("<test>", src).unwrap();
        let Stmt::If { else_block: Some(else_block), .. } = &def.body[0].node else {
            panic!("expected if/else");
        };
        assert!(matches!(else_block[0].node, Stmt::If { .. }));
    }

    #[test]
    fn reports_location_of_errors() {
        let err = parse_function("g.atlas", "fn f() {\n  let = 3;\n}").unwrap_err();
        assert_eq!((err.line, err.column), (2, 7));
        assert!(err.message.contains("expected identifier"));
    }

    #[test]
    fn positional_after_keyword_is_rejected() {
        let err = parse_function("<test>", "fn f() { g(a=1, 2); }").unwrap_err();
        assert!(err.message.contains("positional argument follows keyword"));
    }

    #[test]
    fn parse_function_requires_exactly_one() {
        let err = parse_function("<test>", "fn a() {} fn b() {}").unwrap_err();
        assert!(err.message.contains("exactly one"));
    }
}

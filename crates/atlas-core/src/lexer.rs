//! Tokenizer for the atlas language.

use crate::error::SyntaxError;
use crate::span::{Span, Spanned};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    Fn,
    Let,
    If,
    Else,
    For,
    In,
    While,
    Return,
    Skip,
    Break,
    Continue,
    True,
    False,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    At,
    Assign,
    PlusAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Eof,
}

impl Token {
    fn keyword(word: &str) -> Option<Token> {
        Some(match word {
            "fn" => Token::Fn,
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "while" => Token::While,
            "return" => Token::Return,
            "skip" => Token::Skip,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => return None,
        })
    }

    /// Short human-readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{}`", name),
            Token::Int(i) => format!("integer `{}`", i),
            Token::Float(f) => format!("float `{:?}`", f),
            Token::Str(s) => format!("string {:?}", s),
            Token::Eof => "end of input".to_string(),
            other => format!("`{}`", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            Token::Fn => "fn",
            Token::Let => "let",
            Token::If => "if",
            Token::Else => "else",
            Token::For => "for",
            Token::In => "in",
            Token::While => "while",
            Token::Return => "return",
            Token::Skip => "skip",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Dot => ".",
            Token::At => "@",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Ident(_) | Token::Int(_) | Token::Float(_) | Token::Str(_) | Token::Eof => "",
        }
    }
}

pub struct Lexer<'src> {
    file: &'src str,
    source: &'src str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(file: &'src str, source: &'src str) -> Self {
        Self {
            file,
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input. The last token is always [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Spanned<Token>>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.node == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.file, line, column, message)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned<Token>, SyntaxError> {
        self.skip_whitespace_and_comments();

        let start = self.pos;
        let (line, column) = (self.line, self.column);
        let Some(c) = self.bump() else {
            let span = Span::new(start as u32, start as u32, line, column);
            return Ok(Spanned::new(Token::Eof, span));
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ';' => Token::Semi,
            '.' => Token::Dot,
            '@' => Token::At,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '-' => Token::Minus,
            '+' => self.either('=', Token::PlusAssign, Token::Plus),
            '=' => self.either('=', Token::EqEq, Token::Assign),
            '!' => self.either('=', Token::NotEq, Token::Bang),
            '<' => self.either('=', Token::Le, Token::Lt),
            '>' => self.either('=', Token::Ge, Token::Gt),
            '&' => {
                if self.peek() == Some('&') {
                    self.bump();
                    Token::AndAnd
                } else {
                    return Err(self.error(line, column, "expected `&&`"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    Token::OrOr
                } else {
                    return Err(self.error(line, column, "expected `||`"));
                }
            }
            '"' => self.lex_string(line, column)?,
            c if c.is_ascii_digit() => self.lex_number(start, line, column)?,
            c if c.is_alphabetic() || c == '_' => {
                while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                    self.bump();
                }
                let word = &self.source[start..self.pos];
                Token::keyword(word).unwrap_or_else(|| Token::Ident(word.to_string()))
            }
            other => {
                return Err(self.error(line, column, format!("unexpected character {:?}", other)))
            }
        };

        let span = Span::new(start as u32, self.pos as u32, line, column);
        Ok(Spanned::new(token, span))
    }

    fn either(&mut self, next: char, matched: Token, otherwise: Token) -> Token {
        if self.peek() == Some(next) {
            self.bump();
            matched
        } else {
            otherwise
        }
    }

    fn lex_string(&mut self, line: u32, column: u32) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string literal")),
                Some('"') => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(self.error(
                                self.line,
                                self.column,
                                format!("unknown escape sequence `\\{}`", other),
                            ))
                        }
                        None => return Err(self.error(line, column, "unterminated string literal")),
                    };
                    text.push(escaped);
                }
                Some(c) => text.push(c),
            }
        }
        Ok(Token::Str(text))
    }

    fn lex_number(&mut self, start: usize, line: u32, column: u32) -> Result<Token, SyntaxError> {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        let is_float = self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit());
        if is_float {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
                self.bump();
            }
        }
        let text: String = self.source[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(line, column, format!("invalid float literal `{}`", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(line, column, format!("integer literal `{}` out of range", text)))
        }
    }
}

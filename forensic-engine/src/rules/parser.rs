//! Tokenizer and recursive-descent parser for rule expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or         := and (("||" | "OR") and)*
//! and        := comparison (("&&" | "AND") comparison)*
//! comparison := additive (("==" | "!=" | "<" | "<=" | ">" | ">=") additive)*
//! additive   := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/") unary)*
//! unary      := ("!" | "NOT" | "-") unary | primary
//! primary    := number | string | bool | metric | call | "(" or ")"
//! call       := ident "(" (or ("," or)*)? ")"
//! ```
//!
//! Metric names may contain dots (`prior.revenue`).

use std::collections::BTreeSet;
use thiserror::Error;

/// Parse error types.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),
}

/// Expression AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Number(f64),
    String(String),
    /// Named metric (`current_ratio`, `prior.revenue`)
    Metric(String),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Names of all metrics referenced by this expression.
    pub fn metrics(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_metrics(&mut names);
        names
    }

    fn collect_metrics(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Metric(name) => {
                names.insert(name.clone());
            }
            Expr::BinaryOp { left, right, .. } => {
                left.collect_metrics(names);
                right.collect_metrics(names);
            }
            Expr::UnaryOp { expr, .. } => expr.collect_metrics(names),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_metrics(names);
                }
            }
            Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => {}
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
}

/// Token types for lexing.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Bool(bool),
    Number(f64),
    String(String),
    Ident(String),
    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    // Delimiters
    LParen,
    RParen,
    Comma,
    // End
    Eof,
}

/// Tokenize an expression string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // String literals
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            while i < chars.len() && chars[i] != quote {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                }
                s.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err(ParseError::InvalidSyntax("Unterminated string".into()));
            }
            tokens.push(Token::String(s));
            i += 1;
            continue;
        }

        // Numbers (sign is handled by unary minus)
        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent: 1e6, 2.5E-3
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let num_str: String = chars[start..i].iter().collect();
            let num: f64 = num_str
                .parse()
                .map_err(|_| ParseError::InvalidSyntax(format!("Invalid number: {}", num_str)))?;
            tokens.push(Token::Number(num));
            continue;
        }

        // Identifiers and keywords
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident.ends_with('.') || ident.contains("..") {
                return Err(ParseError::InvalidSyntax(format!("Invalid name: {}", ident)));
            }
            let token = match ident.as_str() {
                "true" | "TRUE" => Token::Bool(true),
                "false" | "FALSE" => Token::Bool(false),
                "AND" | "and" => Token::And,
                "OR" | "or" => Token::Or,
                "NOT" | "not" => Token::Not,
                _ => Token::Ident(ident),
            };
            tokens.push(token);
            continue;
        }

        // Multi-character operators
        if i + 1 < chars.len() {
            let two: String = chars[i..i + 2].iter().collect();
            let token = match two.as_str() {
                "==" => Some(Token::Eq),
                "!=" => Some(Token::Ne),
                "<=" => Some(Token::Le),
                ">=" => Some(Token::Ge),
                "&&" => Some(Token::And),
                "||" => Some(Token::Or),
                _ => None,
            };
            if let Some(t) = token {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '!' => Token::Not,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            _ => return Err(ParseError::UnexpectedToken(c.to_string())),
        };
        tokens.push(token);
        i += 1;
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

/// Parse an expression string into an AST. Trailing input is an error.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    match parser.current() {
        Token::Eof => Ok(expr),
        other => Err(ParseError::UnexpectedToken(format!("{:?}", other))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;

        while matches!(self.current(), Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Self::binary(left, BinaryOperator::Or, right);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;

        while matches!(self.current(), Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Self::binary(left, BinaryOperator::And, right);
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current() {
                Token::Eq => BinaryOperator::Eq,
                Token::Ne => BinaryOperator::Ne,
                Token::Lt => BinaryOperator::Lt,
                Token::Le => BinaryOperator::Le,
                Token::Gt => BinaryOperator::Gt,
                Token::Ge => BinaryOperator::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current() {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.current() {
            Token::Not => UnaryOperator::Not,
            Token::Minus => UnaryOperator::Neg,
            _ => return self.parse_primary(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let expr = match self.current().clone() {
            Token::Bool(b) => {
                self.advance();
                Expr::Bool(b)
            }
            Token::Number(n) => {
                self.advance();
                Expr::Number(n)
            }
            Token::String(s) => {
                self.advance();
                Expr::String(s)
            }
            Token::Ident(name) => {
                self.advance();
                if matches!(self.current(), Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    Expr::FunctionCall { name, args }
                } else {
                    Expr::Metric(name)
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                if !matches!(self.current(), Token::RParen) {
                    return Err(ParseError::InvalidSyntax("Expected ')'".into()));
                }
                self.advance();
                expr
            }
            Token::Eof => return Err(ParseError::UnexpectedEnd),
            other => return Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        };

        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.current(), Token::RParen) {
            self.advance();
            return Ok(args);
        }

        loop {
            args.push(self.parse_expr()?);
            match self.current() {
                Token::Comma => self.advance(),
                Token::RParen => {
                    self.advance();
                    return Ok(args);
                }
                Token::Eof => return Err(ParseError::UnexpectedEnd),
                other => return Err(ParseError::UnexpectedToken(format!("{:?}", other))),
            }
        }
    }
}

//! Recursive-descent parser producing the expression tree.
//!
//! Identifiers and function names are resolved here, so an expression that
//! parses is guaranteed to only reference known inputs and functions.

use serde_json::Value;

use super::lexer::{Spanned, Token, tokenize};
use crate::error::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The raw record text.
    Line,
    /// The record split on the delimiter.
    Fields,
    /// The parsed JSON document.
    This,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Lower,
    Upper,
    Trim,
    Len,
    Substr,
    Split,
    Join,
    Str,
    Num,
    Floor,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "lower" => Function::Lower,
            "upper" => Function::Upper,
            "trim" => Function::Trim,
            "len" => Function::Len,
            "substr" => Function::Substr,
            "split" => Function::Split,
            "join" => Function::Join,
            "str" => Function::Str,
            "num" => Function::Num,
            "floor" => Function::Floor,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Trim => "trim",
            Function::Len => "len",
            Function::Substr => "substr",
            Function::Split => "split",
            Function::Join => "join",
            Function::Str => "str",
            Function::Num => "num",
            Function::Floor => "floor",
        }
    }

    /// Accepted argument counts, and their description for errors.
    fn arity(self) -> (std::ops::RangeInclusive<usize>, &'static str) {
        match self {
            Function::Substr => (2..=3, "2 or 3"),
            Function::Split | Function::Join => (2..=2, "2"),
            _ => (1..=1, "1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Input(Input),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Whether evaluating this tree can read the given input.
    pub fn uses(&self, input: Input) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Input(i) => *i == input,
            Expr::Member(target, _) | Expr::Unary(_, target) => target.uses(input),
            Expr::Index(a, b) | Expr::Binary(_, a, b) => a.uses(input) || b.uses(input),
            Expr::Conditional(a, b, c) => a.uses(input) || b.uses(input) || c.uses(input),
            Expr::Call(_, args) => args.iter().any(|arg| arg.uses(input)),
        }
    }
}

/// Parse a complete expression.
///
/// `json` controls whether `this` may be referenced.
pub fn parse(source: &str, json: bool) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        json,
    };
    let expr = parser.conditional()?;
    parser.expect(&Token::Eof, "end of expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    json: bool,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        // The token list always ends with Eof, and the cursor never moves past it.
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let token = self.peek().clone();
        if token.token != Token::Eof {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if &self.peek().token == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &str) -> Result<(), ExprError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ExprError {
        let found = self.peek();
        ExprError::UnexpectedToken {
            expected: expected.to_string(),
            found: found.token.describe(),
            position: found.position,
        }
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let condition = self.binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }

        let then = self.conditional()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    /// Binary operators by ascending precedence level.
    fn binary_op(token: &Token, level: usize) -> Option<BinaryOp> {
        let op = match (level, token) {
            (0, Token::OrOr) => BinaryOp::Or,
            (1, Token::AndAnd) => BinaryOp::And,
            (2, Token::EqEq) => BinaryOp::Eq,
            (2, Token::NotEq) => BinaryOp::NotEq,
            (3, Token::Lt) => BinaryOp::Lt,
            (3, Token::Le) => BinaryOp::Le,
            (3, Token::Gt) => BinaryOp::Gt,
            (3, Token::Ge) => BinaryOp::Ge,
            (4, Token::Plus) => BinaryOp::Add,
            (4, Token::Minus) => BinaryOp::Sub,
            (5, Token::Star) => BinaryOp::Mul,
            (5, Token::Slash) => BinaryOp::Div,
            (5, Token::Percent) => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    const UNARY_LEVEL: usize = 6;

    fn binary(&mut self, level: usize) -> Result<Expr, ExprError> {
        if level == Self::UNARY_LEVEL {
            return self.unary();
        }

        let mut left = self.binary(level + 1)?;
        while let Some(op) = Self::binary_op(&self.peek().token, level) {
            self.advance();
            let right = self.binary(level + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek().token {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            _ => return self.postfix(),
        };
        self.advance();
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let member = match self.advance() {
                    Spanned {
                        token: Token::Ident(name),
                        ..
                    } => name,
                    Spanned {
                        token: Token::Number(n),
                        position,
                    } => {
                        if n.fract() != 0.0 {
                            return Err(ExprError::InvalidNumber {
                                text: n.to_string(),
                                position,
                            });
                        }
                        format!("{n}")
                    }
                    Spanned {
                        token: Token::True,
                        ..
                    } => "true".to_string(),
                    Spanned {
                        token: Token::False,
                        ..
                    } => "false".to_string(),
                    Spanned {
                        token: Token::Null,
                        ..
                    } => "null".to_string(),
                    other => {
                        return Err(ExprError::UnexpectedToken {
                            expected: "member name".to_string(),
                            found: other.token.describe(),
                            position: other.position,
                        });
                    }
                };
                expr = Expr::Member(Box::new(expr), member);
            } else if self.eat(&Token::LBracket) {
                let index = self.conditional()?;
                self.expect(&Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Spanned { token, position } = self.advance();
        match token {
            Token::Number(n) => Ok(Expr::Literal(super::number_value(n)?)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let expr = self.conditional()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Ident(name) if self.peek().token == Token::LParen => self.call(name),
            Token::Ident(name) => self.input(name),
            other => Err(ExprError::UnexpectedToken {
                expected: "a value".to_string(),
                found: other.describe(),
                position,
            }),
        }
    }

    fn input(&self, name: String) -> Result<Expr, ExprError> {
        match name.as_str() {
            "line" => Ok(Expr::Input(Input::Line)),
            "fields" => Ok(Expr::Input(Input::Fields)),
            "this" if self.json => Ok(Expr::Input(Input::This)),
            "this" => Err(ExprError::ThisRequiresJson),
            _ => Err(ExprError::UnknownIdentifier { name }),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExprError> {
        let Some(function) = Function::lookup(&name) else {
            return Err(ExprError::UnknownFunction { name });
        };
        self.expect(&Token::LParen, "'('")?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.conditional()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma, "',' or ')'")?;
            }
        }

        let (accepted, expected) = function.arity();
        if !accepted.contains(&args.len()) {
            return Err(ExprError::Arity {
                name,
                expected,
                found: args.len(),
            });
        }

        Ok(Expr::Call(function, args))
    }
}

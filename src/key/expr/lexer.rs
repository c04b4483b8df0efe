//! Tokenizer for key expressions.

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

impl Token {
    /// Human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::True => "'true'".to_string(),
            Token::False => "'false'".to_string(),
            Token::Null => "'null'".to_string(),
            Token::Eof => "end of expression".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            _ => "",
        }
    }
}

/// Token plus its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    Lexer {
        source,
        chars: source.char_indices().peekable(),
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    tokens: Vec<Spanned>,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Spanned>, ExprError> {
        while let Some(&(position, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }

            let token = if ch.is_ascii_digit() {
                self.number(position)?
            } else if ch == '\'' || ch == '"' {
                self.string(position, ch)?
            } else if ch.is_alphabetic() || ch == '_' || ch == '$' {
                self.word(position)
            } else {
                self.chars.next();
                self.operator(position, ch)?
            };

            self.tokens.push(Spanned { token, position });
        }

        self.tokens.push(Spanned {
            token: Token::Eof,
            position: self.source.len(),
        });
        Ok(self.tokens)
    }

    fn after_dot(&self) -> bool {
        matches!(self.tokens.last(), Some(Spanned { token: Token::Dot, .. }))
    }

    fn next_if_eq(&mut self, expected: char) -> bool {
        self.chars.next_if(|&(_, c)| c == expected).is_some()
    }

    fn take_digits(&mut self) -> usize {
        let mut end = 0;
        while let Some((i, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit()) {
            end = i + c.len_utf8();
        }
        end
    }

    fn number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = self.take_digits();

        // Member access like `items.0.sku` only takes the integer part.
        if !self.after_dot() {
            let mut ahead = self.chars.clone();
            if let (Some((_, '.')), Some((_, c))) = (ahead.next(), ahead.next())
                && c.is_ascii_digit()
            {
                self.chars.next();
                end = self.take_digits();
            }

            let mut ahead = self.chars.clone();
            if let Some((_, 'e' | 'E')) = ahead.next() {
                let sign = ahead.next_if(|&(_, c)| c == '+' || c == '-');
                if let Some((_, c)) = ahead.peek()
                    && c.is_ascii_digit()
                {
                    self.chars.next();
                    if sign.is_some() {
                        self.chars.next();
                    }
                    end = self.take_digits();
                }
            }
        }

        let text = &self.source[start..end];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::InvalidNumber {
                text: text.to_string(),
                position: start,
            })
    }

    fn string(&mut self, start: usize, quote: char) -> Result<Token, ExprError> {
        self.chars.next();
        let mut value = String::new();

        loop {
            let Some((_, ch)) = self.chars.next() else {
                return Err(ExprError::UnterminatedString { position: start });
            };

            match ch {
                c if c == quote => return Ok(Token::Str(value)),
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        return Err(ExprError::UnterminatedString { position: start });
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                }
                c => value.push(c),
            }
        }
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some((i, c)) = self
            .chars
            .next_if(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '$')
        {
            end = i + c.len_utf8();
        }

        match &self.source[start..end] {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            name => Token::Ident(name.to_string()),
        }
    }

    fn operator(&mut self, position: usize, ch: char) -> Result<Token, ExprError> {
        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '?' => Token::Question,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '!' if self.next_if_eq('=') => Token::NotEq,
            '!' => Token::Bang,
            '=' if self.next_if_eq('=') => Token::EqEq,
            '<' if self.next_if_eq('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.next_if_eq('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.next_if_eq('&') => Token::AndAnd,
            '|' if self.next_if_eq('|') => Token::OrOr,
            other => return Err(ExprError::UnexpectedChar { ch: other, position }),
        };
        Ok(token)
    }
}

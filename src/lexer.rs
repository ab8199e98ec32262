use crate::error::{byte_offset_to_position, FountainError, FountainResult, Location};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: std::ops::Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    Str(String),
    // Keywords
    True,
    False,
    Nil,
    Print,
    If,
    Else,
    For,
    Fn,
    Return,
    Break,
    Continue,
    Assert,
    And,
    Or,
    Not,
    Do,
    End,
    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    EqEq,
    NotEq,
    Equal,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Eof,
}

pub(crate) fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "print" => TokenKind::Print,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "fn" => TokenKind::Fn,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "assert" => TokenKind::Assert,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "do" => TokenKind::Do,
        "end" => TokenKind::End,
        _ => return None,
    };
    Some(kind)
}

pub struct Lexer<'a> {
    chars: std::str::Chars<'a>,
    current_index: usize,
    next_index: usize,
    peeked: Option<char>,
    source: &'a str,
    file_path: PathBuf,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars(),
            current_index: 0,
            next_index: 0,
            peeked: None,
            source: input,
            file_path: PathBuf::from("<unknown>"),
        }
    }

    pub fn with_file(input: &'a str, file_path: PathBuf) -> Self {
        Self {
            chars: input.chars(),
            current_index: 0,
            next_index: 0,
            peeked: None,
            source: input,
            file_path,
        }
    }

    fn error_with_location(&self, msg: String, byte_offset: usize) -> FountainError {
        let (line, column) = byte_offset_to_position(self.source, byte_offset);
        FountainError::Lex {
            message: msg,
            location: Some(Location::new(self.file_path.clone(), line, column)),
        }
    }

    pub fn lex(mut self) -> FountainResult<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance_char();
                continue;
            }

            let start = self.current_index;
            let kind = match ch {
                'a'..='z' | 'A'..='Z' | '_' => {
                    tokens.push(self.read_identifier(start));
                    continue;
                }
                '0'..='9' => {
                    tokens.push(self.read_number(start)?);
                    continue;
                }
                '\'' | '"' => {
                    tokens.push(self.read_string(start, ch)?);
                    continue;
                }
                '-' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('-')) {
                        self.consume_comment();
                        continue;
                    }
                    TokenKind::Minus
                }
                '+' => {
                    self.advance_char();
                    TokenKind::Plus
                }
                '*' => {
                    self.advance_char();
                    TokenKind::Star
                }
                '/' => {
                    self.advance_char();
                    TokenKind::Slash
                }
                '=' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('=')) {
                        self.advance_char();
                        TokenKind::EqEq
                    } else {
                        TokenKind::Equal
                    }
                }
                '!' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('=')) {
                        self.advance_char();
                        TokenKind::NotEq
                    } else {
                        return Err(self.error_with_location(
                            "unexpected character '!' (did you mean '!=' or 'not'?)".to_string(),
                            start,
                        ));
                    }
                }
                '<' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('=')) {
                        self.advance_char();
                        TokenKind::LessEq
                    } else {
                        TokenKind::Less
                    }
                }
                '>' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('=')) {
                        self.advance_char();
                        TokenKind::GreaterEq
                    } else {
                        TokenKind::Greater
                    }
                }
                '(' => {
                    self.advance_char();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance_char();
                    TokenKind::RParen
                }
                '{' => {
                    self.advance_char();
                    TokenKind::LBrace
                }
                '}' => {
                    self.advance_char();
                    TokenKind::RBrace
                }
                '[' => {
                    self.advance_char();
                    TokenKind::LBracket
                }
                ']' => {
                    self.advance_char();
                    TokenKind::RBracket
                }
                ',' => {
                    self.advance_char();
                    TokenKind::Comma
                }
                '.' => {
                    self.advance_char();
                    TokenKind::Dot
                }
                ';' => {
                    self.advance_char();
                    TokenKind::Semicolon
                }
                other => {
                    return Err(self
                        .error_with_location(format!("invalid character {:?}", other), start))
                }
            };

            tokens.push(Token {
                kind,
                span: start..self.current_index,
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.current_index..self.current_index,
        });

        Ok(tokens)
    }

    fn consume_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token {
        let mut ident = String::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }

        let kind = keyword(&ident).unwrap_or(TokenKind::Identifier(ident));
        Token {
            kind,
            span: start..self.current_index,
        }
    }

    fn read_number(&mut self, start: usize) -> FountainResult<Token> {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        // A decimal point only belongs to the number when a digit follows,
        // so `t.0`-style postfix and `1.` never swallow the dot.
        if matches!(self.peek_char(), Some('.'))
            && matches!(self.peek_next_char(), Some(c) if c.is_ascii_digit())
        {
            self.advance_char();
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    self.advance_char();
                } else {
                    break;
                }
            }
        }

        let text = &self.source[start..self.current_index];
        let value = text.parse::<f64>().map_err(|err| {
            self.error_with_location(format!("invalid number literal '{}': {}", text, err), start)
        })?;

        Ok(Token {
            kind: TokenKind::Number(value),
            span: start..self.current_index,
        })
    }

    fn read_string(&mut self, start: usize, quote: char) -> FountainResult<Token> {
        self.advance_char(); // consume opening quote
        let mut content = String::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                c if c == quote => {
                    self.advance_char();
                    return Ok(Token {
                        kind: TokenKind::Str(content),
                        span: start..self.current_index,
                    });
                }
                '\n' => break,
                '\\' => {
                    self.advance_char();
                    let escaped = match self.peek_char() {
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(self.error_with_location(
                                format!("unsupported escape sequence '\\{}'", other),
                                self.current_index,
                            ))
                        }
                        None => break,
                    };
                    content.push(escaped);
                    self.advance_char();
                }
                _ => {
                    content.push(ch);
                    self.advance_char();
                }
            }
        }

        Err(self.error_with_location("unterminated string literal".to_string(), start))
    }

    fn peek_char(&mut self) -> Option<char> {
        if let Some(ch) = self.peeked {
            Some(ch)
        } else {
            self.peeked = self.chars.next();
            if let Some(ch) = self.peeked {
                self.next_index = self.current_index + ch.len_utf8();
            }
            self.peeked
        }
    }

    fn peek_next_char(&mut self) -> Option<char> {
        self.peek_char();
        self.chars.clone().next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char();
        if let Some(actual) = ch {
            self.current_index = self.next_index;
            self.peeked = None;
            Some(actual)
        } else {
            None
        }
    }
}

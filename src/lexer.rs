use crate::ast::Position;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Ident,
    Number,
    String,
    Op,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Dot,
    Question,
    Colon,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub pos: Position,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for LexerError {}

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            keywords: keyword_set(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) || ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '/' && self.peek_next() == '/' {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek_next() == '*' {
                self.skip_block_comment()?;
                continue;
            }
            if ch == '"' || ch == '\'' {
                tokens.push(self.read_string(ch)?);
                continue;
            }
            if ch.is_ascii_digit() || (ch == '.' && self.peek_next().is_ascii_digit()) {
                tokens.push(self.read_number()?);
                continue;
            }
            if is_ident_start(ch) {
                tokens.push(self.read_identifier());
                continue;
            }
            let pos = self.pos();
            let simple = match ch {
                '(' => Some(TokenType::LParen),
                ')' => Some(TokenType::RParen),
                '{' => Some(TokenType::LBrace),
                '}' => Some(TokenType::RBrace),
                ',' => Some(TokenType::Comma),
                ';' => Some(TokenType::Semicolon),
                '.' => Some(TokenType::Dot),
                '?' => Some(TokenType::Question),
                ':' => Some(TokenType::Colon),
                _ => None,
            };
            if let Some(typ) = simple {
                self.advance();
                tokens.push(Token {
                    typ,
                    value: ch.to_string(),
                    pos,
                });
                continue;
            }
            match ch {
                '+' | '-' | '*' | '/' | '%' | '=' | '!' | '<' | '>' | '&' | '|' => {
                    tokens.push(self.read_operator()?);
                }
                _ => {
                    return Err(LexerError {
                        message: format!("Unexpected character {:?}", ch),
                        pos,
                    });
                }
            }
        }
        tokens.push(Token {
            typ: TokenType::Eof,
            value: String::new(),
            pos: self.pos(),
        });
        Ok(tokens)
    }

    fn read_operator(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        let ch = self.advance();
        let mut value = ch.to_string();
        let next = self.peek();
        match ch {
            '+' | '-' if next == ch => value.push(self.advance()),
            '&' | '|' if next == ch => value.push(self.advance()),
            '&' | '|' => {
                return Err(LexerError {
                    message: format!("Bitwise operator '{}' is not supported", ch),
                    pos,
                });
            }
            '=' | '!' if next == '=' => {
                value.push(self.advance());
                if self.peek() == '=' {
                    value.push(self.advance());
                }
            }
            '+' | '-' | '*' | '/' | '%' | '<' | '>' if next == '=' => value.push(self.advance()),
            _ => {}
        }
        Ok(Token {
            typ: TokenType::Op,
            value,
            pos,
        })
    }

    fn read_identifier(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() && is_ident_part(self.peek()) {
            text.push(self.advance());
        }
        let typ = if self.keywords.contains(text.as_str()) {
            TokenType::Keyword
        } else {
            TokenType::Ident
        };
        Token {
            typ,
            value: text,
            pos,
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        let mut text = String::new();

        if self.peek() == '0' && matches!(self.peek_next(), 'x' | 'X') {
            self.advance();
            self.advance();
            let mut digits = String::new();
            while !self.at_end() && self.peek().is_ascii_hexdigit() {
                digits.push(self.advance());
            }
            let value = u64::from_str_radix(&digits, 16).map_err(|_| LexerError {
                message: "Invalid hexadecimal literal".to_string(),
                pos,
            })?;
            return Ok(Token {
                typ: TokenType::Number,
                value: value.to_string(),
                pos,
            });
        }

        let mut seen_dot = false;
        let mut seen_exp = false;
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_digit() {
                text.push(self.advance());
                continue;
            }
            if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                text.push(self.advance());
                continue;
            }
            if matches!(ch, 'e' | 'E') && !seen_exp {
                seen_exp = true;
                text.push(self.advance());
                if matches!(self.peek(), '+' | '-') {
                    text.push(self.advance());
                }
                continue;
            }
            break;
        }
        if is_ident_start(self.peek()) {
            return Err(LexerError {
                message: "Identifier starts immediately after numeric literal".to_string(),
                pos,
            });
        }
        Ok(Token {
            typ: TokenType::Number,
            value: text,
            pos,
        })
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let pos = self.pos();
        self.advance();
        let mut out = String::new();
        while !self.at_end() {
            let ch = self.advance();
            if ch == quote {
                return Ok(Token {
                    typ: TokenType::String,
                    value: out,
                    pos,
                });
            }
            if ch == '\\' {
                if self.at_end() {
                    break;
                }
                let esc = self.advance();
                let mapped = match esc {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '0' => '\0',
                    _ => esc,
                };
                out.push(mapped);
                continue;
            }
            if ch == '\n' {
                return Err(LexerError {
                    message: "Unterminated string literal".to_string(),
                    pos,
                });
            }
            out.push(ch);
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            pos,
        })
    }

    fn skip_line_comment(&mut self) {
        while !self.at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexerError> {
        let pos = self.pos();
        self.advance();
        self.advance();
        while !self.at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(LexerError {
            message: "Unterminated block comment".to_string(),
            pos,
        })
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        if self.at_end() {
            '\0'
        } else {
            self.chars[self.index]
        }
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.index + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

pub(crate) fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

pub(crate) fn is_ident_part(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

fn keyword_set() -> HashSet<&'static str> {
    [
        "break",
        "const",
        "continue",
        "else",
        "false",
        "for",
        "function",
        "if",
        "let",
        "null",
        "return",
        "true",
        "undefined",
        "var",
        "while",
    ]
    .into_iter()
    .collect()
}

pub(crate) fn is_reserved_word(word: &str) -> bool {
    keyword_set().contains(word)
        || matches!(
            word,
            "case" | "class" | "delete" | "do" | "in" | "new" | "switch" | "this" | "typeof"
                | "void"
        )
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}

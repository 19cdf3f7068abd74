//! Tokenizer for contract source.

use crate::error::ChainError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    // keywords
    If,
    Else,
    While,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Pass,
    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semicolon,
    Assign,
    // operators
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
    Eof,
}

/// A token and the 1-based line/column where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

pub(crate) fn syntax_error(line: usize, column: usize, message: impl AsRef<str>) -> ChainError {
    ChainError::ContractSyntaxError(format!("line {}:{}: {}", line, column, message.as_ref()))
}

fn keyword(ident: &str) -> Option<Token> {
    Some(match ident {
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        "none" => Token::None,
        "pass" => Token::Pass,
        _ => return None,
    })
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn number(&mut self, first: char, line: usize, column: usize) -> Result<Token, ChainError> {
        let mut text = String::from(first);
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
            } else {
                break;
            }
            self.bump();
        }
        let text = text.replace('_', "");
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| syntax_error(line, column, format!("invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| syntax_error(line, column, format!("integer '{}' out of range", text)))
        }
    }

    fn string(&mut self, quote: char, line: usize, column: usize) -> Result<Token, ChainError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(syntax_error(line, column, "unterminated string literal"))
                }
                Some(c) if c == quote => return Ok(Token::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(other) => {
                        return Err(syntax_error(
                            self.line,
                            self.column,
                            format!("unknown escape '\\{}'", other),
                        ))
                    }
                    None => return Err(syntax_error(line, column, "unterminated string literal")),
                },
                Some(c) => value.push(c),
            }
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ChainError> {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    loop {
        let (line, column) = (lexer.line, lexer.column);
        let c = match lexer.bump() {
            Some(c) => c,
            None => {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            }
        };

        let token = match c {
            c if c.is_whitespace() => continue,
            '#' => {
                while let Some(c) = lexer.peek() {
                    if c == '\n' {
                        break;
                    }
                    lexer.bump();
                }
                continue;
            }
            c if c.is_ascii_digit() => lexer.number(c, line, column)?,
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(c) = lexer.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        lexer.bump();
                    } else {
                        break;
                    }
                }
                keyword(&ident).unwrap_or(Token::Ident(ident))
            }
            '"' | '\'' => lexer.string(c, line, column)?,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            '.' => Token::Dot,
            ';' => Token::Semicolon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' if lexer.eat('=') => Token::EqEq,
            '=' => Token::Assign,
            '!' if lexer.eat('=') => Token::NotEq,
            '<' if lexer.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if lexer.eat('=') => Token::Ge,
            '>' => Token::Gt,
            other => {
                return Err(syntax_error(
                    line,
                    column,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        tokens.push(Spanned {
            token,
            line,
            column,
        });
    }
}

//! Tokenizer for the in-process script language

use scriptbind_core::{Result, ScriptbindError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    /// `@Name`
    Annotation(String),
    Val,
    Var,
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Assign,
    Arrow,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Question,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source
    pub offset: usize,
    /// A line break separates this token from the previous one
    pub newline_before: bool,
}

/// 1-based line and column of a byte offset
pub fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, column)
}

pub fn syntax_error(source: &str, offset: usize, message: impl AsRef<str>) -> ScriptbindError {
    let (line, column) = position(source, offset);
    ScriptbindError::Evaluation(format!("{}:{}: {}", line, column, message.as_ref()))
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    tokens: Vec<Token>,
    newline: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            tokens: Vec::new(),
            newline: false,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some((offset, c)) = self.chars.next() {
            let kind = match c {
                '\n' => {
                    self.newline = true;
                    continue;
                }
                c if c.is_whitespace() => continue,
                '/' if self.eat('/') => {
                    self.skip_line();
                    continue;
                }
                '/' if self.eat('*') => {
                    self.skip_block(offset)?;
                    continue;
                }
                '"' => self.string(offset)?,
                '@' => TokenKind::Annotation(self.word(None)),
                c if c.is_ascii_digit() => self.number(offset, c)?,
                c if c.is_alphabetic() || c == '_' => keyword(self.word(Some(c))),
                '+' => TokenKind::Plus,
                '-' if self.eat('>') => TokenKind::Arrow,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '!' if self.eat('=') => TokenKind::NotEq,
                '!' => TokenKind::Bang,
                '=' if self.eat('=') => TokenKind::EqEq,
                '=' => TokenKind::Assign,
                '<' if self.eat('=') => TokenKind::LtEq,
                '<' => TokenKind::Lt,
                '>' if self.eat('=') => TokenKind::GtEq,
                '>' => TokenKind::Gt,
                '&' if self.eat('&') => TokenKind::AndAnd,
                '|' if self.eat('|') => TokenKind::OrOr,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                '.' => TokenKind::Dot,
                '?' => TokenKind::Question,
                other => {
                    return Err(syntax_error(
                        self.source,
                        offset,
                        format!("unexpected character `{}`", other),
                    ))
                }
            };
            self.push(kind, offset);
        }

        let end = self.source.len();
        self.push(TokenKind::Eof, end);
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, offset: usize) {
        self.tokens.push(Token {
            kind,
            offset,
            newline_before: std::mem::take(&mut self.newline),
        });
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn skip_line(&mut self) {
        while self.chars.next_if(|(_, c)| *c != '\n').is_some() {}
    }

    fn skip_block(&mut self, start: usize) -> Result<()> {
        while let Some((_, c)) = self.chars.next() {
            if c == '\n' {
                self.newline = true;
            }
            if c == '*' && self.eat('/') {
                return Ok(());
            }
        }
        Err(syntax_error(self.source, start, "unterminated comment"))
    }

    fn word(&mut self, first: Option<char>) -> String {
        let mut word: String = first.into_iter().collect();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
            word.push(c);
        }
        word
    }

    fn number(&mut self, start: usize, first: char) -> Result<TokenKind> {
        let mut text = String::from(first);
        let mut is_float = false;
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_ascii_digit() || *c == '_' => {
                    text.push(*c);
                    self.chars.next();
                }
                Some((i, '.')) if !is_float => {
                    // `1.toString()` is a member access, `1.5` a float
                    let after = self.source[i + 1..].chars().next();
                    if !after.is_some_and(|c| c.is_ascii_digit()) {
                        break;
                    }
                    is_float = true;
                    text.push('.');
                    self.chars.next();
                }
                _ => break,
            }
        }

        let text = text.replace('_', "");
        let parsed = if is_float {
            text.parse::<f64>().map(TokenKind::Float).ok()
        } else {
            text.parse::<i64>().map(TokenKind::Int).ok()
        };
        parsed.ok_or_else(|| syntax_error(self.source, start, format!("invalid number `{}`", text)))
    }

    fn string(&mut self, start: usize) -> Result<TokenKind> {
        let mut value = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' => return Ok(TokenKind::Str(value)),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, c @ ('"' | '\\' | '$'))) => value.push(c),
                    Some((offset, other)) => {
                        return Err(syntax_error(
                            self.source,
                            offset,
                            format!("unknown escape `\\{}`", other),
                        ))
                    }
                    None => break,
                },
                c => value.push(c),
            }
        }
        Err(syntax_error(self.source, start, "unterminated string"))
    }
}

fn keyword(word: String) -> TokenKind {
    match word.as_str() {
        "val" => TokenKind::Val,
        "var" => TokenKind::Var,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => TokenKind::Ident(word),
    }
}

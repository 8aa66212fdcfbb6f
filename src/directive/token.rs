//! Bounded JSON tokenizer.
//!
//! Produces a flat, pre-order array of tokens with byte spans into the
//! source. Containers record how many direct children they have; an object
//! counts its keys and its values as separate children, so `{"a":[1]}` is
//! `[Object(size 2), String "a", Array(size 1), Primitive 1]`.
//!
//! Structure is checked strictly (balanced brackets, keys and values
//! alternating, `:` and `,` in place). Primitives are not: any run of
//! printable characters up to the next delimiter is one primitive token, so
//! `01` or `yes` in a section nobody reads cannot sink the document.
//!
//! The token budget is a hard limit: a document needing more tokens is
//! rejected rather than truncated.

use thiserror::Error;

/// Default token budget per directive document.
pub const DEFAULT_MAX_TOKENS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Object,
    Array,
    String,
    Primitive,
}

impl TokenKind {
    pub fn is_container(self) -> bool {
        matches!(self, TokenKind::Object | TokenKind::Array)
    }
}

/// One node of the document. For strings the span excludes the quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub size: usize,
}

impl Token {
    /// The raw source text of this token.
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("more than {0} tokens")]
    NoMemory(usize),

    #[error("invalid character at byte {0}")]
    Invalid(usize),

    #[error("unexpected end of document")]
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrClose,
    Key,
    KeyOrClose,
    Colon,
    CommaOrClose,
}

struct Tokenizer<'a> {
    src: &'a [u8],
    pos: usize,
    max: usize,
    tokens: Vec<Token>,
    /// Indices of the currently open containers.
    open: Vec<usize>,
}

/// Tokenize `src` with at most `max_tokens` tokens.
pub fn tokenize(src: &str, max_tokens: usize) -> Result<Vec<Token>, TokenizeError> {
    let mut t = Tokenizer {
        src: src.as_bytes(),
        pos: 0,
        max: max_tokens,
        tokens: Vec::new(),
        open: Vec::new(),
    };
    t.run()?;
    Ok(t.tokens)
}

impl Tokenizer<'_> {
    fn run(&mut self) -> Result<(), TokenizeError> {
        let mut expect = Expect::Value;
        let mut done = false;

        loop {
            self.skip_whitespace();
            let Some(&c) = self.src.get(self.pos) else {
                break;
            };
            if done {
                return Err(TokenizeError::Invalid(self.pos));
            }

            expect = match (expect, c) {
                (Expect::ValueOrClose, b']') | (Expect::KeyOrClose, b'}') => self.close(c)?,
                (Expect::CommaOrClose, b']' | b'}') => self.close(c)?,
                (Expect::CommaOrClose, b',') => {
                    self.pos += 1;
                    match self.parent_kind() {
                        Some(TokenKind::Object) => Expect::Key,
                        _ => Expect::Value,
                    }
                }
                (Expect::Colon, b':') => {
                    self.pos += 1;
                    Expect::Value
                }
                (Expect::Key | Expect::KeyOrClose, b'"') => {
                    self.string()?;
                    Expect::Colon
                }
                (Expect::Value | Expect::ValueOrClose, b'{') => {
                    self.open_container(TokenKind::Object)?;
                    Expect::KeyOrClose
                }
                (Expect::Value | Expect::ValueOrClose, b'[') => {
                    self.open_container(TokenKind::Array)?;
                    Expect::ValueOrClose
                }
                (Expect::Value | Expect::ValueOrClose, b'"') => {
                    self.string()?;
                    Expect::CommaOrClose
                }
                (Expect::Value | Expect::ValueOrClose, b) if starts_primitive(b) => {
                    self.primitive()?;
                    Expect::CommaOrClose
                }
                _ => return Err(TokenizeError::Invalid(self.pos)),
            };

            if expect == Expect::CommaOrClose && self.open.is_empty() {
                done = true;
            }
        }

        if !done {
            return Err(TokenizeError::Partial);
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\r' | b'\n') = self.src.get(self.pos) {
            self.pos += 1;
        }
    }

    fn parent_kind(&self) -> Option<TokenKind> {
        self.open.last().map(|&idx| self.tokens[idx].kind)
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) -> Result<usize, TokenizeError> {
        if self.tokens.len() >= self.max {
            return Err(TokenizeError::NoMemory(self.max));
        }
        if let Some(&parent) = self.open.last() {
            self.tokens[parent].size += 1;
        }
        self.tokens.push(Token {
            kind,
            start,
            end,
            size: 0,
        });
        Ok(self.tokens.len() - 1)
    }

    fn open_container(&mut self, kind: TokenKind) -> Result<(), TokenizeError> {
        let idx = self.push(kind, self.pos, self.pos)?;
        self.open.push(idx);
        self.pos += 1;
        Ok(())
    }

    fn close(&mut self, c: u8) -> Result<Expect, TokenizeError> {
        let want = if c == b'}' { TokenKind::Object } else { TokenKind::Array };
        match self.open.last() {
            Some(&idx) if self.tokens[idx].kind == want => {
                self.open.pop();
                self.pos += 1;
                self.tokens[idx].end = self.pos;
                Ok(Expect::CommaOrClose)
            }
            _ => Err(TokenizeError::Invalid(self.pos)),
        }
    }

    fn string(&mut self) -> Result<(), TokenizeError> {
        let start = self.pos + 1;
        let mut pos = start;
        loop {
            match self.src.get(pos) {
                None => return Err(TokenizeError::Partial),
                Some(b'"') => break,
                Some(b'\\') => {
                    match self.src.get(pos + 1) {
                        None => return Err(TokenizeError::Partial),
                        Some(b'"' | b'/' | b'\\' | b'b' | b'f' | b'r' | b'n' | b't') => pos += 2,
                        Some(b'u') => {
                            let hex = self.src.get(pos + 2..pos + 6).ok_or(TokenizeError::Partial)?;
                            if !hex.iter().all(u8::is_ascii_hexdigit) {
                                return Err(TokenizeError::Invalid(pos));
                            }
                            pos += 6;
                        }
                        Some(_) => return Err(TokenizeError::Invalid(pos + 1)),
                    }
                }
                Some(&b) if b < 0x20 => return Err(TokenizeError::Invalid(pos)),
                Some(_) => pos += 1,
            }
        }
        self.push(TokenKind::String, start, pos)?;
        self.pos = pos + 1;
        Ok(())
    }

    fn primitive(&mut self) -> Result<(), TokenizeError> {
        let start = self.pos;
        let mut pos = start;
        while let Some(&b) = self.src.get(pos) {
            if is_delimiter(b) {
                break;
            }
            if !(0x20..0x7f).contains(&b) {
                return Err(TokenizeError::Invalid(pos));
            }
            pos += 1;
        }
        self.push(TokenKind::Primitive, start, pos)?;
        self.pos = pos;
        Ok(())
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b',' | b']' | b'}' | b':')
}

fn starts_primitive(b: u8) -> bool {
    !is_delimiter(b) && !matches!(b, b'{' | b'[' | b'"') && (0x20..0x7f).contains(&b)
}

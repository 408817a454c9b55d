//! Class id to display name mapping, read once from a `StringIntLabelMap`
//! text-format file:
//!
//! ```text
//! item {
//!   name: "/m/01g317"
//!   id: 1
//!   display_name: "person"
//! }
//! ```
//!
//! Ids are stored exactly as written. The COCO map starts at 1, which is also
//! what the detection graph emits, so lookups use the graph's class value
//! without any offset.

use crate::error::LabelError;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct LabelCatalog {
    labels: BTreeMap<u32, String>,
}

impl LabelCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            labels = catalog.len(),
            "Label map loaded"
        );
        Ok(catalog)
    }

    pub fn parse(text: &str) -> Result<Self, LabelError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut labels = BTreeMap::new();

        while let Some(token) = parser.next() {
            match token.kind {
                TokenKind::Ident(ref name) if name == "item" => {
                    parser.expect_open(token.line)?;
                    let (id, display) = parser.item(token.line)?;
                    if labels.insert(id, display).is_some() {
                        return Err(LabelError::DuplicateId(id));
                    }
                }
                _ => return Err(parse_error(token.line, "expected `item {`")),
            }
        }

        if labels.is_empty() {
            return Err(LabelError::Empty);
        }

        Ok(Self { labels })
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Display names ordered by id.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u32, S)> for LabelCatalog {
    fn from_iter<T: IntoIterator<Item = (u32, S)>>(iter: T) -> Self {
        Self {
            labels: iter.into_iter().map(|(id, name)| (id, name.into())).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(String),
    Colon,
    Open,
    Close,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
}

fn parse_error(line: usize, message: impl Into<String>) -> LabelError {
    LabelError::Parse {
        line,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, LabelError> {
    let mut tokens = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = index + 1;
        let mut chars = raw_line.chars().peekable();

        while let Some(&c) = chars.peek() {
            let kind = match c {
                '#' => break,
                c if c.is_whitespace() => {
                    chars.next();
                    continue;
                }
                ':' => {
                    chars.next();
                    TokenKind::Colon
                }
                '{' => {
                    chars.next();
                    TokenKind::Open
                }
                '}' => {
                    chars.next();
                    TokenKind::Close
                }
                '"' | '\'' => {
                    chars.next();
                    let mut value = String::new();
                    let mut closed = false;
                    while let Some(ch) = chars.next() {
                        match ch {
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    value.push(escaped);
                                }
                            }
                            ch if ch == c => {
                                closed = true;
                                break;
                            }
                            ch => value.push(ch),
                        }
                    }
                    if !closed {
                        return Err(parse_error(line, "unterminated string"));
                    }
                    TokenKind::Str(value)
                }
                c if c.is_ascii_digit() || c == '-' => {
                    let mut value = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() || d == '-' {
                            value.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Number(value)
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut value = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_alphanumeric() || d == '_' || d == '.' {
                            value.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Ident(value)
                }
                other => return Err(parse_error(line, format!("unexpected character `{other}`"))),
            };
            tokens.push(Token { kind, line });
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect_open(&mut self, line: usize) -> Result<(), LabelError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Open,
                ..
            }) => Ok(()),
            Some(token) => Err(parse_error(token.line, "expected `{`")),
            None => Err(parse_error(line, "expected `{`")),
        }
    }

    /// Parse the body of an `item { ... }` block, consuming the closing brace.
    fn item(&mut self, start: usize) -> Result<(u32, String), LabelError> {
        let mut id = None;
        let mut name = None;
        let mut display_name = None;

        loop {
            let token = self
                .next()
                .ok_or_else(|| parse_error(start, "unterminated `item` block"))?;
            let field = match token.kind {
                TokenKind::Close => break,
                TokenKind::Ident(field) => field,
                _ => return Err(parse_error(token.line, "expected a field name")),
            };

            match self.next() {
                Some(Token {
                    kind: TokenKind::Colon,
                    ..
                }) => {}
                Some(Token {
                    kind: TokenKind::Open,
                    ..
                }) => {
                    // Nested messages such as `keypoints { ... }` carry nothing we need.
                    self.skip_block(token.line)?;
                    continue;
                }
                _ => return Err(parse_error(token.line, format!("expected `:` after `{field}`"))),
            }

            let value = self
                .next()
                .ok_or_else(|| parse_error(token.line, format!("missing value for `{field}`")))?;

            match (field.as_str(), value.kind) {
                ("id", TokenKind::Number(n)) => {
                    let parsed = n
                        .parse::<u32>()
                        .map_err(|_| parse_error(value.line, format!("invalid id `{n}`")))?;
                    id = Some(parsed);
                }
                ("name", TokenKind::Str(s)) => name = Some(s),
                ("display_name", TokenKind::Str(s)) => display_name = Some(s),
                ("id" | "name" | "display_name", _) => {
                    return Err(parse_error(value.line, format!("invalid value for `{field}`")));
                }
                _ => {}
            }
        }

        let id = id.ok_or_else(|| parse_error(start, "item without `id`"))?;
        let label = display_name
            .or(name)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| parse_error(start, format!("item {id} has no display name")))?;

        Ok((id, label))
    }

    fn skip_block(&mut self, line: usize) -> Result<(), LabelError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next() {
                Some(Token {
                    kind: TokenKind::Open,
                    ..
                }) => depth += 1,
                Some(Token {
                    kind: TokenKind::Close,
                    ..
                }) => depth -= 1,
                Some(_) => {}
                None => return Err(parse_error(line, "unterminated block")),
            }
        }
        Ok(())
    }
}

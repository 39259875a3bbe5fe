//! Binding path parser
//!
//! Supports:
//! - `foo.bar.baz` (dot notation)
//! - `foo[0].bar`, `foo.0.bar` (array index; all-digit segments are indices)
//! - `foo['some key']` / `foo["some key"]` (quoted keys)
//! - `foo.{{other.path}}` (nested bindings, resolved through a context)
//! - `items[name='x']` (query: index of the first element whose field matches)
//!
//! Context-free paths are cached, so repeated parses return the same instance.

use std::iter::Peekable;
use std::str::Chars;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{PlayerError, Result};
use crate::util::value::to_display_string;

use super::instance::{BindingInstance, Segment};
use super::keys;

/// Read access used to resolve nested and query segments
pub trait BindingContext {
    fn read(&self, binding: &BindingInstance) -> Option<Value>;
}

impl<F> BindingContext for F
where
    F: Fn(&BindingInstance) -> Option<Value>,
{
    fn read(&self, binding: &BindingInstance) -> Option<Value> {
        self(binding)
    }
}

/// Context for paths that must not depend on data
pub struct NoContext;

impl BindingContext for NoContext {
    fn read(&self, _binding: &BindingInstance) -> Option<Value> {
        None
    }
}

/// Caching binding parser
#[derive(Default)]
pub struct BindingParser {
    cache: DashMap<String, BindingInstance>,
}

impl BindingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a path that needs no data context
    pub fn parse(&self, path: &str) -> Result<BindingInstance> {
        self.parse_with(path, &NoContext)
    }

    /// Parse a path, resolving nested/query segments through `ctx`
    pub fn parse_with(&self, path: &str, ctx: &dyn BindingContext) -> Result<BindingInstance> {
        let path = path.trim();
        let cacheable = !path.contains("{{") && !path.contains('=');

        if cacheable {
            if let Some(cached) = self.cache.get(path) {
                return Ok(cached.clone());
            }
        }

        let segments = PathReader::new(path, ctx, self).read()?;
        let binding = BindingInstance::new(segments);

        if cacheable {
            self.cache.insert(path.to_string(), binding.clone());
        }
        Ok(binding)
    }

    /// Number of cached paths
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn parse_error(path: &str, reason: impl Into<String>) -> PlayerError {
    PlayerError::BindingParse {
        path: path.to_string(),
        reason: reason.into(),
    }
}

struct PathReader<'a> {
    path: &'a str,
    chars: Peekable<Chars<'a>>,
    ctx: &'a dyn BindingContext,
    parser: &'a BindingParser,
    segments: Vec<Segment>,
}

impl<'a> PathReader<'a> {
    fn new(path: &'a str, ctx: &'a dyn BindingContext, parser: &'a BindingParser) -> Self {
        Self {
            path,
            chars: path.chars().peekable(),
            ctx,
            parser,
            segments: Vec::new(),
        }
    }

    fn read(mut self) -> Result<Vec<Segment>> {
        if self.path.is_empty() {
            return Ok(self.segments);
        }

        match self.chars.peek() {
            Some('[') => self.read_bracket()?,
            _ => self.read_text()?,
        }

        while let Some(c) = self.chars.next() {
            match c {
                '.' => self.read_text()?,
                '[' => self.read_bracket_body()?,
                ']' => return Err(parse_error(self.path, "unbalanced ']'")),
                other => {
                    return Err(parse_error(
                        self.path,
                        format!("unexpected '{other}' after segment"),
                    ))
                }
            }
        }

        Ok(self.segments)
    }

    /// `{{ ... }}` body after the opening braces, honouring nesting
    fn read_nested(&mut self) -> Result<String> {
        let mut depth = 1;
        let mut inner = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '{' if self.chars.peek() == Some(&'{') => {
                    self.chars.next();
                    depth += 1;
                    inner.push_str("{{");
                }
                '}' if self.chars.peek() == Some(&'}') => {
                    self.chars.next();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                    inner.push_str("}}");
                }
                other => inner.push(other),
            }
        }
        Err(parse_error(self.path, "unbalanced '{{'"))
    }

    fn resolve_nested(&self, inner: &str) -> Result<Value> {
        let nested = self.parser.parse_with(inner, self.ctx)?;
        self.ctx.read(&nested).ok_or_else(|| {
            parse_error(
                self.path,
                format!("nested binding '{}' has no value", nested.as_string()),
            )
        })
    }

    fn read_text(&mut self) -> Result<()> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '.' | '[' | ']' => break,
                '{' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'{').is_none() {
                        return Err(parse_error(self.path, "stray '{'"));
                    }
                    let inner = self.read_nested()?;
                    let value = self.resolve_nested(&inner)?;
                    text.push_str(&to_display_string(&value));
                }
                '}' => return Err(parse_error(self.path, "unbalanced '}'")),
                _ => {
                    text.push(c);
                    self.chars.next();
                }
            }
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(parse_error(self.path, "empty segment"));
        }
        self.segments.push(keys::segment(text));
        Ok(())
    }

    fn read_bracket(&mut self) -> Result<()> {
        self.chars.next();
        self.read_bracket_body()
    }

    /// Everything after `[` up to the matching `]`
    fn read_bracket_body(&mut self) -> Result<()> {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}

        if let Some(quote) = self.chars.next_if(|c| *c == '\'' || *c == '"') {
            let mut key = String::new();
            loop {
                match self.chars.next() {
                    Some(c) if c == quote => break,
                    Some(c) => key.push(c),
                    None => return Err(parse_error(self.path, "unterminated quote")),
                }
            }
            while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
            if self.chars.next() != Some(']') {
                return Err(parse_error(self.path, "missing ']'"));
            }
            self.segments.push(Segment::key(&key));
            return Ok(());
        }

        let mut raw = String::new();
        let mut closed = false;
        while let Some(c) = self.chars.next() {
            match c {
                ']' => {
                    closed = true;
                    break;
                }
                '[' => return Err(parse_error(self.path, "nested '['")),
                '{' if self.chars.peek() == Some(&'{') => {
                    self.chars.next();
                    let inner = self.read_nested()?;
                    raw.push_str("{{");
                    raw.push_str(&inner);
                    raw.push_str("}}");
                }
                other => raw.push(other),
            }
        }
        if !closed {
            return Err(parse_error(self.path, "unbalanced '['"));
        }

        let raw = raw.trim();
        if raw.is_empty() {
            return Err(parse_error(self.path, "empty segment"));
        }

        let segment = if let Some((field, expected)) = raw.split_once('=') {
            self.query_segment(field, expected)?
        } else if let Some(inner) = raw.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
            match self.resolve_nested(inner)? {
                Value::Number(n) => match n.as_u64() {
                    Some(i) => Segment::Index(i as usize),
                    None => Segment::key(&n.to_string()),
                },
                other => keys::segment(&to_display_string(&other)),
            }
        } else {
            keys::segment(raw)
        };

        self.segments.push(segment);
        Ok(())
    }

    /// `[field=value]`: index of the first array element whose field matches
    fn query_segment(&self, field: &str, expected: &str) -> Result<Segment> {
        let field = field.trim();
        let expected = expected.trim_start_matches('=').trim();
        let expected = expected
            .strip_prefix('\'')
            .and_then(|e| e.strip_suffix('\''))
            .or_else(|| expected.strip_prefix('"').and_then(|e| e.strip_suffix('"')))
            .unwrap_or(expected);

        if field.is_empty() {
            return Err(parse_error(self.path, "query without a field"));
        }

        let target = BindingInstance::new(self.segments.clone());
        let items = match self.ctx.read(&target) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        let position = items.iter().position(|item| {
            item.get(field)
                .is_some_and(|v| to_display_string(v) == expected)
        });

        // No match addresses the next free slot
        Ok(Segment::Index(position.unwrap_or(items.len())))
    }
}

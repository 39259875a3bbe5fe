//! Single-pass string resolver with caching
//!
//! Replaces `{{binding}}` data refs and `@[ expression ]@` expressions inside
//! strings. A string that is exactly one ref keeps the referenced value's type
//! (`"{{count}}"` → `3`, not `"3"`). Templates are tokenized once and cached.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::expression::{ExpressionContext, ExpressionEvaluator};
use crate::util::value::to_display_string;

/// Templates kept tokenized before the cache starts over
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Property names never interpolated by [`StringResolver::resolve_value`]
pub const SKIPPED_PROPERTIES: &[&str] = &["exp"];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// `{{path}}`, path may contain nested refs
    Binding(String),
    /// `@[ exp ]@`
    Expression(String),
}

pub struct StringResolver {
    cache: DashMap<String, Arc<Vec<Token>>>,
    capacity: usize,
}

impl Default for StringResolver {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

/// Byte offset just past the `}}` closing a ref opened before `from`
fn close_binding(template: &str, from: usize) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut depth = 1;
    let mut i = from;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') => {
                depth += 1;
                i += 2;
            }
            (b'}', b'}') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => i += 1,
        }
    }
    None
}

impl StringResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache at most `capacity` templates; a full cache is emptied before the next insert
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: DashMap::new(),
            capacity,
        }
    }

    /// Number of cached templates
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Parse a template into tokens (cached)
    pub fn tokenize(&self, template: &str) -> Arc<Vec<Token>> {
        if let Some(cached) = self.cache.get(template) {
            return Arc::clone(&cached);
        }

        let mut tokens = Vec::new();
        let mut literal_start = 0;
        let mut i = 0;
        let bytes = template.as_bytes();

        while i + 1 < bytes.len() {
            let closing = match (bytes[i], bytes[i + 1]) {
                (b'{', b'{') => close_binding(template, i + 2)
                    .map(|end| (Token::Binding(template[i + 2..end - 2].trim().to_string()), end)),
                (b'@', b'[') => template[i + 2..].find("]@").map(|rel| {
                    let end = i + 2 + rel;
                    (
                        Token::Expression(template[i + 2..end].trim().to_string()),
                        end + 2,
                    )
                }),
                _ => None,
            };

            match closing {
                Some((token, end)) => {
                    if i > literal_start {
                        tokens.push(Token::Literal(literal_start..i));
                    }
                    tokens.push(token);
                    literal_start = end;
                    i = end;
                }
                None => i += 1,
            }
        }

        if literal_start < template.len() {
            tokens.push(Token::Literal(literal_start..template.len()));
        }

        let tokens = Arc::new(tokens);
        if self.capacity == 0 {
            return tokens;
        }
        if self.cache.len() >= self.capacity {
            debug!(capacity = self.capacity, "template cache full, starting over");
            self.cache.clear();
        }
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// True if the string contains anything to resolve
    pub fn has_refs(&self, template: &str) -> bool {
        self.tokenize(template)
            .iter()
            .any(|t| !matches!(t, Token::Literal(_)))
    }

    pub fn resolve_string(
        &self,
        template: &str,
        ctx: &ExpressionContext<'_>,
        evaluator: &ExpressionEvaluator,
    ) -> Result<Value> {
        let tokens = self.tokenize(template);

        if let [only] = tokens.as_slice() {
            return match only {
                Token::Binding(path) => ctx.get(path),
                Token::Expression(exp) => evaluator.evaluate_str(exp, ctx),
                Token::Literal(_) => Ok(Value::String(template.to_string())),
            };
        }

        let mut result = String::with_capacity(template.len() * 2);
        for token in tokens.iter() {
            match token {
                Token::Literal(range) => result.push_str(&template[range.clone()]),
                Token::Binding(path) => result.push_str(&to_display_string(&ctx.get(path)?)),
                Token::Expression(exp) => {
                    let value = evaluator.evaluate_str(exp, ctx)?;
                    result.push_str(&to_display_string(&value));
                }
            }
        }
        Ok(Value::String(result))
    }

    /// Resolve every string inside `value`, skipping `skip` property names
    pub fn resolve_value(
        &self,
        value: &Value,
        ctx: &ExpressionContext<'_>,
        evaluator: &ExpressionEvaluator,
        skip: &[&str],
    ) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_string(s, ctx, evaluator),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, ctx, evaluator, skip))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let resolved = if skip.contains(&key.as_str()) {
                        item.clone()
                    } else {
                        self.resolve_value(item, ctx, evaluator, skip)?
                    };
                    out.insert(key.clone(), resolved);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Global resolver instance
pub static STRING_RESOLVER: Lazy<StringResolver> = Lazy::new(StringResolver::new);

/// Convenience function for resolving one string
pub fn resolve_string(
    template: &str,
    ctx: &ExpressionContext<'_>,
    evaluator: &ExpressionEvaluator,
) -> Result<Value> {
    STRING_RESOLVER.resolve_string(template, ctx, evaluator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::LocalModel;
    use serde_json::json;

    fn resolve(template: &str, data: Value) -> Value {
        let model = LocalModel::new(data);
        let parser = BindingParser::new();
        let evaluator = ExpressionEvaluator::new();
        let ctx = ExpressionContext::new(&model, &parser);
        StringResolver::new()
            .resolve_string(template, &ctx, &evaluator)
            .unwrap()
    }

    #[test]
    fn tokenize_mixed_template() {
        let resolver = StringResolver::new();
        let tokens = resolver.tokenize("Hi {{name}}, @[ 1 + 1 ]@!");
        assert_eq!(
            *tokens,
            vec![
                Token::Literal(0..3),
                Token::Binding("name".into()),
                Token::Literal(11..13),
                Token::Expression("1 + 1".into()),
                Token::Literal(24..25),
            ]
        );
    }

    #[test]
    fn whole_string_ref_keeps_type() {
        assert_eq!(resolve("{{count}}", json!({"count": 3})), json!(3));
        assert_eq!(resolve("@[ {{count}} > 1 ]@", json!({"count": 3})), json!(true));
    }

    #[test]
    fn embedded_refs_stringify() {
        assert_eq!(
            resolve("{{a}} and {{b}}", json!({"a": 1, "b": "two"})),
            json!("1 and two")
        );
        assert_eq!(resolve("x{{missing}}y", json!({})), json!("xy"));
    }

    #[test]
    fn nested_refs_resolve_inner_first() {
        assert_eq!(
            resolve("{{names.{{which}}}}", json!({"which": "b", "names": {"b": "Bee"}})),
            json!("Bee")
        );
    }

    #[test]
    fn cache_never_outgrows_its_capacity() {
        let model = LocalModel::new(json!({"n": 1}));
        let parser = BindingParser::new();
        let evaluator = ExpressionEvaluator::new();
        let ctx = ExpressionContext::new(&model, &parser);
        let resolver = StringResolver::with_capacity(3);

        for i in 0..10 {
            let out = resolver
                .resolve_string(&format!("row {i}: {{{{n}}}}"), &ctx, &evaluator)
                .unwrap();
            assert_eq!(out, json!(format!("row {i}: 1")));
            assert!(resolver.cache_len() <= 3);
        }
        assert!(resolver.has_refs("{{n}}"));
        assert_eq!(StringResolver::with_capacity(0).tokenize("{{n}}").len(), 1);
    }

    #[test]
    fn unterminated_refs_stay_literal() {
        assert_eq!(resolve("{{oops", json!({})), json!("{{oops"));
    }

    #[test]
    fn resolve_value_skips_exp() {
        let model = LocalModel::new(json!({"v": "x"}));
        let parser = BindingParser::new();
        let evaluator = ExpressionEvaluator::new();
        let ctx = ExpressionContext::new(&model, &parser);

        let out = STRING_RESOLVER
            .resolve_value(
                &json!({"label": "{{v}}", "exp": "{{v}} = 1", "list": ["{{v}}"]}),
                &ctx,
                &evaluator,
                SKIPPED_PROPERTIES,
            )
            .unwrap();
        assert_eq!(out, json!({"label": "x", "exp": "{{v}} = 1", "list": ["x"]}));
    }
}

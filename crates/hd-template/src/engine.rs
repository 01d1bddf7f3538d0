//! Placeholder template engine.
//!
//! Templates are plain strings with `{{key}}` placeholders. A leading dot
//! in the key is accepted (`{{.name}}` reads the same as `{{name}}`).
//! Missing keys and JSON nulls render as the empty string; execution never
//! fails. Parsing fails on an unterminated `{{`, which is how a malformed
//! override surfaces as a permanent render error.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte {0}")]
    UnclosedPlaceholder(usize),

    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed template, ready to execute any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0usize;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(TemplateError::UnclosedPlaceholder(offset + start))?;

            let key = after[..end].trim().trim_start_matches('.').trim();
            if key.is_empty() {
                return Err(TemplateError::EmptyPlaceholder(offset + start));
            }
            segments.push(Segment::Placeholder(key.to_string()));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Execute against the data map. Deterministic and side-effect-free.
    pub fn render(&self, data: &Map<String, Value>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    if let Some(value) = data.get(key) {
                        out.push_str(&value_to_string(value));
                    }
                }
            }
        }
        out
    }
}

/// Parse and execute in one step.
pub fn render_str(source: &str, data: &Map<String, Value>) -> Result<String, TemplateError> {
    Ok(Template::parse(source)?.render(data))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // composites render as compact JSON rather than panicking
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_placeholders() {
        let rendered = render_str(
            "Hi {{name}}, order {{order_id}} shipped",
            &data(&[("name", json!("Ada")), ("order_id", json!(1042))]),
        )
        .unwrap();
        assert_eq!(rendered, "Hi Ada, order 1042 shipped");
    }

    #[test]
    fn accepts_dotted_and_padded_keys() {
        let rendered = render_str(
            "Hi {{ .name }}!",
            &data(&[("name", json!("Ada"))]),
        )
        .unwrap();
        assert_eq!(rendered, "Hi Ada!");
    }

    #[test]
    fn missing_key_renders_empty() {
        let rendered = render_str("Hi {{name}}!", &Map::new()).unwrap();
        assert_eq!(rendered, "Hi !");
    }

    #[test]
    fn null_renders_empty() {
        let rendered = render_str("x{{v}}y", &data(&[("v", Value::Null)])).unwrap();
        assert_eq!(rendered, "xy");
    }

    #[test]
    fn unclosed_placeholder_is_a_parse_error() {
        let err = Template::parse("Hi {{.name").unwrap_err();
        assert_eq!(err, TemplateError::UnclosedPlaceholder(3));
    }

    #[test]
    fn empty_placeholder_is_a_parse_error() {
        let err = Template::parse("Hi {{ . }}").unwrap_err();
        assert!(matches!(err, TemplateError::EmptyPlaceholder(_)));
    }

    #[test]
    fn literal_only_template_passes_through() {
        let rendered = render_str("no placeholders here", &Map::new()).unwrap();
        assert_eq!(rendered, "no placeholders here");
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = Template::parse("{{a}}-{{b}}-{{a}}").unwrap();
        let d = data(&[("a", json!("x")), ("b", json!(2))]);
        assert_eq!(template.render(&d), template.render(&d));
        assert_eq!(template.render(&d), "x-2-x");
    }
}

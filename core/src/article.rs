use serde_json::{Map, Value};

/// Name of the free-text field every article must carry.
pub const BODY_FIELD: &str = "body";
/// Name of the optional field used as the identity source.
pub const ID_FIELD: &str = "id";
pub const TITLE_FIELD: &str = "title";

/// A single news article parsed from one line of a `.jsonl` dump.
///
/// The body is normalized once at construction and never touched again.
/// Every other field of the source object is kept verbatim in `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    body: String,
    fields: Map<String, Value>,
}

impl Article {
    /// Builds an article from a parsed JSON object.
    ///
    /// # Returns
    /// * `Some(Article)` - when the object has a string `body` that is non-empty after normalization
    /// * `None` - otherwise; such records are excluded from the pipeline
    pub fn from_object(mut object: Map<String, Value>) -> Option<Self> {
        let body = match object.remove(BODY_FIELD)? {
            Value::String(raw) => normalize_body(&raw),
            _ => return None,
        };
        if body.is_empty() {
            return None;
        }
        Some(Self {
            body,
            fields: object,
        })
    }

    /// Parses one line of input.
    ///
    /// # Errors
    /// Fails only when the line is not valid JSON. A valid JSON value that is
    /// not an object, or an object without a usable body, yields `Ok(None)`.
    pub fn from_json_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        match serde_json::from_str::<Value>(line)? {
            Value::Object(object) => Ok(Self::from_object(object)),
            _ => Ok(None),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// All fields of the source record except `body`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The `id` field rendered as text, if present and non-empty.
    pub fn id(&self) -> Option<String> {
        match self.fields.get(ID_FIELD)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            Value::Bool(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get(TITLE_FIELD).and_then(Value::as_str)
    }
}

/// Replaces line breaks with a single space and trims surrounding whitespace.
pub fn normalize_body(raw: &str) -> String {
    raw.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_body() {
        assert_eq!(normalize_body("Hello\nworld"), "Hello world");
        assert_eq!(normalize_body("  a\r\nb\rc \n"), "a b c");
        assert_eq!(normalize_body(" \n\t "), "");
    }

    #[test]
    fn test_from_json_line_keeps_other_fields() {
        let article = Article::from_json_line(
            r#"{"id":"a1","title":"T","body":"Hello\nworld","tags":["x"]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(article.body(), "Hello world");
        assert_eq!(article.id().as_deref(), Some("a1"));
        assert_eq!(article.title(), Some("T"));
        assert!(article.field(BODY_FIELD).is_none());
        assert_eq!(article.fields().len(), 3);
    }

    #[test]
    fn test_unusable_bodies_are_discarded() {
        for line in [
            r#"{"id":"a2","body":"   "}"#,
            r#"{"id":"a3"}"#,
            r#"{"id":"a4","body":42}"#,
            r#"["not", "an", "object"]"#,
        ] {
            assert_eq!(Article::from_json_line(line).unwrap(), None, "{line}");
        }
        assert!(Article::from_json_line("{not json").is_err());
    }

    #[test]
    fn test_id_rendering() {
        let numeric = Article::from_json_line(r#"{"id":17,"body":"x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(numeric.id().as_deref(), Some("17"));

        let empty = Article::from_json_line(r#"{"id":"","body":"x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(empty.id(), None);

        let null = Article::from_json_line(r#"{"id":null,"body":"x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(null.id(), None);
    }
}

//! Content-addressed keys.
//!
//! A key is the lowercase hex SHA-256 digest of an article's identity source:
//! its `id` when one is present and non-empty, its normalized body otherwise.
//! The digest is computed over the UTF-8 bytes of the source, so a key is
//! reproducible by any implementation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

use crate::article::Article;

/// Primary key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingKey(String);

impl EmbeddingKey {
    /// Length of a key in hex characters.
    pub const LEN: usize = 64;

    pub fn from_identity(source: &str) -> Self {
        Self(hex::encode(Sha256::digest(source.as_bytes())))
    }

    /// Accepts an already-computed key, e.g. one typed on a command line.
    pub fn parse(key: &str) -> Option<Self> {
        let well_formed = key.len() == Self::LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmbeddingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmbeddingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The text an article's key is derived from.
pub fn identity_source(article: &Article) -> Cow<'_, str> {
    match article.id() {
        Some(id) => Cow::Owned(id),
        None => Cow::Borrowed(article.body()),
    }
}

pub fn derive_key(article: &Article) -> EmbeddingKey {
    EmbeddingKey::from_identity(&identity_source(article))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(line: &str) -> Article {
        Article::from_json_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            EmbeddingKey::from_identity("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            derive_key(&article(r#"{"id":"a1","body":"whatever"}"#)).as_str(),
            "f55ff16f66f43360266b95db6f8fec01d76031054306ae4a4b380598f6cfd114"
        );
    }

    #[test]
    fn test_body_is_identity_without_id() {
        let key = derive_key(&article(r#"{"title":"x","body":"Hello\nworld "}"#));
        assert_eq!(
            key.as_str(),
            "64ec88ca00b268e5ba1a35678a1b5316d212f4f366b2477232534a8aeca37f3c"
        );
    }

    #[test]
    fn test_same_id_same_key_regardless_of_other_fields() {
        let a = article(r#"{"id":"n-1","title":"first","body":"one"}"#);
        let b = article(r#"{"id":"n-1","title":"second","body":"two","source":"wire"}"#);
        assert_eq!(derive_key(&a), derive_key(&b));

        let c = article(r#"{"title":"first","body":"same text"}"#);
        let d = article(r#"{"title":"other","body":"same\ntext"}"#);
        assert_eq!(derive_key(&c), derive_key(&d));
    }

    #[test]
    fn test_parse() {
        let key = EmbeddingKey::from_identity("abc");
        assert_eq!(EmbeddingKey::parse(key.as_str()), Some(key));
        assert_eq!(EmbeddingKey::parse("abc"), None);
        assert_eq!(EmbeddingKey::parse(&"G".repeat(64)), None);
    }
}

use crate::error::{ReaderError, ReaderResult};
use crate::gateway::Lexicon;
use crate::model::Definition;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static RE_EDGE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\p{L}\p{N}]+|[^\p{L}\p{N}]+$").unwrap());

/// Lookup panel state as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LookupStatus {
    #[default]
    Closed,
    Pending {
        word: String,
    },
    Ready(Definition),
    Failed {
        word: String,
        message: String,
    },
}

impl LookupStatus {
    /// Open covers the pending request as well as a shown result.
    pub fn is_open(&self) -> bool {
        !matches!(self, LookupStatus::Closed)
    }
}

/// Strip punctuation from both ends of a clicked word.
pub fn clean_word(raw: &str) -> Option<String> {
    let cleaned = RE_EDGE_PUNCT.replace_all(raw.trim(), "");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

pub async fn define_word(
    lexicon: &dyn Lexicon,
    word: &str,
    context: &str,
    target_language: &str,
) -> ReaderResult<Definition> {
    debug!(word, target_language, "Looking up word");
    lexicon
        .define(word, context, target_language)
        .await
        .map_err(|err| {
            warn!(word, "Word lookup failed: {err:#}");
            ReaderError::Lookup(format!("{err:#}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLexicon;

    #[test]
    fn strips_surrounding_punctuation_only() {
        assert_eq!(clean_word("\"Hello,\"").as_deref(), Some("Hello"));
        assert_eq!(clean_word("well-known.").as_deref(), Some("well-known"));
        assert_eq!(clean_word("«سلام»").as_deref(), Some("سلام"));
        assert_eq!(clean_word(" ... "), None);
    }

    #[test]
    fn pending_counts_as_open() {
        assert!(!LookupStatus::Closed.is_open());
        assert!(
            LookupStatus::Pending {
                word: "run".to_string()
            }
            .is_open()
        );
    }

    #[tokio::test]
    async fn lexicon_failure_becomes_lookup_error() {
        let err = define_word(&ScriptedLexicon { fail: true }, "run", "I run.", "fa")
            .await
            .expect_err("failure");
        assert!(matches!(err, ReaderError::Lookup(_)));

        let def = define_word(&ScriptedLexicon { fail: false }, "run", "I run.", "fa")
            .await
            .expect("definition");
        assert_eq!(def.word, "run");
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::stories::source::{SourceError, StorySource};
use crate::stories::types::{InputKind, Target};

static STORY_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:t|telegram)\.me/([^/\s?#]+)/s/(\d+)").expect("story link regex")
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{10,15}$").expect("phone regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Username(String),
    Phone(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: InputKind,
    pub lookup: Lookup,
    /// Second username to try when the first lookup fails.
    pub fallback: Option<String>,
    pub story_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub target: Target,
    pub kind: InputKind,
}

/// Classifies user input without touching the network.
///
/// Permalinks win over everything else, then `@` names, then phone
/// numbers; whatever is left is treated as a bare username.
pub fn classify(input: &str) -> Classified {
    let text = input.trim();

    if let Some(captures) = STORY_LINK_RE.captures(text) {
        let username = captures[1].to_string();
        let story_id = captures[2].parse::<i32>().ok();
        return Classified {
            kind: InputKind::DirectLink,
            lookup: Lookup::Username(username),
            fallback: None,
            story_id,
        };
    }

    if text.starts_with('@') {
        return Classified {
            kind: InputKind::Username,
            lookup: Lookup::Username(text.to_string()),
            fallback: None,
            story_id: None,
        };
    }

    if PHONE_RE.is_match(text) {
        return Classified {
            kind: InputKind::Phone,
            lookup: Lookup::Phone(text.to_string()),
            fallback: None,
            story_id: None,
        };
    }

    Classified {
        kind: InputKind::Username,
        lookup: Lookup::Username(text.to_string()),
        fallback: Some(format!("@{text}")),
        story_id: None,
    }
}

pub async fn resolve_input(source: &dyn StorySource, input: &str) -> Result<Resolved, SourceError> {
    let classified = classify(input);
    let first = match &classified.lookup {
        Lookup::Username(username) => source.resolve_username(username).await,
        Lookup::Phone(phone) => source.resolve_phone(phone).await,
    };

    let target = match (first, &classified.fallback) {
        (Ok(target), _) => target,
        (Err(err @ SourceError::FloodWait(_)), _) => return Err(err),
        (Err(err), Some(fallback)) => {
            debug!("Lookup of '{}' failed ({err}); retrying as {fallback}", input.trim());
            source.resolve_username(fallback).await?
        }
        (Err(err), None) => return Err(err),
    };

    Ok(Resolved {
        target,
        kind: classified.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stories::source::fake::{target, FakeSource};

    #[test]
    fn phone_shaped_input_is_always_a_phone() {
        for input in ["+998901234567", "79001234567", "1234567890", "+123456789012345"] {
            let classified = classify(input);
            assert_eq!(classified.kind, InputKind::Phone, "{input}");
            assert_eq!(classified.lookup, Lookup::Phone(input.to_string()));
        }
    }

    #[test]
    fn digit_strings_outside_the_phone_range_are_usernames() {
        for input in ["123456789", "1234567890123456", "+12345"] {
            assert_eq!(classify(input).kind, InputKind::Username, "{input}");
        }
    }

    #[test]
    fn permalink_extracts_username_and_ignores_suffixes() {
        for input in [
            "t.me/durov/s/123",
            "https://t.me/durov/s/123?single",
            "look at https://www.telegram.me/durov/s/123#top please",
            "T.ME/durov/s/123/",
        ] {
            let classified = classify(input);
            assert_eq!(classified.kind, InputKind::DirectLink, "{input}");
            assert_eq!(classified.lookup, Lookup::Username("durov".to_string()));
            assert_eq!(classified.story_id, Some(123));
            assert_eq!(classified.fallback, None);
        }
    }

    #[test]
    fn at_prefixed_names_resolve_as_is() {
        let classified = classify("  @durov ");
        assert_eq!(classified.kind, InputKind::Username);
        assert_eq!(classified.lookup, Lookup::Username("@durov".to_string()));
        assert_eq!(classified.fallback, None);
    }

    #[test]
    fn bare_names_carry_an_at_fallback() {
        let classified = classify("durov");
        assert_eq!(classified.kind, InputKind::Username);
        assert_eq!(classified.fallback.as_deref(), Some("@durov"));
    }

    #[tokio::test]
    async fn bare_name_retries_once_with_at_prefix() {
        let mut source = FakeSource::default();
        source
            .usernames
            .insert("@someone".to_string(), target(10, "Someone"));

        let resolved = resolve_input(&source, "someone").await.unwrap();
        assert_eq!(resolved.target.id, 10);
        assert_eq!(resolved.kind, InputKind::Username);
        assert_eq!(
            *source.resolve_calls.lock(),
            vec!["someone".to_string(), "@someone".to_string()]
        );
    }

    #[tokio::test]
    async fn unresolvable_name_fails_after_one_retry() {
        let source = FakeSource::default();
        let err = resolve_input(&source, "ghost").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
        assert_eq!(source.resolve_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn phone_lookup_is_not_retried_as_username() {
        let source = FakeSource::default();
        let err = resolve_input(&source, "+998901234567").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
        assert_eq!(*source.resolve_calls.lock(), vec!["+998901234567".to_string()]);
    }

    #[tokio::test]
    async fn permalink_resolves_by_username_portion() {
        let mut source = FakeSource::default();
        source.usernames.insert("durov".to_string(), target(1, "Pavel"));
        let resolved = resolve_input(&source, "https://t.me/durov/s/5?x=1").await.unwrap();
        assert_eq!(resolved.kind, InputKind::DirectLink);
        assert_eq!(resolved.target.display_name, "Pavel");
    }
}

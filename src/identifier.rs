//! User-supplied identifier normalization.

use url::Url;

use crate::errors::{Error, Result};

/// The two identifier forms OpenID distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// An `http`/`https` URL identifier.
    Url,
    /// An XRI (`=`, `@`, `+`, `$`, `!` or `(` global context symbol).
    Xri,
}

/// A normalized claimed identifier.
///
/// Produced from raw user input; this is what discovery consumes and what
/// appears as `claimed_id` in 2.0 messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    id: String,
    kind: IdentifierKind,
}

impl Identifier {
    /// Normalize raw user input.
    ///
    /// Whitespace is trimmed and a leading `xri://` stripped. Input starting
    /// with an XRI global context symbol is classified as an XRI and kept
    /// verbatim. Anything else is treated as a URL: scheme defaulted to
    /// `http://`, fragment removed, host and path brought to URL normal form.
    pub fn normalize(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidIdentifier(input.to_owned()));
        }

        let rest = trimmed.strip_prefix("xri://").unwrap_or(trimmed);
        if rest.starts_with(['=', '@', '+', '$', '!', '(']) {
            return Ok(Self {
                id: rest.to_owned(),
                kind: IdentifierKind::Xri,
            });
        }

        let with_scheme = if has_http_scheme(rest) {
            rest.to_owned()
        } else {
            format!("http://{rest}")
        };
        let mut url =
            Url::parse(&with_scheme).map_err(|_| Error::InvalidIdentifier(input.to_owned()))?;
        url.set_fragment(None);

        Ok(Self {
            id: url.to_string(),
            kind: IdentifierKind::Url,
        })
    }

    /// The normalized identifier string.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Which form the identifier took.
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Whether the identifier is an XRI.
    pub fn is_xri(&self) -> bool {
        self.kind == IdentifierKind::Xri
    }
}

fn has_http_scheme(s: &str) -> bool {
    let lower = s.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scheme_and_trailing_slash() {
        let id = Identifier::normalize("user.example").unwrap();
        assert_eq!(id.as_str(), "http://user.example/");
        assert_eq!(id.kind(), IdentifierKind::Url);
    }

    #[test]
    fn trims_whitespace_and_strips_fragment() {
        let id = Identifier::normalize("  https://User.Example/profile#me \n").unwrap();
        assert_eq!(id.as_str(), "https://user.example/profile");
    }

    #[test]
    fn classifies_xri_forms() {
        for raw in ["=alice", "@example*alice", "xri://=alice"] {
            let id = Identifier::normalize(raw).unwrap();
            assert!(id.is_xri(), "{raw} should be an XRI");
        }
        assert_eq!(Identifier::normalize("xri://=alice").unwrap().as_str(), "=alice");
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Identifier::normalize("   ").is_err());
    }
}

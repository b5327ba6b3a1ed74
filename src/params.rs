//! Ordered parameter list shared by every protocol message.
//!
//! OpenID carries the same logical key-value set in three encodings: the
//! line-based `key:value` body of direct provider responses, the
//! `application/x-www-form-urlencoded` body of requests to the provider, and
//! the query string of the redirect sent through the user agent. `Parameters`
//! holds one ordered list and projects it into each encoding. Insertion order
//! is preserved so that serializations round-trip deterministically.

use std::collections::HashMap;
use std::fmt;

/// Canonical prefix carried by every OpenID protocol field.
const PREFIX: &str = "openid.";

fn canonical(name: &str) -> String {
    if name.starts_with(PREFIX) {
        name.to_owned()
    } else {
        format!("{PREFIX}{name}")
    }
}

fn stripped(name: &str) -> &str {
    name.strip_prefix(PREFIX).unwrap_or(name)
}

/// Ordered list of protocol parameters.
///
/// Names written through [`set`](Parameters::set) are canonicalized with the
/// `openid.` prefix; duplicate names overwrite in place, keeping the original
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pairs: Vec<(String, String)>,
}

impl Parameters {
    /// Create an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the line-based `key:value` body of a direct provider response.
    ///
    /// Lines without a colon are skipped; upstream validators detect missing
    /// required fields. Parsing itself never fails.
    pub fn parse(body: &str) -> Self {
        let mut params = Self::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => params.set(name, value),
                None => tracing::trace!(line, "skipping malformed response line"),
            }
        }
        params
    }

    /// Parse a form-encoded query or body, keeping the names exactly as
    /// given.
    ///
    /// Inbound requests mix canonical `openid.*` fields with plain form
    /// fields such as `openid_identifier`, so no prefixing is applied here.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert_raw(name.into_owned(), value.into_owned());
        }
        params
    }

    /// Set `name` to `value`, canonicalizing the name.
    pub fn set(&mut self, name: &str, value: &str) {
        self.insert_raw(canonical(name), value.to_owned());
    }

    fn insert_raw(&mut self, name: String, value: String) {
        match self.pairs.iter_mut().find(|(n, _)| *n == name) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((name, value)),
        }
    }

    /// Look up `name` in its canonical form.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = canonical(name);
        self.get_raw(&name)
    }

    /// Look up `name` exactly as given, without canonicalization.
    ///
    /// Needed for inbound form fields that are not protocol fields, such as
    /// `openid_identifier` from a login form.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the canonical form of `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Project into a map with the `openid.` prefixes stripped.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.pairs
            .iter()
            .map(|(n, v)| (stripped(n).to_owned(), v.clone()))
            .collect()
    }

    /// Project into a map with the `openid.` prefixes retained.
    pub fn to_map_prefixed(&self) -> HashMap<String, String> {
        self.pairs
            .iter()
            .map(|(n, v)| (canonical(stripped(n)), v.clone()))
            .collect()
    }

    /// Serialize the prefixed pairs as `application/x-www-form-urlencoded`,
    /// for POST bodies and redirect queries.
    pub fn to_form_urlencoded(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.pairs {
            serializer.append_pair(&canonical(stripped(name)), value);
        }
        serializer.finish()
    }

    /// Iterate over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// The canonical wire body of a direct request or response: one
/// `key:value` line per pair, prefixes stripped.
impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.pairs {
            writeln!(f, "{}:{}", stripped(name), value)?;
        }
        Ok(())
    }
}

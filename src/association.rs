//! Association material shared between relying party and provider.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::errors::{Error, Result};

/// The MAC algorithm an association signs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocType {
    /// `HMAC-SHA1`
    HmacSha1,
    /// `HMAC-SHA256`
    HmacSha256,
}

impl AssocType {
    /// The wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }
}

impl fmt::Display for AssocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HMAC-SHA1" => Ok(Self::HmacSha1),
            "HMAC-SHA256" => Ok(Self::HmacSha256),
            _ => Err(Error::MalformedField {
                name: "assoc_type",
                value: s.to_owned(),
            }),
        }
    }
}

/// How the MAC key crosses the wire during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// `no-encryption`: the MAC key travels in the clear, permitted only
    /// over TLS.
    NoEncryption,
    /// `DH-SHA1`
    DhSha1,
    /// `DH-SHA256`
    DhSha256,
}

impl SessionType {
    /// The wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEncryption => "no-encryption",
            Self::DhSha1 => "DH-SHA1",
            Self::DhSha256 => "DH-SHA256",
        }
    }

    /// Whether the MAC key is Diffie–Hellman encrypted in transit.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::DhSha1 | Self::DhSha256)
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no-encryption" => Ok(Self::NoEncryption),
            "DH-SHA1" => Ok(Self::DhSha1),
            "DH-SHA256" => Ok(Self::DhSha256),
            _ => Err(Error::MalformedField {
                name: "session_type",
                value: s.to_owned(),
            }),
        }
    }
}

/// A negotiated association: the shared secret that lets the relying party
/// verify assertion signatures without a per-request round-trip.
///
/// The MAC key is held raw; Diffie–Hellman intermediates are consumed during
/// negotiation and never kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// MAC algorithm.
    pub assoc_type: AssocType,
    /// Negotiated session type.
    pub session_type: SessionType,
    /// Provider-issued handle.
    pub handle: String,
    /// Absolute expiry, epoch seconds.
    pub expires: i64,
    /// Raw MAC key bytes.
    pub mac_key: Vec<u8>,
}

impl Association {
    /// Whether `handle` is a well-formed association handle: 1 to 255 bytes
    /// of printable ASCII (0x21 through 0x7E).
    pub fn valid_handle(handle: &str) -> bool {
        (1..=255).contains(&handle.len())
            && handle.bytes().all(|b| (0x21..=0x7E).contains(&b))
    }

    /// Whether the association may no longer be used for verification.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires <= now
    }

    /// Project into the string map owned by the external store.
    pub fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            ("assoc_type".to_owned(), self.assoc_type.as_str().to_owned()),
            ("session_type".to_owned(), self.session_type.as_str().to_owned()),
            ("mac_key".to_owned(), BASE64.encode(&self.mac_key)),
            ("expires".to_owned(), self.expires.to_string()),
        ])
    }

    /// Rebuild an association from a stored field map.
    pub fn from_fields(handle: &str, fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &'static str| -> Result<&String> {
            fields.get(name).ok_or(Error::MissingField(name))
        };

        let assoc_type = field("assoc_type")?.parse()?;
        let session_type = field("session_type")?.parse()?;
        let mac_key_b64 = field("mac_key")?;
        let mac_key = BASE64.decode(mac_key_b64).map_err(|_| Error::MalformedField {
            name: "mac_key",
            value: mac_key_b64.clone(),
        })?;
        let expires_raw = field("expires")?;
        let expires = expires_raw.parse().map_err(|_| Error::MalformedField {
            name: "expires",
            value: expires_raw.clone(),
        })?;

        Ok(Self {
            assoc_type,
            session_type,
            handle: handle.to_owned(),
            expires,
            mac_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_shape() {
        assert!(Association::valid_handle("h1"));
        assert!(Association::valid_handle("!~printable-ASCII_{42}"));
        assert!(!Association::valid_handle(""));
        assert!(!Association::valid_handle("has space"));
        assert!(!Association::valid_handle("ctrl\x07byte"));
        assert!(!Association::valid_handle("non-ascii-é"));
        assert!(!Association::valid_handle(&"x".repeat(256)));
    }

    #[test]
    fn store_fields_round_trip() {
        let assoc = Association {
            assoc_type: AssocType::HmacSha256,
            session_type: SessionType::DhSha256,
            handle: "h1".to_owned(),
            expires: 1_700_000_000,
            mac_key: vec![1, 2, 3, 4],
        };
        let rebuilt = Association::from_fields("h1", &assoc.to_fields()).unwrap();
        assert_eq!(rebuilt, assoc);
    }

    #[test]
    fn expiry_is_strict() {
        let assoc = Association {
            assoc_type: AssocType::HmacSha1,
            session_type: SessionType::NoEncryption,
            handle: "h".to_owned(),
            expires: 100,
            mac_key: vec![0; 20],
        };
        assert!(assoc.is_expired(100));
        assert!(!assoc.is_expired(99));
    }
}

//! Error and result types.

use thiserror::Error;

/// Errors surfaced by the relying-party engine.
///
/// Association-negotiation failures never appear here: an association is
/// optional, so negotiation problems are logged, recorded in
/// [`RelyingParty::last_error`](crate::RelyingParty::last_error), and the
/// exchange proceeds without a handle.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// No registered discovery handler produced a result for the identifier.
    #[error("discovery failed for `{0}`")]
    DiscoveryFailed(String),

    /// The injected fetcher reported a network-level failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider answered with a status other than 200.
    #[error("unexpected HTTP status {0} from provider")]
    HttpStatus(u16),

    /// The provider's response did not carry the OpenID 2.0 namespace.
    #[error("wrong OpenID 2.0 response")]
    WrongNamespace,

    /// A field the protocol requires at this step was absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field enumerated by `openid.signed` was absent from the response.
    #[error("field `{0}` listed in openid.signed is absent")]
    SignedFieldMissing(String),

    /// A field was present but failed its shape check.
    #[error("malformed field `{name}`: {value}")]
    MalformedField {
        /// Canonical field name.
        name: &'static str,
        /// The offending value.
        value: String,
    },

    /// A discovery handler produced an endpoint that is not an absolute URL.
    #[error("op_endpoint is not an absolute URL: `{0}`")]
    InvalidEndpoint(String),

    /// A `no-encryption` session was requested against a non-TLS endpoint.
    #[error("no-encryption session requires an https endpoint")]
    InsecureSession,

    /// The provider echoed `assoc_type`/`session_type` values differing
    /// from the request.
    #[error("provider echoed association types differing from the request")]
    NegotiationMismatch,

    /// The user-supplied identifier could not be normalized.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// The response nonce did not parse as a timestamped nonce.
    #[error("malformed response nonce `{0}`")]
    MalformedNonce(String),

    /// The response nonce is outside the freshness window.
    #[error("stale response nonce `{0}`")]
    StaleNonce(String),

    /// `openid.return_to` did not match the configured value exactly.
    #[error("return_to mismatch: expected `{expected}`, got `{got}`")]
    ReturnToMismatch {
        /// The value this relying party was configured with.
        expected: String,
        /// The value asserted by the provider.
        got: String,
    },

    /// `openid.mode` was none of the modes this engine understands.
    #[error("unknown mode `{0}`")]
    UnknownMode(String),

    /// The provider sent `mode=error`.
    #[error("provider error: {0}")]
    Provider(String),

    /// Direct verification answered `is_valid:false` and named a handle to
    /// drop. The handle has been removed; the exchange may be restarted.
    #[error("provider invalidated association handle `{0}`")]
    HandleInvalidated(String),

    /// Direct verification answered `is_valid:false`.
    #[error("provider rejected the assertion")]
    AssertionRejected,
}

/// Result type for the relying-party engine.
pub type Result<T> = core::result::Result<T, Error>;

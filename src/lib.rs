#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

//! An implementation of the relying-party side of [OpenID Authentication
//! 2.0][1], with 1.1 compatibility fallback.
//!
//! A relying party (RP) lets users log in with an identifier they control
//! (a URL or an XRI) by bouncing the user agent off the OpenID Provider (OP)
//! that vouches for it and cryptographically verifying the assertion the OP
//! sends back. One exchange runs through four stages:
//!
//! | Stage | What happens |
//! |---|---|
//! | Normalization | the raw identifier is brought to canonical form |
//! | Discovery | an ordered handler chain locates the OP endpoint |
//! | Association | optional Diffie–Hellman negotiation of a shared MAC key |
//! | Verification | HMAC check against the stored key, or a direct `check_authentication` round-trip |
//!
//! The engine is transport-agnostic: HTTP, association persistence and the
//! discovery transports (Yadis, HTML) are injected through the [`Fetcher`],
//! [`AssociationStore`] and [`Discoverer`] traits. It never spawns tasks or
//! blocks on sockets of its own, so it embeds in synchronous and async hosts
//! alike.
//!
//! # Usage
//!
//! Build one [`RelyingParty`] per exchange (or reuse one, calling
//! [`clear`](RelyingParty::clear) in between), then feed it every request
//! that reaches your callback URL:
//!
//! ```ignore
//! use openid_rp::{MemoryStore, Outcome, Parameters, RelyingParty};
//!
//! let mut rp = RelyingParty::new(fetcher, "http://rp.example/cb")
//!     .with_store(MemoryStore::new());
//! rp.register_discoverer(yadis);
//! rp.register_discoverer(html);
//!
//! // The login form posts `openid_identifier`:
//! match rp.authenticate(&Parameters::from_query(query))? {
//!     Outcome::Redirect { url, .. } => send_user_to(url),
//!     Outcome::Verified { claimed_identifier } => log_in(claimed_identifier),
//!     Outcome::Cancel => show_login_page("cancelled"),
//!     other => handle(other),
//! }
//! ```
//!
//! Verification failures (stale nonce, signature mismatch that direct
//! verification does not redeem, `return_to` tampering) surface as
//! [`Error`]; association-negotiation failures do not, since an association
//! is an optimization and the exchange can fall back to direct verification.
//!
//! [1]: https://openid.net/specs/openid-authentication-2_0.html

pub mod association;
pub mod dh;
pub mod discovery;
pub mod errors;
pub mod fetch;
pub mod identifier;
pub mod nonce;
pub mod params;
pub mod rp;
pub mod signature;
pub mod store;

pub use self::{
    association::{AssocType, Association, SessionType},
    dh::DhGroup,
    discovery::{Discoverer, Discovery, DiscoveryChain, ProtocolVersion},
    errors::{Error, Result},
    fetch::{Fetcher, Method, Response},
    identifier::{Identifier, IdentifierKind},
    nonce::Nonce,
    params::Parameters,
    rp::{Outcome, RelyingParty, NS},
    store::{AssociationFields, AssociationStore, MemoryStore},
};

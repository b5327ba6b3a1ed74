//! Provider discovery: result shape and the ordered handler chain.
//!
//! The transports themselves (Yadis, HTML link discovery) live outside this
//! crate; callers register handlers and the chain owns ordering and
//! short-circuit semantics.

use std::fmt;

use url::Url;

use crate::errors::{Error, Result};
use crate::identifier::Identifier;

/// OpenID protocol generation a discovered endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// OpenID 1.1 compatibility mode.
    V1_1,
    /// OpenID Authentication 2.0.
    V2_0,
}

impl ProtocolVersion {
    /// Whether this is the 2.0 protocol.
    pub fn is_v2(&self) -> bool {
        matches!(self, Self::V2_0)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1_1 => "1.1",
            Self::V2_0 => "2.0",
        })
    }
}

/// The outcome of a successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    claimed_identifier: String,
    op_endpoint: String,
    op_local_identifier: String,
    protocol_version: ProtocolVersion,
}

impl Discovery {
    /// Build a discovery result.
    ///
    /// `op_endpoint` must be an absolute URL; `op_local_identifier` defaults
    /// to the claimed identifier when the provider did not delegate.
    pub fn new(
        claimed_identifier: impl Into<String>,
        op_endpoint: impl Into<String>,
        op_local_identifier: Option<String>,
        protocol_version: ProtocolVersion,
    ) -> Result<Self> {
        let claimed_identifier = claimed_identifier.into();
        let op_endpoint = op_endpoint.into();
        Url::parse(&op_endpoint).map_err(|_| Error::InvalidEndpoint(op_endpoint.clone()))?;

        let op_local_identifier =
            op_local_identifier.unwrap_or_else(|| claimed_identifier.clone());
        Ok(Self {
            claimed_identifier,
            op_endpoint,
            op_local_identifier,
            protocol_version,
        })
    }

    /// The identifier the user claims, as normalized.
    pub fn claimed_identifier(&self) -> &str {
        &self.claimed_identifier
    }

    /// The provider endpoint to redirect to.
    pub fn op_endpoint(&self) -> &str {
        &self.op_endpoint
    }

    /// The provider-local identifier (delegation target).
    pub fn op_local_identifier(&self) -> &str {
        &self.op_local_identifier
    }

    /// Protocol generation the endpoint speaks.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}

/// One discovery strategy.
///
/// Returning `Some` completes discovery and short-circuits the chain;
/// `None` passes to the next handler.
pub trait Discoverer {
    /// Attempt discovery for `identifier`.
    fn discover(&mut self, identifier: &Identifier) -> Option<Discovery>;
}

impl<F> Discoverer for F
where
    F: FnMut(&Identifier) -> Option<Discovery>,
{
    fn discover(&mut self, identifier: &Identifier) -> Option<Discovery> {
        self(identifier)
    }
}

/// Ordered list of discovery handlers; first success wins.
#[derive(Default)]
pub struct DiscoveryChain {
    handlers: Vec<Box<dyn Discoverer>>,
}

impl DiscoveryChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; handlers run in registration order.
    pub fn register<D: Discoverer + 'static>(&mut self, handler: D) {
        self.handlers.push(Box::new(handler));
    }

    /// Run the chain for `identifier`.
    pub fn discover(&mut self, identifier: &Identifier) -> Option<Discovery> {
        for (index, handler) in self.handlers.iter_mut().enumerate() {
            if let Some(discovery) = handler.discover(identifier) {
                tracing::debug!(
                    index,
                    endpoint = discovery.op_endpoint(),
                    version = %discovery.protocol_version(),
                    "discovery handler completed"
                );
                return Some(discovery);
            }
        }
        tracing::debug!(identifier = identifier.as_str(), "no discovery handler completed");
        None
    }

    /// Whether any handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

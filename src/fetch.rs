//! Injected HTTP transport interface.

use std::collections::HashMap;

use crate::errors::Result;
use crate::params::Parameters;

/// HTTP method for a fetch. The engine itself only issues POSTs; GET exists
/// for discovery handlers sharing the same transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// A fetched HTTP response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body, decoded to text.
    pub body: String,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
}

impl Response {
    /// Whether the provider answered 200.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// The HTTP transport the engine calls. Implementations own connection
/// handling, TLS, and timeouts.
///
/// For POSTs the parameters must be sent as an
/// `application/x-www-form-urlencoded` body of the prefixed pairs
/// ([`Parameters::to_form_urlencoded`]).
pub trait Fetcher {
    /// Perform one HTTP request.
    ///
    /// Transport-level failures map to
    /// [`Error::Transport`](crate::Error::Transport); HTTP error statuses are
    /// returned as a `Response` and judged by the caller.
    fn fetch(&mut self, url: &str, method: Method, params: &Parameters) -> Result<Response>;
}

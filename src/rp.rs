//! The relying-party state machine.
//!
//! One [`RelyingParty`] drives one authentication exchange at a time:
//! normalize the user's identifier, discover the provider, optionally
//! negotiate an association, redirect the user agent, and verify the
//! assertion the provider eventually sends back. All I/O goes through the
//! injected [`Fetcher`], [`AssociationStore`] and [`Discoverer`] chain; the
//! engine itself never blocks on the network.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::association::{AssocType, Association, SessionType};
use crate::dh::{self, DhGroup, KeyPair, DEFAULT_GROUP};
use crate::discovery::{Discoverer, Discovery, DiscoveryChain};
use crate::errors::{Error, Result};
use crate::fetch::{Fetcher, Method};
use crate::identifier::Identifier;
use crate::nonce::Nonce;
use crate::params::Parameters;
use crate::signature;
use crate::store::AssociationStore;

/// The OpenID Authentication 2.0 namespace URI.
pub const NS: &str = "http://specs.openid.net/auth/2.0";

/// `PROTOCOL_OPENID_DEBUG=1` additionally logs full wire bodies.
static WIRE_DEBUG: Lazy<bool> = Lazy::new(|| {
    std::env::var("PROTOCOL_OPENID_DEBUG")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .is_some_and(|v| v > 0)
});

/// Terminal result of one `authenticate` call.
///
/// The protocol's `error` outcome is the `Err` arm of
/// [`Result<Outcome>`](crate::Result).
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send the user agent to the provider.
    Redirect {
        /// The provider endpoint.
        op_endpoint: String,
        /// Endpoint with the request parameters as query string.
        url: String,
        /// The prefixed request parameters.
        params: Parameters,
    },
    /// The assertion checked out.
    Verified {
        /// The identifier the provider vouched for.
        claimed_identifier: String,
    },
    /// The user declined at the provider.
    Cancel,
    /// 2.0: the provider needs user interaction before it can answer.
    SetupNeeded,
    /// 1.1: the provider supplied a setup URL to send the user to.
    UserSetupUrl {
        /// Where to send the user.
        url: String,
    },
    /// The request carried no OpenID parameters at all.
    Ignored,
}

/// Terminal result of association negotiation. Failure is deliberately not
/// an `Error`: associations are optional and the redirect proceeds bare.
enum Associate {
    Established,
    Skipped,
    Failed,
}

enum AssociateError {
    /// `error_code=unsupported-type` with usable suggested types.
    Unsupported {
        assoc_type: AssocType,
        session_type: SessionType,
    },
    Other(Error),
}

impl From<Error> for AssociateError {
    fn from(err: Error) -> Self {
        Self::Other(err)
    }
}

/// The OpenID relying party.
///
/// Holds the mutable state of one authentication exchange. Not thread-safe;
/// reuse across exchanges requires [`clear`](Self::clear) in between.
pub struct RelyingParty<F: Fetcher> {
    return_to: String,
    realm: Option<String>,
    assoc_type: AssocType,
    session_type: SessionType,
    dh_group: Option<DhGroup>,
    fetcher: F,
    store: Option<Box<dyn AssociationStore>>,
    discoverers: DiscoveryChain,
    discovery: Option<Discovery>,
    association: Option<Association>,
    last_error: Option<String>,
    associate_retry_used: bool,
}

impl<F: Fetcher> RelyingParty<F> {
    /// Create a relying party that receives assertions at `return_to`.
    ///
    /// `return_to` is mandatory by construction; there is no way to reach
    /// [`authenticate`](Self::authenticate) without it.
    pub fn new(fetcher: F, return_to: impl Into<String>) -> Self {
        Self {
            return_to: return_to.into(),
            realm: None,
            assoc_type: AssocType::HmacSha256,
            session_type: SessionType::DhSha256,
            dh_group: None,
            fetcher,
            store: None,
            discoverers: DiscoveryChain::new(),
            discovery: None,
            association: None,
            last_error: None,
            associate_retry_used: false,
        }
    }

    /// Configure association storage. Without a store, association
    /// negotiation is skipped and every assertion is verified directly.
    pub fn with_store(mut self, store: impl AssociationStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Configure an explicit realm. Defaults to `return_to`.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Configure the association and session types to request first.
    /// Defaults to `HMAC-SHA256` over `DH-SHA256`.
    pub fn with_association_types(mut self, assoc: AssocType, session: SessionType) -> Self {
        self.assoc_type = assoc;
        self.session_type = session;
        self
    }

    /// Configure a custom Diffie–Hellman group; its parameters are then sent
    /// as `dh_modulus`/`dh_gen`. Defaults to the well-known group, which is
    /// never sent explicitly.
    pub fn with_dh_group(mut self, group: DhGroup) -> Self {
        self.dh_group = Some(group);
        self
    }

    /// Append a discovery handler; handlers run in registration order
    /// (conventionally Yadis first, then HTML).
    pub fn register_discoverer(&mut self, handler: impl Discoverer + 'static) {
        self.discoverers.register(handler);
    }

    /// Reset the per-exchange state so the context can run another exchange.
    pub fn clear(&mut self) {
        self.discovery = None;
        self.association = None;
        self.last_error = None;
        self.associate_retry_used = false;
    }

    /// Last failure reason, for diagnostics. Never sent to the provider.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Result of the most recent discovery, if any.
    pub fn discovery(&self) -> Option<&Discovery> {
        self.discovery.as_ref()
    }

    /// The association negotiated in this exchange, if any.
    pub fn association(&self) -> Option<&Association> {
        self.association.as_ref()
    }

    /// The configured `return_to` URL.
    pub fn return_to(&self) -> &str {
        &self.return_to
    }

    /// Drive the exchange one step, based on what `params` contains.
    ///
    /// A request with an `openid_identifier` form field starts an exchange:
    /// discovery, optional association, and a
    /// [`Redirect`](Outcome::Redirect). A request with an `openid.mode` is a
    /// provider callback and yields the assertion's outcome. Anything else
    /// is [`Ignored`](Outcome::Ignored).
    pub fn authenticate(&mut self, params: &Parameters) -> Result<Outcome> {
        let result = self.dispatch(params);
        if let Err(err) = &result {
            let reason = err.to_string();
            warn!(error = %reason, "authentication failed");
            self.last_error = Some(reason);
        }
        result
    }

    fn dispatch(&mut self, params: &Parameters) -> Result<Outcome> {
        if let Some(identifier) = params.get_raw("openid_identifier") {
            return self.begin(identifier);
        }
        if params.contains("mode") {
            return self.finish(params);
        }
        debug!("request carries no OpenID parameters");
        Ok(Outcome::Ignored)
    }

    /// User-initiated branch: normalize, discover, associate, redirect.
    fn begin(&mut self, raw_identifier: &str) -> Result<Outcome> {
        let identifier = Identifier::normalize(raw_identifier)?;
        debug!(identifier = identifier.as_str(), "starting authentication");

        let discovery = self
            .discoverers
            .discover(&identifier)
            .ok_or_else(|| Error::DiscoveryFailed(identifier.as_str().to_owned()))?;
        self.discovery = Some(discovery);

        match self.associate() {
            Associate::Established => {}
            Associate::Skipped => debug!("proceeding without association"),
            Associate::Failed => warn!(
                error = self.last_error.as_deref().unwrap_or(""),
                "association negotiation failed; proceeding without a handle"
            ),
        }

        self.redirect()
    }

    /// Provider-callback branch: classify `openid.mode`.
    fn finish(&mut self, params: &Parameters) -> Result<Outcome> {
        let mode = match params.get("mode") {
            Some(mode) => mode,
            None => return Ok(Outcome::Ignored),
        };
        let v2 = params.get("ns") == Some(NS);
        debug!(mode, v2, "provider callback");

        match mode {
            "cancel" => Ok(Outcome::Cancel),
            "error" => Err(Error::Provider(
                params
                    .get("error")
                    .unwrap_or("provider reported an error")
                    .to_owned(),
            )),
            "setup_needed" if v2 => Ok(Outcome::SetupNeeded),
            _ => {
                if !v2 {
                    if let Some(url) = params.get("user_setup_url") {
                        return Ok(Outcome::UserSetupUrl {
                            url: url.to_owned(),
                        });
                    }
                }
                if mode == "id_res" {
                    self.verify(params, v2)
                } else {
                    Err(Error::UnknownMode(mode.to_owned()))
                }
            }
        }
    }

    // ---- association negotiation -------------------------------------

    fn associate(&mut self) -> Associate {
        if self.store.is_none() {
            debug!("no association store configured; skipping association");
            return Associate::Skipped;
        }
        let op_endpoint = match &self.discovery {
            Some(discovery) => discovery.op_endpoint().to_owned(),
            None => return Associate::Skipped,
        };

        let mut assoc_type = self.assoc_type;
        let mut session_type = self.session_type;
        loop {
            match self.associate_once(&op_endpoint, assoc_type, session_type) {
                Ok(association) => {
                    debug!(
                        handle = %association.handle,
                        assoc_type = %association.assoc_type,
                        session_type = %association.session_type,
                        "association established"
                    );
                    if let Some(store) = &mut self.store {
                        store.store(&association.handle, &association.to_fields());
                    }
                    self.association = Some(association);
                    return Associate::Established;
                }
                Err(AssociateError::Unsupported {
                    assoc_type: suggested_assoc,
                    session_type: suggested_session,
                }) => {
                    if self.associate_retry_used {
                        self.last_error =
                            Some("provider rejected the renegotiated association types".to_owned());
                        self.association = None;
                        return Associate::Failed;
                    }
                    debug!(
                        assoc_type = %suggested_assoc,
                        session_type = %suggested_session,
                        "adopting provider-suggested association types"
                    );
                    self.associate_retry_used = true;
                    assoc_type = suggested_assoc;
                    session_type = suggested_session;
                }
                Err(AssociateError::Other(err)) => {
                    self.last_error = Some(err.to_string());
                    self.association = None;
                    return Associate::Failed;
                }
            }
        }
    }

    fn associate_once(
        &mut self,
        op_endpoint: &str,
        assoc_type: AssocType,
        session_type: SessionType,
    ) -> core::result::Result<Association, AssociateError> {
        // A cleartext MAC key may only cross a TLS link.
        if !session_type.is_encrypted() && !op_endpoint.starts_with("https://") {
            return Err(Error::InsecureSession.into());
        }

        let mut request = Parameters::new();
        request.set("ns", NS);
        request.set("mode", "associate");
        request.set("assoc_type", assoc_type.as_str());
        request.set("session_type", session_type.as_str());

        let dh_state = if session_type.is_encrypted() {
            let group = self.dh_group.clone().unwrap_or_else(|| DEFAULT_GROUP.clone());
            if self.dh_group.is_some() {
                request.set("dh_modulus", &dh::to_base64(&group.modulus));
                request.set("dh_gen", &dh::to_base64(&group.generator));
            }
            let keypair = KeyPair::generate(&mut OsRng, &group);
            request.set("dh_consumer_public", &dh::to_base64(keypair.public()));
            Some((keypair, group))
        } else {
            None
        };

        if *WIRE_DEBUG {
            debug!(request = %request, "associate request");
        }
        let response = self.fetcher.fetch(op_endpoint, Method::Post, &request)?;
        if !response.is_success() {
            return Err(Error::HttpStatus(response.status).into());
        }
        if *WIRE_DEBUG {
            debug!(body = %response.body, "associate response");
        }

        let fields = Parameters::parse(&response.body);
        if fields.get("ns") != Some(NS) {
            return Err(Error::WrongNamespace.into());
        }

        if let Some(message) = fields.get("error") {
            if fields.get("error_code") == Some("unsupported-type") {
                if let (Some(session), Some(assoc)) =
                    (fields.get("session_type"), fields.get("assoc_type"))
                {
                    if let (Ok(session_type), Ok(assoc_type)) = (session.parse(), assoc.parse()) {
                        return Err(AssociateError::Unsupported {
                            assoc_type,
                            session_type,
                        });
                    }
                }
            }
            return Err(Error::Provider(message.to_owned()).into());
        }

        let handle = fields
            .get("assoc_handle")
            .ok_or(Error::MissingField("assoc_handle"))?;
        let echoed_session = fields
            .get("session_type")
            .ok_or(Error::MissingField("session_type"))?;
        let echoed_assoc = fields
            .get("assoc_type")
            .ok_or(Error::MissingField("assoc_type"))?;
        let expires_in_raw = fields
            .get("expires_in")
            .ok_or(Error::MissingField("expires_in"))?;

        if echoed_session != session_type.as_str() || echoed_assoc != assoc_type.as_str() {
            return Err(Error::NegotiationMismatch.into());
        }
        if expires_in_raw.is_empty() || !expires_in_raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::MalformedField {
                name: "expires_in",
                value: expires_in_raw.to_owned(),
            }
            .into());
        }
        let expires_in: i64 = expires_in_raw.parse().map_err(|_| Error::MalformedField {
            name: "expires_in",
            value: expires_in_raw.to_owned(),
        })?;

        let mac_key = if let Some((keypair, group)) = &dh_state {
            let server_public_raw = fields
                .get("dh_server_public")
                .ok_or(Error::MissingField("dh_server_public"))?;
            let enc_mac_key_raw = fields
                .get("enc_mac_key")
                .ok_or(Error::MissingField("enc_mac_key"))?;
            let server_public = dh::from_base64("dh_server_public", server_public_raw)?;
            let enc_mac_key = BASE64.decode(enc_mac_key_raw).map_err(|_| Error::MalformedField {
                name: "enc_mac_key",
                value: enc_mac_key_raw.to_owned(),
            })?;
            let shared = keypair.shared_secret(&server_public, group);
            if session_type == SessionType::DhSha1 {
                dh::xor_secret::<Sha1>(&shared, &enc_mac_key)?
            } else {
                dh::xor_secret::<Sha256>(&shared, &enc_mac_key)?
            }
        } else {
            let mac_key_raw = fields.get("mac_key").ok_or(Error::MissingField("mac_key"))?;
            BASE64.decode(mac_key_raw).map_err(|_| Error::MalformedField {
                name: "mac_key",
                value: mac_key_raw.to_owned(),
            })?
        };

        if !Association::valid_handle(handle) {
            return Err(Error::MalformedField {
                name: "assoc_handle",
                value: handle.to_owned(),
            }
            .into());
        }

        Ok(Association {
            assoc_type,
            session_type,
            handle: handle.to_owned(),
            expires: Utc::now().timestamp() + expires_in,
            mac_key,
        })
    }

    // ---- verification pipeline ---------------------------------------

    fn verify(&mut self, params: &Parameters, v2: bool) -> Result<Outcome> {
        let now = Utc::now().timestamp();

        let return_to = params
            .get("return_to")
            .ok_or(Error::MissingField("openid.return_to"))?;
        if return_to != self.return_to {
            return Err(Error::ReturnToMismatch {
                expected: self.return_to.clone(),
                got: return_to.to_owned(),
            });
        }

        let identity = params
            .get("identity")
            .ok_or(Error::MissingField("openid.identity"))?
            .to_owned();

        if v2 {
            let raw = params
                .get("response_nonce")
                .ok_or(Error::MissingField("openid.response_nonce"))?;
            let nonce = Nonce::parse(raw)?;
            if !nonce.is_fresh(now) {
                return Err(Error::StaleNonce(raw.to_owned()));
            }
        }

        if let Some(handle) = params.get("invalidate_handle").map(str::to_owned) {
            self.remove_handle(&handle);
        }

        if self.signature_matches(params, now) {
            let claimed = params.get("claimed_id").unwrap_or(&identity).to_owned();
            debug!(claimed_identifier = %claimed, "assertion verified against stored association");
            return Ok(Outcome::Verified {
                claimed_identifier: claimed,
            });
        }

        self.direct_verify(params, v2, &identity)
    }

    /// Try the stored-association signature path. Any shortfall (no store,
    /// unknown or expired handle, unusable record, bad signature) falls
    /// through to direct verification.
    fn signature_matches(&mut self, params: &Parameters, now: i64) -> bool {
        let handle = match params.get("assoc_handle") {
            Some(handle) => handle.to_owned(),
            None => return false,
        };
        let fields = match self.store.as_ref().and_then(|store| store.find(&handle)) {
            Some(fields) => fields,
            None => {
                debug!(handle = %handle, "no stored association for handle");
                return false;
            }
        };
        let association = match Association::from_fields(&handle, &fields) {
            Ok(association) => association,
            Err(err) => {
                warn!(handle = %handle, error = %err, "stored association is unusable");
                return false;
            }
        };
        if association.is_expired(now) {
            debug!(handle = %handle, "stored association expired");
            self.remove_handle(&handle);
            return false;
        }

        let signed = match params.get("signed") {
            Some(signed) => signed,
            None => return false,
        };
        let sig = match params.get("sig") {
            Some(sig) => sig,
            None => return false,
        };

        match signature::verify(
            association.assoc_type,
            &association.mac_key,
            signed,
            &params.to_map_prefixed(),
            sig,
        ) {
            Ok(matched) => {
                if !matched {
                    debug!(handle = %handle, "signature mismatch");
                }
                matched
            }
            Err(err) => {
                debug!(handle = %handle, error = %err, "signature not checkable");
                false
            }
        }
    }

    /// Ask the provider to validate its own assertion
    /// (`check_authentication`).
    fn direct_verify(&mut self, params: &Parameters, v2: bool, identity: &str) -> Result<Outcome> {
        let op_endpoint = if v2 {
            params
                .get("op_endpoint")
                .ok_or(Error::MissingField("openid.op_endpoint"))?
                .to_owned()
        } else {
            // 1.1 assertions name no endpoint; rediscover from the identity.
            let identifier = Identifier::normalize(identity)?;
            let discovery = self
                .discoverers
                .discover(&identifier)
                .ok_or_else(|| Error::DiscoveryFailed(identifier.as_str().to_owned()))?;
            let endpoint = discovery.op_endpoint().to_owned();
            self.discovery = Some(discovery);
            endpoint
        };

        let mut check = params.clone();
        check.set("mode", "check_authentication");
        debug!(endpoint = %op_endpoint, "falling back to direct verification");
        if *WIRE_DEBUG {
            debug!(request = %check, "check_authentication request");
        }

        let response = self.fetcher.fetch(&op_endpoint, Method::Post, &check)?;
        if !response.is_success() {
            return Err(Error::HttpStatus(response.status));
        }
        if *WIRE_DEBUG {
            debug!(body = %response.body, "check_authentication response");
        }

        let fields = Parameters::parse(&response.body);
        let invalidated = fields.get("invalidate_handle").map(str::to_owned);
        if let Some(handle) = &invalidated {
            self.remove_handle(handle);
        }

        if fields.get("is_valid") == Some("true") {
            let claimed = params.get("claimed_id").unwrap_or(identity).to_owned();
            debug!(claimed_identifier = %claimed, "assertion verified directly");
            Ok(Outcome::Verified {
                claimed_identifier: claimed,
            })
        } else {
            match invalidated {
                Some(handle) => Err(Error::HandleInvalidated(handle)),
                None => Err(Error::AssertionRejected),
            }
        }
    }

    fn remove_handle(&mut self, handle: &str) {
        if self
            .association
            .as_ref()
            .is_some_and(|association| association.handle == handle)
        {
            self.association = None;
        }
        if let Some(store) = &mut self.store {
            debug!(handle = %handle, "dropping association handle");
            store.remove(handle);
        }
    }

    // ---- redirect construction ---------------------------------------

    fn redirect(&mut self) -> Result<Outcome> {
        let discovery = match &self.discovery {
            Some(discovery) => discovery,
            None => return Err(Error::DiscoveryFailed(String::new())),
        };
        let v2 = discovery.protocol_version().is_v2();

        let mut params = Parameters::new();
        params.set("mode", "checkid_setup");
        if v2 {
            params.set("ns", NS);
        }
        params.set("identity", discovery.op_local_identifier());
        if v2 {
            params.set("claimed_id", discovery.claimed_identifier());
        }
        params.set("return_to", &self.return_to);
        let realm = self.realm.as_deref().unwrap_or(&self.return_to);
        if v2 {
            params.set("realm", realm);
        } else {
            params.set("trust_root", realm);
        }
        if let Some(association) = &self.association {
            params.set("assoc_handle", &association.handle);
        }

        let op_endpoint = discovery.op_endpoint().to_owned();
        let separator = if op_endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{op_endpoint}{separator}{}", params.to_form_urlencoded());
        debug!(url = %url, "redirecting user agent to provider");

        Ok(Outcome::Redirect {
            op_endpoint,
            url,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Response;
    use crate::store::MemoryStore;

    /// A fetcher for paths that must not touch the network.
    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch(&mut self, url: &str, _: Method, _: &Parameters) -> Result<Response> {
            panic!("unexpected fetch of {url}");
        }
    }

    fn rp() -> RelyingParty<NoFetch> {
        RelyingParty::new(NoFetch, "http://rp.example/cb").with_store(MemoryStore::new())
    }

    #[test]
    fn unrelated_request_is_ignored() {
        let params = Parameters::from_query("utm_source=newsletter");
        assert_eq!(rp().authenticate(&params).unwrap(), Outcome::Ignored);
    }

    #[test]
    fn cancel_passes_through() {
        let params = Parameters::from_query("openid.mode=cancel");
        assert_eq!(rp().authenticate(&params).unwrap(), Outcome::Cancel);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut rp = rp();
        let params = Parameters::from_query("openid.mode=checkid_teardown");
        let err = rp.authenticate(&params).unwrap_err();
        assert!(matches!(err, Error::UnknownMode(mode) if mode == "checkid_teardown"));
        assert!(rp.last_error().unwrap().contains("checkid_teardown"));
    }

    #[test]
    fn provider_error_mode_surfaces_its_message() {
        let params = Parameters::from_query("openid.mode=error&openid.error=try+later");
        let err = rp().authenticate(&params).unwrap_err();
        assert!(matches!(err, Error::Provider(message) if message == "try later"));
    }

    #[test]
    fn setup_needed_requires_the_v2_namespace() {
        let mut v2 = Parameters::from_query("openid.mode=setup_needed");
        v2.set("ns", NS);
        assert_eq!(rp().authenticate(&v2).unwrap(), Outcome::SetupNeeded);

        let v1 = Parameters::from_query("openid.mode=setup_needed");
        assert!(rp().authenticate(&v1).is_err());
    }

    #[test]
    fn user_setup_url_is_forwarded_for_v1() {
        let params = Parameters::from_query(
            "openid.mode=id_res&openid.user_setup_url=https%3A%2F%2Fop.example%2Fsetup",
        );
        assert_eq!(
            rp().authenticate(&params).unwrap(),
            Outcome::UserSetupUrl {
                url: "https://op.example/setup".to_owned()
            }
        );
    }

    #[test]
    fn clear_resets_exchange_state() {
        let mut rp = rp();
        let params = Parameters::from_query("openid.mode=strange");
        let _ = rp.authenticate(&params);
        assert!(rp.last_error().is_some());

        rp.clear();
        assert!(rp.last_error().is_none());
        assert!(rp.discovery().is_none());
        assert!(rp.association().is_none());
    }
}

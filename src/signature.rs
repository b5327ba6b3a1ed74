//! Assertion signature recomputation.
//!
//! The provider signs the fields enumerated by `openid.signed` with the
//! association MAC key; the relying party recomputes the HMAC over the same
//! canonical body and compares in constant time.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::association::AssocType;
use crate::errors::{Error, Result};

/// Compute the HMAC over the canonical signed-fields body.
///
/// `signed` is the comma-separated `openid.signed` value; `params` is the
/// prefixed parameter map. Field order follows `signed` exactly, each line
/// `name:value\n` with the value taken from `openid.<name>`.
pub fn compute(
    assoc_type: AssocType,
    mac_key: &[u8],
    signed: &str,
    params: &HashMap<String, String>,
) -> Result<Vec<u8>> {
    let body = signed_body(signed, params)?;
    match assoc_type {
        AssocType::HmacSha1 => hmac_tag::<Hmac<Sha1>>(mac_key, body.as_bytes()),
        AssocType::HmacSha256 => hmac_tag::<Hmac<Sha256>>(mac_key, body.as_bytes()),
    }
}

/// Recompute the signature and compare it against the base64 `openid.sig`
/// value, constant-time.
pub fn verify(
    assoc_type: AssocType,
    mac_key: &[u8],
    signed: &str,
    params: &HashMap<String, String>,
    sig: &str,
) -> Result<bool> {
    let expected = compute(assoc_type, mac_key, signed, params)?;
    let provided = BASE64.decode(sig).map_err(|_| Error::MalformedField {
        name: "sig",
        value: sig.to_owned(),
    })?;
    Ok(expected.as_slice().ct_eq(&provided).into())
}

fn signed_body(signed: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut body = String::new();
    for name in signed.split(',') {
        let value = params
            .get(&format!("openid.{name}"))
            .ok_or_else(|| Error::SignedFieldMissing(name.to_owned()))?;
        body.push_str(name);
        body.push(':');
        body.push_str(value);
        body.push('\n');
    }
    Ok(body)
}

fn hmac_tag<M: Mac + digest::KeyInit>(key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as digest::KeyInit>::new_from_slice(key).map_err(|_| Error::MalformedField {
        name: "mac_key",
        value: format!("unusable key of {} bytes", key.len()),
    })?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> HashMap<String, String> {
        HashMap::from([
            ("openid.mode".to_owned(), "id_res".to_owned()),
            ("openid.identity".to_owned(), "http://user.example/".to_owned()),
            ("openid.return_to".to_owned(), "http://rp.example/cb".to_owned()),
        ])
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let params = sample_params();
        let a = compute(AssocType::HmacSha256, b"key", "mode,identity,return_to", &params).unwrap();
        let b = compute(AssocType::HmacSha256, b"key", "mode,identity,return_to", &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn field_order_follows_signed_list() {
        let params = sample_params();
        let a = compute(AssocType::HmacSha1, b"key", "mode,identity", &params).unwrap();
        let b = compute(AssocType::HmacSha1, b"key", "identity,mode", &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_signed_field_fails() {
        let params = sample_params();
        let err = compute(AssocType::HmacSha1, b"key", "mode,assoc_handle", &params).unwrap_err();
        assert!(matches!(err, Error::SignedFieldMissing(name) if name == "assoc_handle"));
    }

    #[test]
    fn verify_accepts_own_signature_and_rejects_tampering() {
        let params = sample_params();
        let signed = "mode,identity,return_to";
        let tag = compute(AssocType::HmacSha256, b"key", signed, &params).unwrap();
        let sig = BASE64.encode(&tag);

        assert!(verify(AssocType::HmacSha256, b"key", signed, &params, &sig).unwrap());

        let mut tampered = params.clone();
        tampered.insert("openid.identity".to_owned(), "http://mallory.example/".to_owned());
        assert!(!verify(AssocType::HmacSha256, b"key", signed, &tampered, &sig).unwrap());
    }
}

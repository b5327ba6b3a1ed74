//! Diffie–Hellman key agreement for encrypted association sessions.
//!
//! The provider and relying party agree on a shared secret `g^xy mod p`; the
//! provider then ships the association MAC key XOR-masked with a digest of
//! that secret. Integers travel base64-encoded in `btwoc` form (big-endian
//! two's complement, minimal length).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use digest::Digest;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::{CryptoRng, RngCore};

use crate::errors::{Error, Result};

/// Default modulus from the OpenID Authentication 2.0 specification,
/// appendix B. 1024 bits, generator 2.
const DEFAULT_MODULUS_HEX: &str = concat!(
    "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61E",
    "F75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D268370557",
    "7D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E382",
    "6634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB",
);

/// A Diffie–Hellman group: modulus and generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    /// The prime modulus `p`.
    pub modulus: BigUint,
    /// The generator `g`.
    pub generator: BigUint,
}

impl DhGroup {
    /// Build a group from explicit parameters (the wire's `dh_modulus` and
    /// `dh_gen`).
    pub fn new(modulus: BigUint, generator: BigUint) -> Self {
        Self { modulus, generator }
    }
}

/// The group used when an associate request carries no `dh_modulus`/`dh_gen`.
pub static DEFAULT_GROUP: Lazy<DhGroup> = Lazy::new(|| {
    DhGroup::new(
        BigUint::parse_bytes(DEFAULT_MODULUS_HEX.as_bytes(), 16)
            .expect("default modulus is valid hex"),
        BigUint::from(2u32),
    )
});

/// An ephemeral DH key pair for one association negotiation.
pub struct KeyPair {
    private: BigUint,
    public: BigUint,
}

impl KeyPair {
    /// Generate a key pair in `group`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, group: &DhGroup) -> Self {
        let len = ((group.modulus.bits() + 7) / 8) as usize;
        let mut buf = vec![0u8; len];
        let one = BigUint::from(1u32);
        let private = loop {
            rng.fill_bytes(&mut buf);
            let candidate = BigUint::from_bytes_be(&buf) % &group.modulus;
            if candidate > one {
                break candidate;
            }
        };
        let public = group.generator.modpow(&private, &group.modulus);
        Self { private, public }
    }

    /// The public value `g^x mod p`.
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Compute the shared secret `peer^x mod p`.
    pub fn shared_secret(&self, peer_public: &BigUint, group: &DhGroup) -> BigUint {
        peer_public.modpow(&self.private, &group.modulus)
    }
}

/// Minimal big-endian two's complement encoding of a non-negative integer.
///
/// A leading zero byte is prepended when the top bit is set, so the value
/// cannot be mistaken for a negative number.
pub fn btwoc(n: &BigUint) -> Vec<u8> {
    let mut bytes = n.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    bytes
}

/// Encode an integer for the wire: base64 over `btwoc`.
pub fn to_base64(n: &BigUint) -> String {
    BASE64.encode(btwoc(n))
}

/// Decode a wire integer. `field` names the parameter for error reporting.
pub fn from_base64(field: &'static str, s: &str) -> Result<BigUint> {
    let bytes = BASE64.decode(s).map_err(|_| Error::MalformedField {
        name: field,
        value: s.to_owned(),
    })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// XOR `key` with `H(btwoc(shared))`.
///
/// Symmetric: masks a raw MAC key on the provider side and unmasks
/// `enc_mac_key` on the relying-party side. The digest length must equal the
/// key length.
pub fn xor_secret<D: Digest>(shared: &BigUint, key: &[u8]) -> Result<Vec<u8>> {
    let digest = D::digest(btwoc(shared));
    if digest.len() != key.len() {
        return Err(Error::MalformedField {
            name: "enc_mac_key",
            value: format!("{} bytes, expected {}", key.len(), digest.len()),
        });
    }
    Ok(digest.iter().zip(key).map(|(d, k)| d ^ k).collect())
}

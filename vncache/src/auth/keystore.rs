//! ES384 key material and JWT plumbing.
//!
//! A keystore holds exactly one signing identity (this participant's P-384
//! private key) plus the public verification material for the two trust
//! classes. The same type serves nodes and plain clients; a client simply
//! never loads trusted keys.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p384::{PublicKey, SecretKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{AuthError, TrustClass};

/// One trusted public key: JWT verification plus raw signature checks.
struct TrustedKey {
    decoding: DecodingKey,
    verifier: VerifyingKey,
}

impl TrustedKey {
    fn from_public_pem(pem: &str) -> Result<Self, AuthError> {
        let public = PublicKey::from_public_key_pem(pem).map_err(AuthError::invalid_key)?;
        let decoding =
            DecodingKey::from_ec_pem(pem.as_bytes()).map_err(AuthError::invalid_key)?;
        Ok(Self {
            decoding,
            verifier: VerifyingKey::from(public),
        })
    }
}

/// This participant's key material.
pub struct Keystore {
    encoding: EncodingKey,
    signer: SigningKey,
    /// Verification half of our own signing key, for tokens we issued.
    own: TrustedKey,
    public_pem: String,
    client_keys: Vec<TrustedKey>,
    node_keys: Vec<TrustedKey>,
}

impl Keystore {
    /// Load an identity from a PKCS#8 PEM private key.
    pub fn from_pem(private_pem: &str) -> Result<Self, AuthError> {
        let secret = SecretKey::from_pkcs8_pem(private_pem).map_err(AuthError::invalid_key)?;
        Self::from_secret(&secret, private_pem)
    }

    /// Provision a fresh random identity. Operators persist the key with
    /// [`Keystore::private_key_pem`].
    pub fn generate() -> Result<Self, AuthError> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(AuthError::invalid_key)?;
        Self::from_secret(&secret, &pem)
    }

    fn from_secret(secret: &SecretKey, private_pem: &str) -> Result<Self, AuthError> {
        let public_pem = secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(AuthError::invalid_key)?;
        let encoding =
            EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(AuthError::invalid_key)?;
        Ok(Self {
            encoding,
            signer: SigningKey::from(secret),
            own: TrustedKey::from_public_pem(&public_pem)?,
            public_pem,
            client_keys: Vec::new(),
            node_keys: Vec::new(),
        })
    }

    /// SPKI PEM of this identity's public key, for distribution to peers.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// PKCS#8 PEM of the private key, for persistence after `generate()`.
    pub fn private_key_pem(&self) -> Result<String, AuthError> {
        let secret = SecretKey::from(&self.signer);
        Ok(secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(AuthError::invalid_key)?
            .to_string())
    }

    /// Trust a public key for the given class.
    pub fn trust(&mut self, class: TrustClass, public_pem: &str) -> Result<(), AuthError> {
        let key = TrustedKey::from_public_pem(public_pem)?;
        match class {
            TrustClass::Client => self.client_keys.push(key),
            TrustClass::CacheNode => self.node_keys.push(key),
        }
        Ok(())
    }

    /// Sign a claims struct into an ES384 JWT.
    pub fn sign_claims<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::ES384), claims, &self.encoding)
            .map_err(AuthError::invalid_token)
    }

    /// Verify a token this keystore itself issued.
    pub fn verify_own<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        decode_with(token, &self.own.decoding)
    }

    /// Verify an inbound token against the client class first, then the
    /// cache-node class. The matching class decides peer status.
    pub fn verify_inbound<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<(T, TrustClass), AuthError> {
        for key in &self.client_keys {
            if let Ok(claims) = decode_with(token, &key.decoding) {
                return Ok((claims, TrustClass::Client));
            }
        }
        for key in &self.node_keys {
            if let Ok(claims) = decode_with(token, &key.decoding) {
                return Ok((claims, TrustClass::CacheNode));
            }
        }
        Err(AuthError::NotAuthorized)
    }

    /// Verify a token against the cache-node class only.
    pub fn verify_node<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        for key in &self.node_keys {
            if let Ok(claims) = decode_with(token, &key.decoding) {
                return Ok(claims);
            }
        }
        Err(AuthError::NotAuthorized)
    }

    /// Detached ECDSA signature over arbitrary bytes, base64.
    #[must_use]
    pub fn sign_detached(&self, data: &[u8]) -> String {
        use base64::Engine;
        let sig: Signature = self.signer.sign(data);
        base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
    }

    /// Verify a detached base64 signature against one trust class.
    pub fn verify_detached(
        &self,
        class: TrustClass,
        data: &[u8],
        signature_b64: &str,
    ) -> Result<(), AuthError> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|_| AuthError::SignatureMismatch)?;
        let sig = Signature::from_slice(&raw).map_err(|_| AuthError::SignatureMismatch)?;
        let keys = match class {
            TrustClass::Client => &self.client_keys,
            TrustClass::CacheNode => &self.node_keys,
        };
        if keys.iter().any(|k| k.verifier.verify(data, &sig).is_ok()) {
            Ok(())
        } else {
            Err(AuthError::SignatureMismatch)
        }
    }
}

/// Read a token's payload without verifying the signature. Only used by
/// callers inspecting tokens addressed to somebody else (a client reading
/// the buffer sizes out of its own session token).
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T, AuthError> {
    use base64::Engine;
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::invalid_token("not a JWT"))?;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(AuthError::invalid_token)?;
    serde_json::from_slice(&raw).map_err(AuthError::invalid_token)
}

/// Claim checks (expiry, audience, time) are the caller's job; the
/// validation here is signature + algorithm only.
fn decode_with<T: DeserializeOwned>(token: &str, key: &DecodingKey) -> Result<T, AuthError> {
    let mut validation = Validation::new(Algorithm::ES384);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    jsonwebtoken::decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(AuthError::invalid_token)
}

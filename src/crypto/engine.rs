use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;

/// Seals platform tokens at rest and signs OAuth `state` values.
///
/// Sealed tokens are `base64(nonce || ciphertext)` with the account key
/// (`{user_id}-{platform}`) as associated data, so a ciphertext copied onto
/// another account's row fails to open.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    state_key: Vec<u8>,
}

impl CryptoEngine {
    /// Build from the base64 `MASTER_KEY` (32 bytes) and `HMAC_SECRET`.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, AuthError> {
        let master_key = decode_key("MASTER_KEY", master_key_b64)?;
        if master_key.len() != 32 {
            return Err(AuthError::CryptoError(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let state_key = decode_key("HMAC_SECRET", hmac_secret_b64)?;
        if state_key.is_empty() {
            return Err(AuthError::CryptoError("HMAC_SECRET is empty".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| AuthError::CryptoError(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, state_key })
    }

    pub fn seal_token(&self, account: &str, token: &str) -> Result<String, AuthError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: token.as_bytes(),
                    aad: account.as_bytes(),
                },
            )
            .map_err(|e| AuthError::CryptoError(format!("Sealing {account} token failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    /// `None` stays `None`.
    pub fn seal_opt(&self, account: &str, token: Option<&str>) -> Result<Option<String>, AuthError> {
        token.map(|t| self.seal_token(account, t)).transpose()
    }

    pub fn open_token(&self, account: &str, sealed_b64: &str) -> Result<String, AuthError> {
        let raw = STANDARD
            .decode(sealed_b64)
            .map_err(|e| AuthError::CryptoError(format!("Invalid base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(AuthError::CryptoError("Sealed token too short".into()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: account.as_bytes(),
                },
            )
            .map_err(|_| AuthError::CryptoError(format!("Cannot open token for {account}")))?;

        String::from_utf8(plain)
            .map_err(|e| AuthError::CryptoError(format!("Invalid UTF-8 in token: {e}")))
    }

    /// Returns URL-safe `base64(hmac || payload)`.
    pub fn sign_state(&self, payload: &str) -> Result<String, AuthError> {
        let mut mac = self.state_mac()?;
        mac.update(payload.as_bytes());

        let mut out = mac.finalize().into_bytes().to_vec();
        out.extend_from_slice(payload.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Check the signature and return the payload.
    pub fn verify_state(&self, signed: &str) -> Result<String, AuthError> {
        let raw = URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| AuthError::InvalidState)?;
        if raw.len() < MAC_LEN {
            return Err(AuthError::InvalidState);
        }

        let (signature, payload) = raw.split_at(MAC_LEN);
        let mut mac = self.state_mac()?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| AuthError::InvalidState)?;

        String::from_utf8(payload.to_vec()).map_err(|_| AuthError::InvalidState)
    }

    fn state_mac(&self) -> Result<HmacSha256, AuthError> {
        <HmacSha256 as Mac>::new_from_slice(&self.state_key)
            .map_err(|e| AuthError::CryptoError(format!("HMAC init failed: {e}")))
    }
}

fn decode_key(name: &str, value: &str) -> Result<Vec<u8>, AuthError> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| AuthError::CryptoError(format!("Invalid {name} base64: {e}")))
}

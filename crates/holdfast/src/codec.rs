//! Password-based authenticated encryption for the persisted vault blob.
//!
//! The blob is an opaque JSON string: a versioned [`SealedBlob`] carrying the
//! KDF salt, the AEAD nonce and the ciphertext. Salt and nonce are drawn
//! fresh for every encryption; nothing is ever reused across blobs.

use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize as _;

use crate::errors::HoldfastError;

/// PBKDF2-HMAC-SHA-256 rounds for the password key schedule.
pub const KDF_ITERATIONS: u32 = 100_000;

const SEAL_INFO: &[u8] = b"holdfast:vault:seal";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedBlob {
    v: u8,
    salt_b64: String,
    nonce_b64: String,
    ct_b64: String,
}

fn fill_random(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}

/// Stretch the password over `salt16`, then label the AEAD key so the
/// stretched master key never encrypts anything directly.
fn derive_seal_key(password: &SecretString, salt16: &[u8; 16]) -> Result<[u8; 32], HoldfastError> {
    let mut master = [0_u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt16,
        KDF_ITERATIONS,
        &mut master,
    );

    let hk = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0_u8; 32];
    let expanded = hk.expand(SEAL_INFO, &mut out);
    master.zeroize();
    if expanded.is_err() {
        return Err(HoldfastError::Internal("hkdf expand".into()));
    }
    Ok(out)
}

fn encrypt_blocking(plaintext: &[u8], password: &SecretString) -> Result<String, HoldfastError> {
    let mut salt = [0_u8; 16];
    fill_random(&mut salt);
    let mut key = derive_seal_key(password, &salt)?;

    let cipher = match Aes256Gcm::new_from_slice(&key) {
        Ok(c) => c,
        Err(e) => {
            key.zeroize();
            return Err(HoldfastError::Internal(format!("aes init: {e}")));
        }
    };
    key.zeroize();

    let mut nonce = [0_u8; 12];
    fill_random(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| HoldfastError::Internal(format!("aes encrypt: {e}")))?;

    let blob = SealedBlob {
        v: 1,
        salt_b64: base64::engine::general_purpose::STANDARD.encode(salt),
        nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce),
        ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
    };
    serde_json::to_string(&blob).map_err(|e| HoldfastError::Internal(format!("encode blob: {e}")))
}

fn decrypt_blocking(blob: &str, password: &SecretString) -> Result<Vec<u8>, HoldfastError> {
    let Ok(sealed) = serde_json::from_str::<SealedBlob>(blob) else {
        return Err(HoldfastError::MalformedCiphertext);
    };
    if sealed.v != 1 {
        return Err(HoldfastError::MalformedCiphertext);
    }

    let std_b64 = &base64::engine::general_purpose::STANDARD;
    let (Ok(salt), Ok(nonce), Ok(ct)) = (
        std_b64.decode(&sealed.salt_b64),
        std_b64.decode(&sealed.nonce_b64),
        std_b64.decode(&sealed.ct_b64),
    ) else {
        return Err(HoldfastError::MalformedCiphertext);
    };
    let Ok(salt16) = <[u8; 16]>::try_from(salt.as_slice()) else {
        return Err(HoldfastError::MalformedCiphertext);
    };
    if nonce.len() != 12 {
        return Err(HoldfastError::MalformedCiphertext);
    }

    let mut key = derive_seal_key(password, &salt16)?;
    let cipher = match Aes256Gcm::new_from_slice(&key) {
        Ok(c) => c,
        Err(e) => {
            key.zeroize();
            return Err(HoldfastError::Internal(format!("aes init: {e}")));
        }
    };
    key.zeroize();

    // GCM authentication failure is indistinguishable from a wrong key, and
    // the key comes from the password.
    cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .or(Err(HoldfastError::InvalidPassword))
}

/// Encrypt `plaintext` under `password` on the blocking pool; the KDF is the
/// expensive part and must not stall the worker's reactor.
pub async fn encrypt(plaintext: Vec<u8>, password: SecretString) -> Result<String, HoldfastError> {
    tokio::task::spawn_blocking(move || {
        let out = encrypt_blocking(&plaintext, &password);
        let mut plaintext = plaintext;
        plaintext.zeroize();
        out
    })
    .await
    .map_err(|e| HoldfastError::Internal(format!("crypto task: {e}")))?
}

/// Decrypt a sealed blob under `password` on the blocking pool.
pub async fn decrypt(blob: String, password: SecretString) -> Result<Vec<u8>, HoldfastError> {
    tokio::task::spawn_blocking(move || decrypt_blocking(&blob, &password))
        .await
        .map_err(|e| HoldfastError::Internal(format!("crypto task: {e}")))?
}

//! Mnemonic handling and deterministic account key derivation.
//!
//! Accounts are ed25519 keypairs derived from a BIP-39 phrase along
//! `m/44'/501'/{index}'/0'`; addresses and exported keys are base58.

use bip39::{Language, Mnemonic};
use serde::{Deserialize, Serialize};
use solana_derivation_path::DerivationPath;
use solana_keypair::{seed_derivable::keypair_from_seed_and_derivation_path, Keypair};
use solana_seed_phrase::generate_seed_from_seed_phrase_and_passphrase;
use solana_signer::Signer as _;
use zeroize::{Zeroize as _, Zeroizing};

use crate::errors::HoldfastError;

/// Word count for freshly generated phrases (128-bit entropy).
pub const MNEMONIC_WORDS: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub address: String,
    pub key_path: String,
    pub private_key: String,
}

pub fn random_mnemonic() -> Result<String, HoldfastError> {
    let mnemonic = Mnemonic::generate_in(Language::English, MNEMONIC_WORDS)
        .map_err(|e| HoldfastError::Internal(format!("generate mnemonic: {e}")))?;
    Ok(mnemonic.to_string())
}

/// Rejects wrong word counts and checksum failures.
pub fn validate_mnemonic(phrase: &str) -> Result<(), HoldfastError> {
    if Mnemonic::parse_in_normalized(Language::English, phrase).is_err() {
        return Err(HoldfastError::InvalidRecoveryPhrase);
    }
    Ok(())
}

pub fn account_path(index: u32) -> String {
    format!("m/44'/501'/{index}'/0'")
}

/// Recover the account index from a derivation path string.
pub fn parse_path(path: &str) -> Option<u32> {
    let mut parts = path.split('/');
    if parts.next()? != "m" || parts.next()? != "44'" || parts.next()? != "501'" {
        return None;
    }
    let index = parts.next()?.strip_suffix('\'')?.parse::<u32>().ok()?;
    if parts.next()? != "0'" || parts.next().is_some() {
        return None;
    }
    Some(index)
}

/// Deterministic: identical phrase and index always yield the identical
/// address.
pub fn derive_key_account(phrase: &str, index: u32) -> Result<DerivedAccount, HoldfastError> {
    validate_mnemonic(phrase)?;
    let seed = Zeroizing::new(generate_seed_from_seed_phrase_and_passphrase(phrase, ""));
    let path = DerivationPath::new_bip44(Some(index), Some(0));
    let keypair = keypair_from_seed_and_derivation_path(&seed, Some(path))
        .map_err(|e| HoldfastError::Internal(format!("derive keypair: {e}")))?;

    let mut secret = keypair.to_bytes();
    let private_key = bs58::encode(secret).into_string();
    secret.zeroize();

    Ok(DerivedAccount {
        address: keypair.pubkey().to_string(),
        key_path: account_path(index),
        private_key,
    })
}

fn keypair_from_base58(private_key: &str) -> Result<Keypair, HoldfastError> {
    let Ok(mut bytes) = bs58::decode(private_key).into_vec() else {
        return Err(HoldfastError::InvalidRequest(
            "private key is not valid base58".into(),
        ));
    };
    let keypair = Keypair::try_from(bytes.as_slice());
    bytes.zeroize();
    keypair.or(Err(HoldfastError::InvalidRequest(
        "private key is not a 64-byte ed25519 keypair".into(),
    )))
}

/// The base58 address a private key signs for.
pub fn address_of(private_key: &str) -> Result<String, HoldfastError> {
    Ok(keypair_from_base58(private_key)?.pubkey().to_string())
}

/// Sign `message` with a base58-encoded keypair; returns the base58
/// signature.
pub fn sign_bytes(private_key: &str, message: &[u8]) -> Result<String, HoldfastError> {
    Ok(keypair_from_base58(private_key)?
        .sign_message(message)
        .to_string())
}

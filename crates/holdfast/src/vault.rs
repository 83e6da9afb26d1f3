//! The key custody engine.
//!
//! A [`Vault`] is either Locked (the initial state, holding no private
//! material at all) or Unlocked (holding the private store plus the
//! remembered unlock password). Everything that crosses the trust boundary
//! is a [`PublicVault`] projection computed on demand from the single
//! private store; the only exceptions are the two explicit reveal
//! operations, which re-check the password first.

use std::collections::BTreeMap;

use base64::Engine as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize as _;

use crate::{codec, errors::HoldfastError, hd};

// ---------------------------------------------------------------------------
// Private store

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSigner {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Auxiliary signing identities, kept in registration order.
    #[serde(default)]
    pub signers: Vec<StoredSigner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWallet {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_phrase: Option<String>,
    /// Path of the most recently derived account. The next derivation index
    /// comes from here, never from the live account set, so indices are not
    /// reused after deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_account_key_path: Option<String>,
    #[serde(default)]
    pub accounts: BTreeMap<String, StoredAccount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VaultStore {
    #[serde(default)]
    wallets: BTreeMap<String, StoredWallet>,
}

impl VaultStore {
    fn zeroize_secrets(&mut self) {
        for wallet in self.wallets.values_mut() {
            if let Some(phrase) = wallet.recovery_phrase.as_mut() {
                phrase.zeroize();
            }
            for account in wallet.accounts.values_mut() {
                if let Some(key) = account.private_key.as_mut() {
                    key.zeroize();
                }
                for signer in &mut account.signers {
                    if let Some(key) = signer.private_key.as_mut() {
                        key.zeroize();
                    }
                }
            }
        }
        self.wallets.clear();
    }
}

// ---------------------------------------------------------------------------
// Public projection

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSigner {
    pub id: String,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccount {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// True for accounts that cannot sign (imported without a key).
    pub watch_only: bool,
    #[serde(default)]
    pub signers: Vec<PublicSigner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicWallet {
    pub id: String,
    pub name: String,
    pub has_recovery_phrase: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_account_key_path: Option<String>,
    #[serde(default)]
    pub accounts: Vec<PublicAccount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicVault {
    #[serde(default)]
    pub wallets: Vec<PublicWallet>,
}

fn project_signer(signer: &StoredSigner) -> PublicSigner {
    PublicSigner {
        id: signer.id.clone(),
        name: signer.name.clone(),
        address: signer.address.clone(),
    }
}

fn project_account(account: &StoredAccount) -> PublicAccount {
    PublicAccount {
        id: account.id.clone(),
        name: account.name.clone(),
        address: account.address.clone(),
        key_path: account.key_path.clone(),
        watch_only: account.private_key.is_none(),
        signers: account.signers.iter().map(project_signer).collect(),
    }
}

fn project(store: &VaultStore) -> PublicVault {
    PublicVault {
        wallets: store
            .wallets
            .values()
            .map(|wallet| PublicWallet {
                id: wallet.id.clone(),
                name: wallet.name.clone(),
                has_recovery_phrase: wallet.recovery_phrase.is_some(),
                last_account_key_path: wallet.last_account_key_path.clone(),
                accounts: wallet.accounts.values().map(project_account).collect(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Signing payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePart {
    pub address: String,
    pub signature_b58: String,
}

/// Opaque transaction envelope: the chain wire format stays outside this
/// crate; signatures are appended in signing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub message_b64: String,
    #[serde(default)]
    pub signatures: Vec<SignaturePart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHash {
    pub hash_hex: String,
    pub signatures: Vec<SignaturePart>,
}

/// Input shape for `addAccountSigners`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSigner {
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine

struct UnlockedState {
    store: VaultStore,
    password: SecretString,
}

#[derive(Default)]
pub struct Vault {
    state: Option<UnlockedState>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn clone_secret(password: &SecretString) -> SecretString {
    SecretString::new(password.expose_secret().to_owned().into())
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn is_locked(&self) -> bool {
        self.state.is_none()
    }

    fn unlocked(&self) -> Result<&UnlockedState, HoldfastError> {
        self.state.as_ref().ok_or(HoldfastError::VaultLocked)
    }

    fn unlocked_mut(&mut self) -> Result<&mut UnlockedState, HoldfastError> {
        self.state.as_mut().ok_or(HoldfastError::VaultLocked)
    }

    async fn decode_store(password: &str, blob: &str) -> Result<VaultStore, HoldfastError> {
        let mut plain = codec::decrypt(blob.to_owned(), secret(password)).await?;
        let parsed = serde_json::from_slice::<VaultStore>(&plain);
        plain.zeroize();
        match parsed {
            Ok(store) => Ok(store),
            Err(e) => {
                tracing::debug!(error = %e, "decrypted vault bytes did not parse");
                Err(HoldfastError::CorruptPlaintext)
            }
        }
    }

    /// Decrypt `blob` (or start empty), replace the private store, remember
    /// the password and return the public projection.
    pub async fn unlock(
        &mut self,
        password: &str,
        blob: Option<&str>,
    ) -> Result<PublicVault, HoldfastError> {
        let store = match blob {
            Some(blob) => Self::decode_store(password, blob).await?,
            None => VaultStore::default(),
        };
        // A failed decrypt above has left any previous state untouched.
        if let Some(mut previous) = self.state.take() {
            previous.store.zeroize_secrets();
        }
        let public = project(&store);
        self.state = Some(UnlockedState {
            store,
            password: secret(password),
        });
        Ok(public)
    }

    /// Discard the private store, the projection source and the remembered
    /// password.
    pub fn lock(&mut self) {
        if let Some(mut state) = self.state.take() {
            state.store.zeroize_secrets();
        }
    }

    /// Validate a password/blob pair without mutating any state.
    pub async fn try_decrypt(password: &str, blob: &str) -> Result<(), HoldfastError> {
        let mut store = Self::decode_store(password, blob).await?;
        store.zeroize_secrets();
        Ok(())
    }

    pub fn check_password(&self, password: &str) -> Result<(), HoldfastError> {
        let state = self.unlocked()?;
        if state.password.expose_secret() != password {
            return Err(HoldfastError::InvalidPassword);
        }
        Ok(())
    }

    pub fn get_accounts(&self) -> Result<PublicVault, HoldfastError> {
        Ok(project(&self.unlocked()?.store))
    }

    pub fn add_wallet(
        &mut self,
        name: &str,
        recovery_phrase: Option<&str>,
    ) -> Result<PublicWallet, HoldfastError> {
        let state = self.unlocked_mut()?;
        if let Some(phrase) = recovery_phrase {
            hd::validate_mnemonic(phrase)?;
        }
        let id = new_id();
        let wallet = StoredWallet {
            id: id.clone(),
            name: name.to_owned(),
            recovery_phrase: recovery_phrase.map(str::to_owned),
            last_account_key_path: None,
            accounts: BTreeMap::new(),
        };
        let public = project_wallet(&wallet);
        state.store.wallets.insert(id, wallet);
        Ok(public)
    }

    /// Derive the next HD account for a wallet. The index comes from the
    /// wallet's last derivation path, so removed accounts never free their
    /// index.
    pub fn add_account(
        &mut self,
        wallet_id: &str,
        name: &str,
    ) -> Result<PublicAccount, HoldfastError> {
        let state = self.unlocked_mut()?;
        let wallet = state
            .store
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?;
        let phrase = wallet
            .recovery_phrase
            .as_deref()
            .ok_or(HoldfastError::NoRecoveryPhrase)?;

        let index = wallet
            .last_account_key_path
            .as_deref()
            .and_then(hd::parse_path)
            .map_or(0, |last| last + 1);
        let derived = hd::derive_key_account(phrase, index)?;

        let id = new_id();
        let account = StoredAccount {
            id: id.clone(),
            name: name.to_owned(),
            address: derived.address,
            key_path: Some(derived.key_path.clone()),
            private_key: Some(derived.private_key),
            signers: Vec::new(),
        };
        let public = project_account(&account);
        wallet.last_account_key_path = Some(derived.key_path);
        wallet.accounts.insert(id, account);
        Ok(public)
    }

    /// Create a non-HD account. Without a private key the account is
    /// watch-only and cannot sign.
    pub fn import_account(
        &mut self,
        wallet_id: &str,
        name: &str,
        address: &str,
        private_key: Option<&str>,
    ) -> Result<PublicAccount, HoldfastError> {
        let state = self.unlocked_mut()?;
        if let Some(key) = private_key {
            if hd::address_of(key)? != address {
                return Err(HoldfastError::InvalidRequest(
                    "private key does not match address".into(),
                ));
            }
        }
        let wallet = state
            .store
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?;

        let id = new_id();
        let account = StoredAccount {
            id: id.clone(),
            name: name.to_owned(),
            address: address.to_owned(),
            key_path: None,
            private_key: private_key.map(str::to_owned),
            signers: Vec::new(),
        };
        let public = project_account(&account);
        wallet.accounts.insert(id, account);
        Ok(public)
    }

    pub fn update_wallet_name(
        &mut self,
        wallet_id: &str,
        name: &str,
    ) -> Result<(), HoldfastError> {
        let state = self.unlocked_mut()?;
        let wallet = state
            .store
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?;
        name.clone_into(&mut wallet.name);
        Ok(())
    }

    pub fn remove_wallet(&mut self, wallet_id: &str) -> Result<(), HoldfastError> {
        let state = self.unlocked_mut()?;
        let Some(mut wallet) = state.store.wallets.remove(wallet_id) else {
            return Err(HoldfastError::NotFound(format!("wallet {wallet_id}")));
        };
        if let Some(phrase) = wallet.recovery_phrase.as_mut() {
            phrase.zeroize();
        }
        for account in wallet.accounts.values_mut() {
            if let Some(key) = account.private_key.as_mut() {
                key.zeroize();
            }
            for signer in &mut account.signers {
                if let Some(key) = signer.private_key.as_mut() {
                    key.zeroize();
                }
            }
        }
        Ok(())
    }

    fn account_mut<'a>(
        state: &'a mut UnlockedState,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<&'a mut StoredAccount, HoldfastError> {
        state
            .store
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("account {account_id}")))
    }

    pub fn update_account_name(
        &mut self,
        wallet_id: &str,
        account_id: &str,
        name: &str,
    ) -> Result<(), HoldfastError> {
        let state = self.unlocked_mut()?;
        let account = Self::account_mut(state, wallet_id, account_id)?;
        name.clone_into(&mut account.name);
        Ok(())
    }

    /// Removing an account does not touch `last_account_key_path`: its
    /// derivation index stays burned.
    pub fn remove_account(
        &mut self,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<(), HoldfastError> {
        let state = self.unlocked_mut()?;
        let wallet = state
            .store
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?;
        let Some(mut account) = wallet.accounts.remove(account_id) else {
            return Err(HoldfastError::NotFound(format!("account {account_id}")));
        };
        if let Some(key) = account.private_key.as_mut() {
            key.zeroize();
        }
        for signer in &mut account.signers {
            if let Some(key) = signer.private_key.as_mut() {
                key.zeroize();
            }
        }
        Ok(())
    }

    /// Attach auxiliary signing identities to an account, in the given
    /// order.
    pub fn add_account_signers(
        &mut self,
        wallet_id: &str,
        account_id: &str,
        signers: Vec<NewSigner>,
    ) -> Result<PublicAccount, HoldfastError> {
        let state = self.unlocked_mut()?;
        for signer in &signers {
            if let Some(key) = signer.private_key.as_deref() {
                if hd::address_of(key)? != signer.address {
                    return Err(HoldfastError::InvalidRequest(format!(
                        "signer key does not match address {}",
                        signer.address
                    )));
                }
            }
        }
        let account = Self::account_mut(state, wallet_id, account_id)?;
        for signer in signers {
            account.signers.push(StoredSigner {
                id: new_id(),
                name: signer.name,
                address: signer.address,
                private_key: signer.private_key,
            });
        }
        Ok(project_account(account))
    }

    pub fn remove_account_signer(
        &mut self,
        wallet_id: &str,
        account_id: &str,
        signer_id: &str,
    ) -> Result<PublicAccount, HoldfastError> {
        let state = self.unlocked_mut()?;
        let account = Self::account_mut(state, wallet_id, account_id)?;
        let Some(pos) = account.signers.iter().position(|s| s.id == signer_id) else {
            return Err(HoldfastError::NotFound(format!("signer {signer_id}")));
        };
        let mut removed = account.signers.remove(pos);
        if let Some(key) = removed.private_key.as_mut() {
            key.zeroize();
        }
        Ok(project_account(account))
    }

    /// Reveal path one of two: re-authenticates even though the vault is
    /// already unlocked.
    pub fn get_wallet_secret_recovery_phrase(
        &self,
        wallet_id: &str,
        password: &str,
    ) -> Result<String, HoldfastError> {
        self.check_password(password)?;
        let state = self.unlocked()?;
        let wallet = state
            .store
            .wallets
            .get(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?;
        wallet
            .recovery_phrase
            .clone()
            .ok_or(HoldfastError::NoRecoveryPhrase)
    }

    /// Reveal path two of two.
    pub fn get_account_private_key(
        &self,
        wallet_id: &str,
        account_id: &str,
        password: &str,
    ) -> Result<String, HoldfastError> {
        self.check_password(password)?;
        let state = self.unlocked()?;
        let account = state
            .store
            .wallets
            .get(wallet_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("wallet {wallet_id}")))?
            .accounts
            .get(account_id)
            .ok_or_else(|| HoldfastError::NotFound(format!("account {account_id}")))?;
        account
            .private_key
            .clone()
            .ok_or(HoldfastError::NoPrivateKey)
    }

    /// Address lookup tie-break: the first match holding a private key wins
    /// immediately; with no keyed match, the last watch-only match is used.
    /// Iteration is over the id-keyed maps, so the order is deterministic.
    fn find_signing_account(&self, address: &str) -> Result<&StoredAccount, HoldfastError> {
        let state = self.unlocked()?;
        let mut watch_only = None;
        for wallet in state.store.wallets.values() {
            for account in wallet.accounts.values() {
                if account.address == address {
                    if account.private_key.is_some() {
                        return Ok(account);
                    }
                    watch_only = Some(account);
                }
            }
        }
        watch_only.ok_or_else(|| HoldfastError::NotFound(format!("no account for {address}")))
    }

    fn apply_signatures(
        account: &StoredAccount,
        message: &[u8],
        signatures: &mut Vec<SignaturePart>,
    ) -> Result<(), HoldfastError> {
        let key = account
            .private_key
            .as_deref()
            .ok_or(HoldfastError::NoPrivateKey)?;
        signatures.push(SignaturePart {
            address: account.address.clone(),
            signature_b58: hd::sign_bytes(key, message)?,
        });
        // Keyless signers are co-signer placeholders; only keyed ones can
        // contribute a signature here.
        for signer in &account.signers {
            if let Some(key) = signer.private_key.as_deref() {
                signatures.push(SignaturePart {
                    address: signer.address.clone(),
                    signature_b58: hd::sign_bytes(key, message)?,
                });
            }
        }
        Ok(())
    }

    /// Sign with the resolved account's key, then each attached signer's key
    /// in registration order.
    pub fn sign_transaction(
        &self,
        signer_address: &str,
        transaction: Transaction,
    ) -> Result<Transaction, HoldfastError> {
        let account = self.find_signing_account(signer_address)?;
        let Ok(message) =
            base64::engine::general_purpose::STANDARD.decode(&transaction.message_b64)
        else {
            return Err(HoldfastError::InvalidRequest(
                "transaction message is not valid base64".into(),
            ));
        };
        let mut signed = transaction;
        Self::apply_signatures(account, &message, &mut signed.signatures)?;
        Ok(signed)
    }

    pub fn sign_hash(
        &self,
        signer_address: &str,
        hash_hex: &str,
    ) -> Result<SignedHash, HoldfastError> {
        let account = self.find_signing_account(signer_address)?;
        let Ok(hash) = hex::decode(hash_hex) else {
            return Err(HoldfastError::InvalidRequest("hash is not valid hex".into()));
        };
        let mut signatures = Vec::new();
        Self::apply_signatures(account, &hash, &mut signatures)?;
        Ok(SignedHash {
            hash_hex: hash_hex.to_owned(),
            signatures,
        })
    }

    /// Encrypt the full private store under the remembered password. Where
    /// the blob ends up is the caller's concern.
    pub async fn serialize(&self) -> Result<String, HoldfastError> {
        let state = self.unlocked()?;
        let plain = serde_json::to_vec(&state.store)
            .map_err(|e| HoldfastError::Internal(format!("encode store: {e}")))?;
        codec::encrypt(plain, clone_secret(&state.password)).await
    }
}

fn secret(password: &str) -> SecretString {
    SecretString::new(password.to_owned().into())
}

fn project_wallet(wallet: &StoredWallet) -> PublicWallet {
    PublicWallet {
        id: wallet.id.clone(),
        name: wallet.name.clone(),
        has_recovery_phrase: wallet.recovery_phrase.is_some(),
        last_account_key_path: wallet.last_account_key_path.clone(),
        accounts: wallet.accounts.values().map(project_account).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    async fn unlocked_vault() -> eyre::Result<Vault> {
        let mut vault = Vault::new();
        vault.unlock("hunter2", None).await?;
        Ok(vault)
    }

    #[tokio::test]
    async fn unlock_without_blob_yields_empty_projection() -> eyre::Result<()> {
        let mut vault = Vault::new();
        let public = vault.unlock("hunter2", None).await?;
        assert_eq!(public, PublicVault::default());
        assert!(!vault.is_locked(), "vault must be unlocked");
        Ok(())
    }

    #[tokio::test]
    async fn locked_vault_rejects_everything() -> eyre::Result<()> {
        let mut vault = Vault::new();
        assert!(vault.is_locked(), "fresh vault starts locked");
        assert_eq!(
            vault.add_wallet("w", None).map(|_| ()),
            Err(HoldfastError::VaultLocked)
        );
        assert_eq!(vault.get_accounts().map(|_| ()), Err(HoldfastError::VaultLocked));
        assert_eq!(
            vault.serialize().await.map(|_| ()),
            Err(HoldfastError::VaultLocked)
        );

        vault.unlock("hunter2", None).await?;
        assert!(!vault.is_locked(), "unlock flips the state");
        vault.lock();
        assert!(vault.is_locked(), "lock flips it back");
        assert_eq!(
            vault.check_password("hunter2"),
            Err(HoldfastError::VaultLocked),
            "lock forgets the password"
        );
        Ok(())
    }

    #[tokio::test]
    async fn hd_indices_strictly_increase_and_are_never_reused() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", Some(PHRASE))?;
        let a1 = vault.add_account(&wallet.id, "A1")?;
        let a2 = vault.add_account(&wallet.id, "A2")?;
        assert_eq!(a1.key_path.as_deref(), Some("m/44'/501'/0'/0'"));
        assert_eq!(a2.key_path.as_deref(), Some("m/44'/501'/1'/0'"));
        assert_ne!(a1.address, a2.address);

        vault.remove_account(&wallet.id, &a1.id)?;
        let a3 = vault.add_account(&wallet.id, "A3")?;
        assert_eq!(
            a3.key_path.as_deref(),
            Some("m/44'/501'/2'/0'"),
            "freed index 0 must not be reused"
        );
        Ok(())
    }

    #[tokio::test]
    async fn add_account_requires_a_recovery_phrase() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("keyless", None)?;
        assert_eq!(
            vault.add_account(&wallet.id, "A").map(|_| ()),
            Err(HoldfastError::NoRecoveryPhrase)
        );
        Ok(())
    }

    #[tokio::test]
    async fn add_wallet_rejects_an_invalid_phrase() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        assert_eq!(
            vault.add_wallet("W", Some("not a phrase")).map(|_| ()),
            Err(HoldfastError::InvalidRecoveryPhrase)
        );
        assert!(vault.get_accounts()?.wallets.is_empty(), "no partial state");
        Ok(())
    }

    #[tokio::test]
    async fn watch_only_import_cannot_sign() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", None)?;
        let derived = hd::derive_key_account(PHRASE, 0)?;
        let imported =
            vault.import_account(&wallet.id, "watch", &derived.address, None)?;
        assert!(imported.watch_only, "import without key is watch-only");

        let tx = Transaction {
            message_b64: base64::engine::general_purpose::STANDARD.encode(b"payload"),
            signatures: Vec::new(),
        };
        assert_eq!(
            vault.sign_transaction(&derived.address, tx).map(|_| ()),
            Err(HoldfastError::NoPrivateKey)
        );
        Ok(())
    }

    #[tokio::test]
    async fn keyed_match_outranks_watch_only_position() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", None)?;
        let derived = hd::derive_key_account(PHRASE, 0)?;
        vault.import_account(&wallet.id, "watch", &derived.address, None)?;
        vault.import_account(
            &wallet.id,
            "keyed",
            &derived.address,
            Some(&derived.private_key),
        )?;

        let tx = Transaction {
            message_b64: base64::engine::general_purpose::STANDARD.encode(b"payload"),
            signatures: Vec::new(),
        };
        let signed = vault.sign_transaction(&derived.address, tx)?;
        assert_eq!(signed.signatures.len(), 1, "keyed account must sign");
        Ok(())
    }

    #[tokio::test]
    async fn attached_signers_sign_in_registration_order() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", Some(PHRASE))?;
        let account = vault.add_account(&wallet.id, "A")?;

        let co1 = hd::derive_key_account(PHRASE, 7)?;
        let co2 = hd::derive_key_account(PHRASE, 8)?;
        vault.add_account_signers(
            &wallet.id,
            &account.id,
            vec![
                NewSigner {
                    name: "co1".into(),
                    address: co1.address.clone(),
                    private_key: Some(co1.private_key),
                },
                NewSigner {
                    name: "co2".into(),
                    address: co2.address.clone(),
                    private_key: Some(co2.private_key),
                },
            ],
        )?;

        let tx = Transaction {
            message_b64: base64::engine::general_purpose::STANDARD.encode(b"multisig"),
            signatures: Vec::new(),
        };
        let signed = vault.sign_transaction(&account.address, tx)?;
        let order: Vec<&str> = signed
            .signatures
            .iter()
            .map(|s| s.address.as_str())
            .collect();
        assert_eq!(order, vec![
            account.address.as_str(),
            co1.address.as_str(),
            co2.address.as_str()
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn reveal_operations_recheck_the_password() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", Some(PHRASE))?;
        let account = vault.add_account(&wallet.id, "A")?;

        assert_eq!(
            vault
                .get_wallet_secret_recovery_phrase(&wallet.id, "wrong")
                .map(|_| ()),
            Err(HoldfastError::InvalidPassword)
        );
        assert_eq!(
            vault.get_wallet_secret_recovery_phrase(&wallet.id, "hunter2")?,
            PHRASE
        );
        let key = vault.get_account_private_key(&wallet.id, &account.id, "hunter2")?;
        assert_eq!(hd::address_of(&key)?, account.address);
        Ok(())
    }

    #[tokio::test]
    async fn serialize_then_unlock_reproduces_the_projection() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("W", Some(PHRASE))?;
        vault.add_account(&wallet.id, "A1")?;
        vault.add_account(&wallet.id, "A2")?;
        let before = vault.get_accounts()?;

        let blob = vault.serialize().await?;
        vault.lock();

        Vault::try_decrypt("hunter2", &blob).await?;
        assert_eq!(
            Vault::try_decrypt("wrong", &blob).await,
            Err(HoldfastError::InvalidPassword)
        );

        let after = vault.unlock("hunter2", Some(&blob)).await?;
        assert_eq!(after, before);
        Ok(())
    }

    #[tokio::test]
    async fn failed_unlock_leaves_previous_state_intact() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        vault.add_wallet("W", None)?;
        let before = vault.get_accounts()?;

        assert_eq!(
            vault.unlock("hunter2", Some("garbage")).await.map(|_| ()),
            Err(HoldfastError::MalformedCiphertext)
        );
        assert_eq!(vault.get_accounts()?, before);
        Ok(())
    }

    #[tokio::test]
    async fn renames_keep_ids_stable_and_unknown_ids_fail() -> eyre::Result<()> {
        let mut vault = unlocked_vault().await?;
        let wallet = vault.add_wallet("old", Some(PHRASE))?;
        let account = vault.add_account(&wallet.id, "a-old")?;

        vault.update_wallet_name(&wallet.id, "new")?;
        vault.update_account_name(&wallet.id, &account.id, "a-new")?;
        let public = vault.get_accounts()?;
        let w = public
            .wallets
            .first()
            .ok_or_else(|| eyre::eyre!("missing wallet"))?;
        assert_eq!(w.id, wallet.id);
        assert_eq!(w.name, "new");

        assert_eq!(
            vault.update_wallet_name("nope", "x"),
            Err(HoldfastError::NotFound("wallet nope".into()))
        );
        assert_eq!(
            vault.remove_account(&wallet.id, "nope"),
            Err(HoldfastError::NotFound("account nope".into()))
        );
        Ok(())
    }
}

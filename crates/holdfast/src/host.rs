//! The worker host: a long-lived actor with exclusive ownership of one
//! [`Vault`], reachable only through messenger requests.
//!
//! The request handler decodes commands and feeds them into a
//! single-consumer channel; one task executes them strictly in arrival
//! order, so no two commands ever interleave across a cryptographic await.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    errors::HoldfastError,
    messenger::{Messenger, Responder, Router},
    vault::{NewSigner, Transaction, Vault},
};

/// Endpoint identity of the worker host.
pub const WORKER_ID: &str = "vault-worker";

/// Envelope kind for vault commands.
pub const VAULT_KIND: &str = "vault";

#[derive(Debug, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum VaultCommand {
    Unlock {
        password: String,
        #[serde(default)]
        blob: Option<String>,
    },
    Lock,
    TryDecrypt {
        password: String,
        blob: String,
    },
    AddWallet {
        name: String,
        #[serde(default)]
        recovery_phrase: Option<String>,
    },
    AddAccount {
        wallet_id: String,
        name: String,
    },
    ImportAccount {
        wallet_id: String,
        name: String,
        address: String,
        #[serde(default)]
        private_key: Option<String>,
    },
    Serialize,
    CheckPassword {
        password: String,
    },
    IsLocked,
    GetAccounts,
    GetWalletSecretRecoveryPhrase {
        wallet_id: String,
        password: String,
    },
    GetAccountPrivateKey {
        wallet_id: String,
        account_id: String,
        password: String,
    },
    UpdateWalletName {
        wallet_id: String,
        name: String,
    },
    RemoveWallet {
        wallet_id: String,
    },
    UpdateAccountName {
        wallet_id: String,
        account_id: String,
        name: String,
    },
    RemoveAccount {
        wallet_id: String,
        account_id: String,
    },
    AddAccountSigners {
        wallet_id: String,
        account_id: String,
        signers: Vec<NewSigner>,
    },
    RemoveAccountSigner {
        wallet_id: String,
        account_id: String,
        signer_id: String,
    },
    SignTransaction {
        signer_address: String,
        transaction: Transaction,
    },
    SignHash {
        signer_address: String,
        hash_hex: String,
    },
}

impl VaultCommand {
    const fn method_name(&self) -> &'static str {
        match self {
            Self::Unlock { .. } => "unlock",
            Self::Lock => "lock",
            Self::TryDecrypt { .. } => "tryDecrypt",
            Self::AddWallet { .. } => "addWallet",
            Self::AddAccount { .. } => "addAccount",
            Self::ImportAccount { .. } => "importAccount",
            Self::Serialize => "serialize",
            Self::CheckPassword { .. } => "checkPassword",
            Self::IsLocked => "isLocked",
            Self::GetAccounts => "getAccounts",
            Self::GetWalletSecretRecoveryPhrase { .. } => "getWalletSecretRecoveryPhrase",
            Self::GetAccountPrivateKey { .. } => "getAccountPrivateKey",
            Self::UpdateWalletName { .. } => "updateWalletName",
            Self::RemoveWallet { .. } => "removeWallet",
            Self::UpdateAccountName { .. } => "updateAccountName",
            Self::RemoveAccount { .. } => "removeAccount",
            Self::AddAccountSigners { .. } => "addAccountSigners",
            Self::RemoveAccountSigner { .. } => "removeAccountSigner",
            Self::SignTransaction { .. } => "signTransaction",
            Self::SignHash { .. } => "signHash",
        }
    }

    /// Mutating commands get an audit entry; reads and probes do not.
    const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Unlock { .. }
                | Self::Lock
                | Self::AddWallet { .. }
                | Self::AddAccount { .. }
                | Self::ImportAccount { .. }
                | Self::UpdateWalletName { .. }
                | Self::RemoveWallet { .. }
                | Self::UpdateAccountName { .. }
                | Self::RemoveAccount { .. }
                | Self::AddAccountSigners { .. }
                | Self::RemoveAccountSigner { .. }
        )
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, HoldfastError> {
    serde_json::to_value(value).map_err(|e| HoldfastError::Internal(format!("encode result: {e}")))
}

/// The cryptographic suspension points live here; everything else stays
/// synchronous inside one actor turn.
async fn apply(vault: &mut Vault, command: VaultCommand) -> Result<Value, HoldfastError> {
    match command {
        VaultCommand::Unlock { password, blob } => {
            encode(&vault.unlock(&password, blob.as_deref()).await?)
        }
        VaultCommand::TryDecrypt { password, blob } => {
            Vault::try_decrypt(&password, &blob).await?;
            Ok(Value::Null)
        }
        VaultCommand::Serialize => Ok(Value::String(vault.serialize().await?)),
        other => apply_sync(vault, other),
    }
}

fn apply_sync(vault: &mut Vault, command: VaultCommand) -> Result<Value, HoldfastError> {
    match command {
        VaultCommand::Unlock { .. } | VaultCommand::TryDecrypt { .. } | VaultCommand::Serialize => {
            Err(HoldfastError::Internal(
                "async command routed to the sync path".into(),
            ))
        }
        VaultCommand::Lock => {
            vault.lock();
            Ok(Value::Null)
        }
        VaultCommand::AddWallet {
            name,
            recovery_phrase,
        } => encode(&vault.add_wallet(&name, recovery_phrase.as_deref())?),
        VaultCommand::AddAccount { wallet_id, name } => {
            encode(&vault.add_account(&wallet_id, &name)?)
        }
        VaultCommand::ImportAccount {
            wallet_id,
            name,
            address,
            private_key,
        } => encode(&vault.import_account(&wallet_id, &name, &address, private_key.as_deref())?),
        VaultCommand::CheckPassword { password } => {
            vault.check_password(&password)?;
            Ok(Value::Null)
        }
        VaultCommand::IsLocked => Ok(Value::Bool(vault.is_locked())),
        VaultCommand::GetAccounts => encode(&vault.get_accounts()?),
        VaultCommand::GetWalletSecretRecoveryPhrase {
            wallet_id,
            password,
        } => Ok(Value::String(
            vault.get_wallet_secret_recovery_phrase(&wallet_id, &password)?,
        )),
        VaultCommand::GetAccountPrivateKey {
            wallet_id,
            account_id,
            password,
        } => Ok(Value::String(vault.get_account_private_key(
            &wallet_id,
            &account_id,
            &password,
        )?)),
        VaultCommand::UpdateWalletName { wallet_id, name } => {
            vault.update_wallet_name(&wallet_id, &name)?;
            Ok(Value::Null)
        }
        VaultCommand::RemoveWallet { wallet_id } => {
            vault.remove_wallet(&wallet_id)?;
            Ok(Value::Null)
        }
        VaultCommand::UpdateAccountName {
            wallet_id,
            account_id,
            name,
        } => {
            vault.update_account_name(&wallet_id, &account_id, &name)?;
            Ok(Value::Null)
        }
        VaultCommand::RemoveAccount {
            wallet_id,
            account_id,
        } => {
            vault.remove_account(&wallet_id, &account_id)?;
            Ok(Value::Null)
        }
        VaultCommand::AddAccountSigners {
            wallet_id,
            account_id,
            signers,
        } => encode(&vault.add_account_signers(&wallet_id, &account_id, signers)?),
        VaultCommand::RemoveAccountSigner {
            wallet_id,
            account_id,
            signer_id,
        } => encode(&vault.remove_account_signer(&wallet_id, &account_id, &signer_id)?),
        VaultCommand::SignTransaction {
            signer_address,
            transaction,
        } => encode(&vault.sign_transaction(&signer_address, transaction)?),
        VaultCommand::SignHash {
            signer_address,
            hash_hex,
        } => encode(&vault.sign_hash(&signer_address, &hash_hex)?),
    }
}

fn audit(path: Option<&PathBuf>, method: &'static str, ok: bool) {
    let Some(path) = path else { return };
    // Method name and outcome only; parameters never reach the log.
    let entry = json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "method": method,
        "ok": ok,
    });
    if let Err(e) = crate::fsutil::append_jsonl_private(path, &entry) {
        warn!(error = %e, "audit append failed");
    }
}

pub struct WorkerHost {
    messenger: Messenger,
}

impl WorkerHost {
    /// Spawn the host actor and register it on the router under
    /// [`WORKER_ID`]. `vault` moves into the actor; there is no other way to
    /// reach it afterwards.
    pub fn spawn(router: &Router, vault: Vault, audit_log: Option<PathBuf>) -> Self {
        let messenger = router.register(WORKER_ID);
        let (tx, mut rx) = mpsc::unbounded_channel::<(VaultCommand, Responder)>();

        messenger.on_request(move |from, payload, responder| {
            match serde_json::from_value::<VaultCommand>(payload) {
                Ok(command) => {
                    if let Err(send_err) = tx.send((command, responder)) {
                        let (_, responder) = send_err.0;
                        responder.send_error(&HoldfastError::Unreachable);
                    }
                }
                Err(e) => responder.send_error(&HoldfastError::InvalidRequest(format!(
                    "bad vault command from {from}: {e}"
                ))),
            }
        });

        drop(tokio::spawn(async move {
            info!("worker host started");
            let mut vault = vault;
            while let Some((command, responder)) = rx.recv().await {
                let method = command.method_name();
                let mutating = command.is_mutating();
                let result = apply(&mut vault, command).await;
                if mutating {
                    audit(audit_log.as_ref(), method, result.is_ok());
                }
                match result {
                    Ok(value) => responder.send_data(value),
                    Err(e) => {
                        warn!(command = method, error = %e, "vault command failed");
                        responder.send_error(&e);
                    }
                }
            }
            // Teardown wipes key material and the remembered password.
            vault.lock();
            info!("worker host stopped");
        }));

        Self { messenger }
    }

    pub const fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Detach from the router; the actor drains, locks the vault and exits.
    pub fn shutdown(&self) {
        self.messenger.remove_listener();
    }
}

/// Issue a vault command from any endpoint.
pub async fn call_vault(
    messenger: &Messenger,
    method: &str,
    params: Value,
    timeout: std::time::Duration,
) -> Result<Value, HoldfastError> {
    let command = if params.is_null() {
        json!({ "method": method })
    } else {
        json!({ "method": method, "params": params })
    };
    drop(params);
    messenger
        .send_request(WORKER_ID, VAULT_KIND, &command, timeout)
        .await
}

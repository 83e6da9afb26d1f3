//! End-to-end flows over the messenger command surface, the way a UI
//! context talks to the worker host.

use holdfast::{
    errors::HoldfastError,
    host::{call_vault, WorkerHost},
    messenger::{Messenger, Router, DEFAULT_REQUEST_TIMEOUT},
    vault::Vault,
};
use serde_json::{json, Value};

const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

async fn call(ui: &Messenger, method: &str, params: Value) -> Result<Value, HoldfastError> {
    call_vault(ui, method, params, DEFAULT_REQUEST_TIMEOUT).await
}

fn field<'a>(v: &'a Value, key: &str) -> eyre::Result<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| eyre::eyre!("missing field {key} in {v}"))
}

#[tokio::test]
async fn full_wallet_lifecycle_over_the_wire() -> eyre::Result<()> {
    let router = Router::new();
    let _host = WorkerHost::spawn(&router, Vault::new(), None);
    let ui = router.register("ui");

    let empty = call(&ui, "unlock", json!({"password": "pw"})).await?;
    assert_eq!(empty, json!({"wallets": []}));

    let wallet = call(&ui, "addWallet", json!({"name": "W", "recoveryPhrase": PHRASE})).await?;
    let wallet_id = field(&wallet, "id")?.to_owned();

    let a1 = call(&ui, "addAccount", json!({"walletId": wallet_id, "name": "A1"})).await?;
    let a2 = call(&ui, "addAccount", json!({"walletId": wallet_id, "name": "A2"})).await?;
    assert_eq!(field(&a1, "key_path")?, "m/44'/501'/0'/0'");
    assert_eq!(field(&a2, "key_path")?, "m/44'/501'/1'/0'");
    assert_ne!(field(&a1, "address")?, field(&a2, "address")?);

    // Removing A1 must not free its index.
    let a1_id = field(&a1, "id")?.to_owned();
    call(&ui, "removeAccount", json!({"walletId": wallet_id, "accountId": a1_id})).await?;
    let a3 = call(&ui, "addAccount", json!({"walletId": wallet_id, "name": "A3"})).await?;
    assert_eq!(field(&a3, "key_path")?, "m/44'/501'/2'/0'");

    // Round-trip the encrypted blob through lock/unlock.
    let projection = call(&ui, "getAccounts", Value::Null).await?;
    let blob = call(&ui, "serialize", Value::Null).await?;
    let blob = blob
        .as_str()
        .ok_or_else(|| eyre::eyre!("serialize must return a string"))?
        .to_owned();
    call(&ui, "lock", Value::Null).await?;
    assert_eq!(
        call(&ui, "getAccounts", Value::Null).await,
        Err(HoldfastError::VaultLocked)
    );
    let restored = call(&ui, "unlock", json!({"password": "pw", "blob": blob})).await?;
    assert_eq!(restored, projection);
    Ok(())
}

#[tokio::test]
async fn reveal_and_signing_paths_over_the_wire() -> eyre::Result<()> {
    let router = Router::new();
    let _host = WorkerHost::spawn(&router, Vault::new(), None);
    let ui = router.register("ui");

    call(&ui, "unlock", json!({"password": "pw"})).await?;
    let wallet = call(&ui, "addWallet", json!({"name": "W", "recoveryPhrase": PHRASE})).await?;
    let wallet_id = field(&wallet, "id")?.to_owned();
    let account = call(&ui, "addAccount", json!({"walletId": wallet_id, "name": "A"})).await?;
    let account_id = field(&account, "id")?.to_owned();
    let address = field(&account, "address")?.to_owned();

    // Reveal operations re-authenticate.
    assert_eq!(
        call(
            &ui,
            "getWalletSecretRecoveryPhrase",
            json!({"walletId": wallet_id, "password": "nope"})
        )
        .await,
        Err(HoldfastError::InvalidPassword)
    );
    let phrase = call(
        &ui,
        "getWalletSecretRecoveryPhrase",
        json!({"walletId": wallet_id, "password": "pw"}),
    )
    .await?;
    assert_eq!(phrase, Value::String(PHRASE.to_owned()));
    call(
        &ui,
        "getAccountPrivateKey",
        json!({"walletId": wallet_id, "accountId": account_id, "password": "pw"}),
    )
    .await?;

    // The projection never leaks key material.
    let projection = call(&ui, "getAccounts", Value::Null).await?;
    let raw = projection.to_string();
    assert!(!raw.contains("private_key"), "projection leaked a key field");
    assert!(!raw.contains("abandon"), "projection leaked the phrase");

    let message_b64 = "aGVsbG8=";
    let signed = call(
        &ui,
        "signTransaction",
        json!({"signerAddress": address, "transaction": {"message_b64": message_b64}}),
    )
    .await?;
    let signatures = signed
        .get("signatures")
        .and_then(Value::as_array)
        .ok_or_else(|| eyre::eyre!("missing signatures"))?;
    assert_eq!(signatures.len(), 1);

    let hashed = call(
        &ui,
        "signHash",
        json!({"signerAddress": address, "hashHex": "00".repeat(32)}),
    )
    .await?;
    assert!(
        hashed
            .get("signatures")
            .and_then(Value::as_array)
            .is_some_and(|s| s.len() == 1),
        "signHash must carry one signature: {hashed}"
    );

    assert_eq!(
        call(
            &ui,
            "signTransaction",
            json!({"signerAddress": "unknown", "transaction": {"message_b64": message_b64}})
        )
        .await,
        Err(HoldfastError::NotFound("no account for unknown".into()))
    );
    Ok(())
}

#[tokio::test]
async fn signer_attachment_over_the_wire() -> eyre::Result<()> {
    let router = Router::new();
    let _host = WorkerHost::spawn(&router, Vault::new(), None);
    let ui = router.register("ui");

    call(&ui, "unlock", json!({"password": "pw"})).await?;
    let wallet = call(&ui, "addWallet", json!({"name": "W", "recoveryPhrase": PHRASE})).await?;
    let wallet_id = field(&wallet, "id")?.to_owned();
    let account = call(&ui, "addAccount", json!({"walletId": wallet_id, "name": "A"})).await?;
    let account_id = field(&account, "id")?.to_owned();
    let address = field(&account, "address")?.to_owned();

    let co = holdfast::hd::derive_key_account(PHRASE, 5)?;
    let with_signer = call(
        &ui,
        "addAccountSigners",
        json!({
            "walletId": wallet_id,
            "accountId": account_id,
            "signers": [{"name": "co", "address": co.address, "private_key": co.private_key}]
        }),
    )
    .await?;
    let signer_id = with_signer
        .get("signers")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| eyre::eyre!("missing signer id"))?
        .to_owned();

    let signed = call(
        &ui,
        "signTransaction",
        json!({"signerAddress": address, "transaction": {"message_b64": "bXVsdGk="}}),
    )
    .await?;
    assert_eq!(
        signed
            .get("signatures")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(2),
        "account plus one attached signer"
    );

    let detached = call(
        &ui,
        "removeAccountSigner",
        json!({"walletId": wallet_id, "accountId": account_id, "signerId": signer_id}),
    )
    .await?;
    assert_eq!(
        detached.get("signers").and_then(Value::as_array).map(Vec::len),
        Some(0)
    );
    Ok(())
}

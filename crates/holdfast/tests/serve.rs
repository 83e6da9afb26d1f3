use eyre::Context as _;
use predicates::prelude::*;

#[test]
fn mnemonic_prints_a_twelve_word_phrase() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("holdfast");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    assert_cmd::Command::new(exe)
        .env("HOLDFAST_CONFIG_DIR", cfg_dir.path())
        .env("HOLDFAST_DATA_DIR", data_dir.path())
        .arg("mnemonic")
        .assert()
        .success()
        .stdout(predicate::function(|out: &str| {
            out.trim().split_whitespace().count() == 12
        }));
    Ok(())
}

#[test]
fn paths_reports_the_overridden_dirs() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("holdfast");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = assert_cmd::Command::new(exe)
        .env("HOLDFAST_CONFIG_DIR", cfg_dir.path())
        .env("HOLDFAST_DATA_DIR", data_dir.path())
        .arg("paths")
        .output()
        .context("run holdfast paths")?;
    assert!(out.status.success(), "paths exited non-zero");

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    assert_eq!(
        v.get("data_dir").and_then(|x| x.as_str()),
        data_dir.path().to_str()
    );
    Ok(())
}

#[test]
fn serve_round_trips_vault_commands_and_persists_the_blob() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("holdfast");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let script = [
        r#"{"jsonrpc":"2.0","id":1,"method":"isLocked"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"unlock","params":{"password":"pw"}}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"addWallet","params":{"name":"W"}}"#,
        r#"{"jsonrpc":"2.0","id":4,"method":"serialize"}"#,
        r#"{"jsonrpc":"2.0","id":5,"method":"getAccounts"}"#,
        r#"{"jsonrpc":"2.0","id":6,"method":"lock"}"#,
    ]
    .join("\n");

    let out = assert_cmd::Command::new(exe)
        .env("HOLDFAST_CONFIG_DIR", cfg_dir.path())
        .env("HOLDFAST_DATA_DIR", data_dir.path())
        .arg("serve")
        .write_stdin(format!("{script}\n"))
        .output()
        .context("run holdfast serve")?;
    assert!(
        out.status.success(),
        "serve exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let replies: Vec<serde_json::Value> = String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()
        .context("parse serve replies")?;
    assert_eq!(replies.len(), 6, "one reply per request");

    let result_of = |id: u64| -> eyre::Result<&serde_json::Value> {
        replies
            .iter()
            .find(|r| r.get("id").and_then(serde_json::Value::as_u64) == Some(id))
            .and_then(|r| r.get("result"))
            .ok_or_else(|| eyre::eyre!("missing result for id {id}"))
    };

    assert_eq!(result_of(1)?, &serde_json::Value::Bool(true));
    assert_eq!(result_of(2)?, &serde_json::json!({"wallets": []}));
    assert!(result_of(4)?.is_string(), "serialize returns the blob");
    assert_eq!(
        result_of(5)?
            .get("wallets")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len),
        Some(1)
    );

    assert!(
        data_dir.path().join("vault.blob").exists(),
        "serve persists the blob on serialize"
    );
    assert!(
        data_dir.path().join("audit.jsonl").exists(),
        "mutating commands leave an audit trail"
    );
    Ok(())
}

#[test]
fn serve_reloads_the_persisted_blob_on_unlock() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("holdfast");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let first = [
        r#"{"jsonrpc":"2.0","id":1,"method":"unlock","params":{"password":"pw"}}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"addWallet","params":{"name":"persisted"}}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"serialize"}"#,
    ]
    .join("\n");
    let out = assert_cmd::Command::new(&exe)
        .env("HOLDFAST_CONFIG_DIR", cfg_dir.path())
        .env("HOLDFAST_DATA_DIR", data_dir.path())
        .arg("serve")
        .write_stdin(format!("{first}\n"))
        .output()
        .context("first serve session")?;
    assert!(out.status.success(), "first session failed");

    // Second session: unlock without a blob picks up the persisted one.
    let second = r#"{"jsonrpc":"2.0","id":1,"method":"unlock","params":{"password":"pw"}}"#;
    let out = assert_cmd::Command::new(&exe)
        .env("HOLDFAST_CONFIG_DIR", cfg_dir.path())
        .env("HOLDFAST_DATA_DIR", data_dir.path())
        .arg("serve")
        .write_stdin(format!("{second}\n"))
        .output()
        .context("second serve session")?;
    assert!(out.status.success(), "second session failed");

    let reply: serde_json::Value = serde_json::from_str(
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .ok_or_else(|| eyre::eyre!("no reply from second session"))?,
    )?;
    let names: Vec<&str> = reply
        .get("result")
        .and_then(|r| r.get("wallets"))
        .and_then(serde_json::Value::as_array)
        .map_or_else(Vec::new, |ws| {
            ws.iter()
                .filter_map(|w| w.get("name").and_then(serde_json::Value::as_str))
                .collect()
        });
    assert_eq!(names, vec!["persisted"]);
    Ok(())
}

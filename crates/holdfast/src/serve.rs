//! `holdfast serve`: the worker host behind a line-delimited JSON-RPC 2.0
//! stdio loop.
//!
//! Each request line `{"jsonrpc":"2.0","id":N,"method":...,"params":...}`
//! becomes a vault command sent over the messenger; replies mirror the id.
//! The loop also owns blob persistence: `serialize` results land in
//! `data_dir/vault.blob`, and `unlock` without an explicit blob reads it
//! back. The vault itself never touches the filesystem.

use std::fs::{self, OpenOptions};

use eyre::Context as _;
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tracing::warn;

use crate::{
    config::HoldfastConfig,
    host::{self, WorkerHost},
    messenger::Router,
    paths::HoldfastPaths,
    vault::Vault,
};

pub const MAX_JSONRPC_LINE_BYTES: usize = 1_000_000;

const CLI_ID: &str = "serve-cli";

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcNotification {
    jsonrpc: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

fn ok(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

fn err(id: Value, code: impl Into<String>, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code: code.into(),
            message: message.into(),
        }),
    }
}

async fn write_frame<W, T>(out: &mut W, v: &T) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: Serialize + Sync,
{
    out.write_all(format!("{}\n", serde_json::to_string(v)?).as_bytes())
        .await?;
    out.flush().await?;
    Ok(())
}

/// Only one serve instance may own the vault and its persisted blob.
fn acquire_instance_lock(paths: &HoldfastPaths) -> eyre::Result<std::fs::File> {
    let lock_path = paths.lock_path();
    let lock_file = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .mode(crate::fsutil::MODE_FILE_PRIVATE)
                .open(&lock_path)
                .with_context(|| format!("open lock file at {}", lock_path.display()))?
        }
        #[cfg(not(unix))]
        {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)
                .with_context(|| format!("open lock file at {}", lock_path.display()))?
        }
    };
    lock_file
        .try_lock_exclusive()
        .with_context(|| format!("lock already held at {}", lock_path.display()))?;
    Ok(lock_file)
}

/// Hand `unlock` the persisted blob when the caller did not supply one.
fn inject_persisted_blob(paths: &HoldfastPaths, params: &mut Value) {
    if params
        .as_object()
        .is_some_and(|o| o.contains_key("blob"))
    {
        return;
    }
    let blob_path = paths.vault_blob_path();
    if !blob_path.exists() {
        return;
    }
    let blob = match fs::read_to_string(&blob_path) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to read persisted vault blob");
            return;
        }
    };
    if params.is_null() {
        *params = Value::Object(Map::new());
    }
    if let Some(obj) = params.as_object_mut() {
        obj.insert("blob".to_owned(), Value::String(blob));
    }
}

async fn dispatch(
    cli: &crate::messenger::Messenger,
    paths: &HoldfastPaths,
    cfg: &HoldfastConfig,
    req: JsonRpcRequest,
) -> JsonRpcResponse {
    if req.method == "ping" {
        return ok(req.id, json!({}));
    }

    let mut params = req.params;
    if req.method == "unlock" {
        inject_persisted_blob(paths, &mut params);
    }

    match host::call_vault(cli, &req.method, params, cfg.request_timeout()).await {
        Ok(value) => {
            if req.method == "serialize" {
                if let Value::String(blob) = &value {
                    if let Err(e) =
                        crate::fsutil::write_string_atomic_private(&paths.vault_blob_path(), blob)
                    {
                        warn!(error = %e, "failed to persist vault blob");
                        return err(
                            req.id,
                            "internal_error",
                            format!("failed to persist vault blob: {e}"),
                        );
                    }
                }
            }
            ok(req.id, value)
        }
        Err(e) => err(req.id, e.code(), e.to_string()),
    }
}

pub async fn run(paths: &HoldfastPaths, cfg: &HoldfastConfig) -> eyre::Result<()> {
    paths.ensure_private_dirs()?;
    let _lock = acquire_instance_lock(paths)?;

    let router = Router::new();
    let host_handle = WorkerHost::spawn(&router, Vault::new(), Some(paths.audit_log_path()));
    let cli = router.register(CLI_ID);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = stdin.next_line().await? {
        if line.len() > MAX_JSONRPC_LINE_BYTES {
            break;
        }
        let v: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "invalid json on stdin");
                continue;
            }
        };

        // Ignore notifications (no "id").
        if v.get("id").is_none() {
            if let Ok(note) = serde_json::from_value::<JsonRpcNotification>(v.clone()) {
                if note.jsonrpc == "2.0" {
                    continue;
                }
            }
        }

        let req: JsonRpcRequest = match serde_json::from_value(v) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "failed to parse jsonrpc request");
                continue;
            }
        };

        if req.jsonrpc != "2.0" {
            write_frame(
                &mut stdout,
                &err(req.id, "invalid_request", "invalid jsonrpc version"),
            )
            .await?;
            continue;
        }

        let resp = dispatch(&cli, paths, cfg, req).await;
        write_frame(&mut stdout, &resp).await?;
    }

    host_handle.shutdown();
    Ok(())
}

use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use serde_json::json;
use std::path::PathBuf;

// Bundle handlers manage the workspace selection themselves, so they skip the
// usual store() plumbing: export may target a foreign workspace path and
// import replaces the open handle.

fn param_path(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match param_path(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let workspace_path = match target_workspace(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Flush the WAL so the main database file carries every committed write.
    if let Some(store) = state.store.as_ref() {
        store.checkpoint();
    }

    match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(export) => ok(
            &req.id,
            json!({
                "ok": true,
                "path": out_path,
                "bundleFormat": export.bundle_format,
                "entryCount": export.entry_count,
                "dbSha256": export.db_sha256
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match param_path(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let workspace_path = match target_workspace(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The store must be closed before its file is replaced.
    state.store = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match Store::open(&workspace_path) {
        Ok(store) => {
            state.workspace = Some(workspace_path.clone());
            state.store = Some(store);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "store_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(import_bundle(state, req)),
        _ => None,
    }
}

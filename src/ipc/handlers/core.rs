use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::Store;
use serde_json::{json, Value};
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspaceOpen": state.store.is_some(),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match Store::open(&path) {
        Ok(store) => {
            state.workspace = Some(path.clone());
            state.store = Some(store);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn settings_get(store: &Store) -> Result<Value, HandlerErr> {
    let doc = store.get("settings", "school")?;
    Ok(json!({ "settings": doc.map(|d| d.body).unwrap_or_else(|| json!({})) }))
}

fn settings_update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "schoolName" | "address" | "motto" | "currentTerm" | "currentSession" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    let merged = Value::Object(merged);
    if store.get("settings", "school")?.is_some() {
        store.update("settings", "school", &merged)?;
    } else {
        store.set("settings", "school", &merged)?;
    }
    let settings = store.get("settings", "school")?;
    Ok(json!({ "settings": settings.map(|d| d.body) }))
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match settings_get(store) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match settings_update(store, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{doc_json, get_opt_str, get_required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{Order, Query, Store};
use serde_json::{json, Value};

/// "Further Mathematics" -> "further_mathematics". Result records carry these
/// ids, so they stay readable even when the subject document is deleted later.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = match get_opt_str(params, "subjectId") {
        Some(id) => id,
        None => slug(&name),
    };
    if id.is_empty() {
        return Err(HandlerErr::bad_params("subject name yields an empty id"));
    }
    if store.get("subjects", &id)?.is_some() {
        return Err(HandlerErr::conflict(format!(
            "subject already exists: {}",
            id
        )));
    }
    let now = records::now_rfc3339();
    let mut body = json!({
        "name": name,
        "createdAt": now,
        "updatedAt": now,
    });
    if let Some(code) = get_opt_str(params, "code") {
        body["code"] = json!(code);
    }
    store.create("subjects", Some(&id), &body)?;
    Ok(json!({ "subjectId": id, "name": name }))
}

fn list(store: &Store, _params: &Value) -> Result<Value, HandlerErr> {
    let docs = store.query(&Query::collection("subjects").order_by("name", Order::Asc))?;
    let subjects: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "subjects": subjects }))
}

fn update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "name" | "code" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    if store.get("subjects", &subject_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "subject not found: {}",
            subject_id
        )));
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    store.update("subjects", &subject_id, &Value::Object(merged))?;
    Ok(json!({ "subjectId": subject_id }))
}

fn delete(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    if !store.delete("subjects", &subject_id)? {
        return Err(HandlerErr::not_found(format!(
            "subject not found: {}",
            subject_id
        )));
    }
    Ok(json!({ "subjectId": subject_id, "deleted": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "subjects.create" => create(store, &req.params),
        "subjects.list" => list(store, &req.params),
        "subjects.update" => update(store, &req.params),
        "subjects.delete" => delete(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" | "subjects.list" | "subjects.update" | "subjects.delete" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}

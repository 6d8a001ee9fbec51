use crate::ipc::error::ok;
use crate::ipc::helpers::{audit_log, doc_json, get_opt_str, get_required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{BatchOp, Filter, Order, Query, Store};
use serde_json::{json, Value};
use uuid::Uuid;

/// Registration payloads are validated at submit time so that approval can
/// never fail on a malformed payload later.
fn submit(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let kind = get_required_str(params, "kind")?;
    if kind != "teacher" && kind != "parent" {
        return Err(HandlerErr::bad_params(format!(
            "kind must be teacher or parent, got {}",
            kind
        )));
    }
    let payload = params
        .get("payload")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.payload"))?;
    for field in ["firstName", "lastName"] {
        let present = payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !present {
            return Err(HandlerErr::bad_params(format!(
                "payload.{} is required",
                field
            )));
        }
    }
    let body = json!({
        "kind": kind,
        "payload": Value::Object(payload.clone()),
        "status": "pending",
        "submittedAt": records::now_rfc3339(),
    });
    let id = store.create("pendingRegistrations", None, &body)?;
    Ok(json!({ "registrationId": id }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let mut q =
        Query::collection("pendingRegistrations").order_by("submittedAt", Order::Asc);
    if let Some(status) = get_opt_str(params, "status") {
        q = q.filter(Filter::Eq("status", json!(status)));
    }
    let docs = store.query(&q)?;
    let registrations: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "registrations": registrations }))
}

fn pending_registration(
    store: &Store,
    registration_id: &str,
) -> Result<crate::store::Document, HandlerErr> {
    let doc = store
        .get("pendingRegistrations", registration_id)?
        .ok_or_else(|| {
            HandlerErr::not_found(format!("registration not found: {}", registration_id))
        })?;
    let status = doc.str_field("status").unwrap_or("");
    if status != "pending" {
        return Err(HandlerErr::conflict(format!(
            "registration already decided: {}",
            status
        )));
    }
    Ok(doc)
}

/// Approval creates the real entity and closes the registration in one
/// transaction, so a crash can never leave an approved registration without
/// its teacher or parent document.
fn approve(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let registration_id = get_required_str(params, "registrationId")?;
    let actor = get_required_str(params, "decidedBy")?;
    let reg = pending_registration(store, &registration_id)?;
    let kind = reg.str_field("kind").unwrap_or("");
    let collection = match kind {
        "teacher" => "teachers",
        "parent" => "parents",
        other => {
            return Err(HandlerErr::conflict(format!(
                "registration has unknown kind: {}",
                other
            )))
        }
    };
    let mut entity = reg
        .body
        .get("payload")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let now = records::now_rfc3339();
    entity.insert("active".to_string(), json!(true));
    entity.insert("createdAt".to_string(), json!(now));
    entity.insert("updatedAt".to_string(), json!(now));
    if collection == "parents" && !entity.contains_key("children") {
        entity.insert("children".to_string(), json!([]));
    }
    let entity_id = Uuid::new_v4().to_string();

    store.apply_batch(&[
        BatchOp::Set {
            collection,
            id: entity_id.clone(),
            body: Value::Object(entity),
        },
        BatchOp::Update {
            collection: "pendingRegistrations",
            id: registration_id.clone(),
            patch: json!({
                "status": "approved",
                "decidedBy": actor,
                "decidedAt": now,
                "createdId": entity_id,
            }),
        },
        audit_log(
            "approvals.approve",
            &actor,
            Some(&entity_id),
            json!({ "registrationId": registration_id, "kind": kind }),
        ),
    ])?;
    Ok(json!({
        "registrationId": registration_id,
        "kind": kind,
        "createdId": entity_id,
    }))
}

fn reject(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let registration_id = get_required_str(params, "registrationId")?;
    let actor = get_required_str(params, "decidedBy")?;
    let reason = get_opt_str(params, "reason");
    pending_registration(store, &registration_id)?;
    let mut patch = json!({
        "status": "rejected",
        "decidedBy": actor,
        "decidedAt": records::now_rfc3339(),
    });
    if let Some(reason) = &reason {
        patch["reason"] = json!(reason);
    }
    store.apply_batch(&[
        BatchOp::Update {
            collection: "pendingRegistrations",
            id: registration_id.clone(),
            patch,
        },
        audit_log(
            "approvals.reject",
            &actor,
            None,
            json!({ "registrationId": registration_id, "reason": reason }),
        ),
    ])?;
    Ok(json!({ "registrationId": registration_id, "status": "rejected" }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "approvals.submit" => submit(store, &req.params),
        "approvals.list" => list(store, &req.params),
        "approvals.approve" => approve(store, &req.params),
        "approvals.reject" => reject(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "approvals.submit" | "approvals.list" | "approvals.approve" | "approvals.reject" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}

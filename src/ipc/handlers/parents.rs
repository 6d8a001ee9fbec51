use crate::ipc::error::ok;
use crate::ipc::helpers::{doc_json, get_opt_str, get_required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{Filter, Order, Query, Store};
use serde_json::{json, Value};

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let now = records::now_rfc3339();
    let mut body = json!({
        "firstName": first_name,
        "lastName": last_name,
        "children": [],
        "active": true,
        "createdAt": now,
        "updatedAt": now,
    });
    if let Some(phone) = get_opt_str(params, "phone") {
        body["phone"] = json!(phone);
    }
    if let Some(email) = get_opt_str(params, "email") {
        body["email"] = json!(email);
    }
    if let Some(address) = get_opt_str(params, "address") {
        body["address"] = json!(address);
    }
    let id = store.create("parents", None, &body)?;
    Ok(json!({ "parentId": id }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mut q = Query::collection("parents").order_by("lastName", Order::Asc);
    if !include_inactive {
        q = q.filter(Filter::Eq("active", json!(true)));
    }
    let docs = store.query(&q)?;
    let parents: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "parents": parents }))
}

fn update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "firstName" | "lastName" | "phone" | "email" | "address" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    if store.get("parents", &parent_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "parent not found: {}",
            parent_id
        )));
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    store.update("parents", &parent_id, &Value::Object(merged))?;
    Ok(json!({ "parentId": parent_id }))
}

fn deactivate(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    if store.get("parents", &parent_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "parent not found: {}",
            parent_id
        )));
    }
    store.update(
        "parents",
        &parent_id,
        &json!({ "active": false, "updatedAt": records::now_rfc3339() }),
    )?;
    Ok(json!({ "parentId": parent_id, "active": false }))
}

fn children_of(doc: &crate::store::Document) -> Vec<String> {
    doc.body
        .get("children")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn link_child(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    let student_ref = get_required_str(params, "studentId")?;
    let parent = store.get("parents", &parent_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("parent not found: {}", parent_id))
    })?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;
    let mut children = children_of(&parent);
    if !children.contains(&student.id) {
        children.push(student.id.clone());
        store.update(
            "parents",
            &parent_id,
            &json!({ "children": children, "updatedAt": records::now_rfc3339() }),
        )?;
    }
    Ok(json!({ "parentId": parent_id, "children": children }))
}

fn unlink_child(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    let student_ref = get_required_str(params, "studentId")?;
    let parent = store.get("parents", &parent_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("parent not found: {}", parent_id))
    })?;
    // The child may already be gone from the roll; unlink by the raw ref too.
    let resolved = records::resolve_student(store, &student_ref)?.map(|d| d.id);
    let mut children = children_of(&parent);
    let before = children.len();
    children.retain(|c| c != &student_ref && Some(c) != resolved.as_ref());
    if children.len() != before {
        store.update(
            "parents",
            &parent_id,
            &json!({ "children": children, "updatedAt": records::now_rfc3339() }),
        )?;
    }
    Ok(json!({ "parentId": parent_id, "children": children }))
}

fn children(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    let parent = store.get("parents", &parent_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("parent not found: {}", parent_id))
    })?;
    let mut out: Vec<Value> = Vec::new();
    for child_id in children_of(&parent) {
        if let Some(doc) = store.get("students", &child_id)? {
            out.push(doc_json(&doc));
        }
    }
    Ok(json!({ "parentId": parent_id, "children": out }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "parents.create" => create(store, &req.params),
        "parents.list" => list(store, &req.params),
        "parents.update" => update(store, &req.params),
        "parents.deactivate" => deactivate(store, &req.params),
        "parents.linkChild" => link_child(store, &req.params),
        "parents.unlinkChild" => unlink_child(store, &req.params),
        "parents.children" => children(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "parents.create" | "parents.list" | "parents.update" | "parents.deactivate"
        | "parents.linkChild" | "parents.unlinkChild" | "parents.children" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{doc_json, get_opt_str, get_required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{Filter, Order, Query, Store};
use serde_json::{json, Value};
use std::collections::HashMap;

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let now = records::now_rfc3339();
    let mut body = json!({
        "name": name,
        "createdAt": now,
        "updatedAt": now,
    });
    if let Some(level) = get_opt_str(params, "level") {
        body["level"] = json!(level);
    }
    if let Some(teacher_id) = get_opt_str(params, "formTeacherId") {
        if store.get("teachers", &teacher_id)?.is_none() {
            return Err(HandlerErr::not_found(format!(
                "teacher not found: {}",
                teacher_id
            )));
        }
        body["formTeacherId"] = json!(teacher_id);
    }
    let id = store.create("classes", None, &body)?;
    Ok(json!({ "classId": id, "name": name }))
}

/// Counts ride along so the desk view can show roll sizes without a query per
/// class. One pass over the active roll, grouped in memory.
fn list(store: &Store, _params: &Value) -> Result<Value, HandlerErr> {
    let classes = store.query(&Query::collection("classes").order_by("name", Order::Asc))?;
    let students = store.query(
        &Query::collection("students").filter(Filter::Eq("active", json!(true))),
    )?;
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for s in &students {
        if let Some(class_id) = s.str_field("classId") {
            *counts.entry(class_id).or_insert(0) += 1;
        }
    }
    let out: Vec<Value> = classes
        .iter()
        .map(|c| {
            let mut v = doc_json(c);
            v["studentCount"] = json!(counts.get(c.id.as_str()).copied().unwrap_or(0));
            v
        })
        .collect();
    Ok(json!({ "classes": out }))
}

fn update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "name" | "level" | "formTeacherId" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }
    if let Some(teacher_id) = patch.get("formTeacherId").and_then(|v| v.as_str()) {
        if store.get("teachers", teacher_id)?.is_none() {
            return Err(HandlerErr::not_found(format!(
                "teacher not found: {}",
                teacher_id
            )));
        }
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    store.update("classes", &class_id, &Value::Object(merged))?;
    Ok(json!({ "classId": class_id }))
}

/// Deleting a class with students still on it, active or not, would strand
/// their records. The caller has to transfer them out first.
fn delete(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }
    let remaining = store.query(
        &Query::collection("students")
            .filter(Filter::Eq("classId", json!(class_id)))
            .limit(1),
    )?;
    if !remaining.is_empty() {
        return Err(HandlerErr::conflict(
            "class still has students; transfer them before deleting",
        ));
    }
    store.delete("classes", &class_id)?;
    Ok(json!({ "classId": class_id, "deleted": true }))
}

fn roster(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = store.get("classes", &class_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("class not found: {}", class_id))
    })?;
    let students = records::active_students_in_class(store, &class_id)?;
    let out: Vec<Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "admissionNo": s.str_field("admissionNo"),
                "displayName": records::student_display_name(s),
                "subjects": s.body.get("subjects").cloned().unwrap_or_else(|| json!([])),
            })
        })
        .collect();
    Ok(json!({
        "classId": class_id,
        "className": class.str_field("name"),
        "students": out,
    }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "classes.create" => create(store, &req.params),
        "classes.list" => list(store, &req.params),
        "classes.update" => update(store, &req.params),
        "classes.delete" => delete(store, &req.params),
        "classes.roster" => roster(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" | "classes.list" | "classes.update" | "classes.delete"
        | "classes.roster" => Some(dispatch(state, req)),
        _ => None,
    }
}

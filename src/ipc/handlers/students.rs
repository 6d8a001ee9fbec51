use crate::ipc::error::ok;
use crate::ipc::helpers::{
    doc_json, get_opt_str, get_required_str, get_str_array, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{Filter, Order, Query, Store};
use serde_json::{json, Value};

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let admission_no = get_required_str(params, "admissionNo")?;
    let class_id = get_required_str(params, "classId")?;
    let subjects = get_str_array(params, "subjects")?;

    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }
    let taken = store.query(
        &Query::collection("students")
            .filter(Filter::Eq("admissionNo", json!(admission_no)))
            .limit(1),
    )?;
    if !taken.is_empty() {
        return Err(HandlerErr::conflict(format!(
            "admission number already in use: {}",
            admission_no
        )));
    }

    let now = records::now_rfc3339();
    let mut body = json!({
        "firstName": first_name,
        "lastName": last_name,
        "admissionNo": admission_no,
        "classId": class_id,
        "subjects": subjects,
        "active": true,
        "createdAt": now,
        "updatedAt": now,
    });
    if let Some(track) = get_opt_str(params, "track") {
        body["track"] = json!(track);
    }
    if let Some(guardian) = get_opt_str(params, "guardianPhone") {
        body["guardianPhone"] = json!(guardian);
    }
    let id = store.create("students", None, &body)?;
    Ok(json!({ "studentId": id }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mut q = Query::collection("students").order_by("lastName", Order::Asc);
    if let Some(class_id) = get_opt_str(params, "classId") {
        q = q.filter(Filter::Eq("classId", json!(class_id)));
    }
    if !include_inactive {
        q = q.filter(Filter::Eq("active", json!(true)));
    }
    let docs = store.query(&q)?;
    let students: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "students": students }))
}

fn get(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    Ok(json!({ "student": doc_json(&doc) }))
}

fn resolve(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    Ok(json!({
        "studentId": doc.id,
        "admissionNo": doc.str_field("admissionNo"),
        "displayName": records::student_display_name(&doc),
        "classId": doc.str_field("classId"),
    }))
}

fn update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "firstName" | "lastName" | "admissionNo" | "track" | "guardianPhone" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    if let Some(new_adm) = patch.get("admissionNo").and_then(|v| v.as_str()) {
        let taken = store.query(
            &Query::collection("students")
                .filter(Filter::Eq("admissionNo", json!(new_adm)))
                .limit(1),
        )?;
        if taken.iter().any(|d| d.id != doc.id) {
            return Err(HandlerErr::conflict(format!(
                "admission number already in use: {}",
                new_adm
            )));
        }
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    store.update("students", &doc.id, &Value::Object(merged))?;
    Ok(json!({ "studentId": doc.id }))
}

fn transfer(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    let to_class = get_required_str(params, "toClassId")?;
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    if store.get("classes", &to_class)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            to_class
        )));
    }
    store.update(
        "students",
        &doc.id,
        &json!({ "classId": to_class, "updatedAt": records::now_rfc3339() }),
    )?;
    Ok(json!({ "studentId": doc.id, "classId": to_class }))
}

fn set_subjects(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    if params.get("subjects").map(|v| v.is_null()).unwrap_or(true) {
        return Err(HandlerErr::bad_params("missing params.subjects"));
    }
    let subjects = get_str_array(params, "subjects")?;
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    store.update(
        "students",
        &doc.id,
        &json!({ "subjects": subjects, "updatedAt": records::now_rfc3339() }),
    )?;
    Ok(json!({ "studentId": doc.id, "subjects": subjects }))
}

fn deactivate(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let r = get_required_str(params, "studentId")?;
    let doc = records::resolve_student(store, &r)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", r)))?;
    store.update(
        "students",
        &doc.id,
        &json!({ "active": false, "updatedAt": records::now_rfc3339() }),
    )?;
    Ok(json!({ "studentId": doc.id, "active": false }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "students.create" => create(store, &req.params),
        "students.list" => list(store, &req.params),
        "students.get" => get(store, &req.params),
        "students.resolve" => resolve(store, &req.params),
        "students.update" => update(store, &req.params),
        "students.transfer" => transfer(store, &req.params),
        "students.setSubjects" => set_subjects(store, &req.params),
        "students.deactivate" => deactivate(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" | "students.list" | "students.get" | "students.resolve"
        | "students.update" | "students.transfer" | "students.setSubjects"
        | "students.deactivate" => Some(dispatch(state, req)),
        _ => None,
    }
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    audit_log, doc_json, get_opt_str, get_required_str, get_str_array, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{BatchOp, Filter, Order, Query, Store};
use serde_json::{json, Value};

fn assignment_id(teacher_id: &str, class_id: &str, subject_id: &str) -> String {
    format!("ta_{}_{}_{}", teacher_id, class_id, subject_id)
}

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let subjects = get_str_array(params, "subjects")?;
    let now = records::now_rfc3339();
    let mut body = json!({
        "firstName": first_name,
        "lastName": last_name,
        "subjects": subjects,
        "active": true,
        "createdAt": now,
        "updatedAt": now,
    });
    if let Some(staff_no) = get_opt_str(params, "staffNo") {
        let taken = store.query(
            &Query::collection("teachers")
                .filter(Filter::Eq("staffNo", json!(staff_no)))
                .limit(1),
        )?;
        if !taken.is_empty() {
            return Err(HandlerErr::conflict(format!(
                "staff number already in use: {}",
                staff_no
            )));
        }
        body["staffNo"] = json!(staff_no);
    }
    if let Some(email) = get_opt_str(params, "email") {
        body["email"] = json!(email);
    }
    if let Some(phone) = get_opt_str(params, "phone") {
        body["phone"] = json!(phone);
    }
    let id = store.create("teachers", None, &body)?;
    Ok(json!({ "teacherId": id }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mut q = Query::collection("teachers").order_by("lastName", Order::Asc);
    if !include_inactive {
        q = q.filter(Filter::Eq("active", json!(true)));
    }
    let docs = store.query(&q)?;
    let teachers: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "teachers": teachers }))
}

fn update(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing params.patch"))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    for key in patch.keys() {
        match key.as_str() {
            "firstName" | "lastName" | "staffNo" | "email" | "phone" | "subjects" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown patch field: {}",
                    other
                )))
            }
        }
    }
    if store.get("teachers", &teacher_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "teacher not found: {}",
            teacher_id
        )));
    }
    let mut merged = patch.clone();
    merged.insert(
        "updatedAt".to_string(),
        Value::String(records::now_rfc3339()),
    );
    store.update("teachers", &teacher_id, &Value::Object(merged))?;
    Ok(json!({ "teacherId": teacher_id }))
}

fn deactivate(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    if store.get("teachers", &teacher_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "teacher not found: {}",
            teacher_id
        )));
    }
    store.update(
        "teachers",
        &teacher_id,
        &json!({ "active": false, "updatedAt": records::now_rfc3339() }),
    )?;
    Ok(json!({ "teacherId": teacher_id, "active": false }))
}

fn assign(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let actor = get_required_str(params, "assignedBy")?;

    let teacher = store.get("teachers", &teacher_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("teacher not found: {}", teacher_id))
    })?;
    if !teacher.bool_field("active").unwrap_or(false) {
        return Err(HandlerErr::conflict(format!(
            "teacher is inactive: {}",
            teacher_id
        )));
    }
    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }

    let id = assignment_id(&teacher_id, &class_id, &subject_id);
    let body = json!({
        "teacherId": teacher_id,
        "classId": class_id,
        "subjectId": subject_id,
        "assignedBy": actor,
        "assignedAt": records::now_rfc3339(),
    });
    // Re-assigning the same triple rewrites the same row.
    store.apply_batch(&[
        BatchOp::Set {
            collection: "teacherAssignments",
            id: id.clone(),
            body,
        },
        audit_log(
            "assignments.assign",
            &actor,
            Some(&teacher_id),
            json!({ "classId": class_id, "subjectId": subject_id }),
        ),
    ])?;
    Ok(json!({ "assignmentId": id }))
}

fn assignments_list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let mut q = Query::collection("teacherAssignments").order_by("assignedAt", Order::Asc);
    if let Some(teacher_id) = get_opt_str(params, "teacherId") {
        q = q.filter(Filter::Eq("teacherId", json!(teacher_id)));
    }
    if let Some(class_id) = get_opt_str(params, "classId") {
        q = q.filter(Filter::Eq("classId", json!(class_id)));
    }
    let docs = store.query(&q)?;
    let assignments: Vec<Value> = docs.iter().map(doc_json).collect();
    Ok(json!({ "assignments": assignments }))
}

fn assignments_remove(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let actor = get_required_str(params, "removedBy")?;
    let doc = store.get("teacherAssignments", &assignment_id)?.ok_or_else(|| {
        HandlerErr::not_found(format!("assignment not found: {}", assignment_id))
    })?;
    store.apply_batch(&[
        BatchOp::Delete {
            collection: "teacherAssignments",
            id: assignment_id.clone(),
        },
        audit_log(
            "assignments.remove",
            &actor,
            doc.str_field("teacherId"),
            json!({ "assignmentId": assignment_id }),
        ),
    ])?;
    Ok(json!({ "assignmentId": assignment_id, "removed": true }))
}

/// Assignments whose teacher is gone or deactivated are dead weight for the
/// timetable views. Deletes them all in one transaction and leaves a single
/// audit entry naming every removed row.
fn prune_orphaned(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let actor = get_required_str(params, "prunedBy")?;
    let assignments = store.query(&Query::collection("teacherAssignments"))?;
    let mut orphaned: Vec<String> = Vec::new();
    for a in &assignments {
        let Some(teacher_id) = a.str_field("teacherId") else {
            orphaned.push(a.id.clone());
            continue;
        };
        match store.get("teachers", teacher_id)? {
            Some(t) if t.bool_field("active").unwrap_or(false) => {}
            _ => orphaned.push(a.id.clone()),
        }
    }
    if orphaned.is_empty() {
        return Ok(json!({ "removed": 0, "assignmentIds": [] }));
    }
    let mut ops: Vec<BatchOp> = orphaned
        .iter()
        .map(|id| BatchOp::Delete {
            collection: "teacherAssignments",
            id: id.clone(),
        })
        .collect();
    ops.push(audit_log(
        "assignments.pruneOrphaned",
        &actor,
        None,
        json!({ "removed": orphaned.len(), "assignmentIds": orphaned }),
    ));
    store.apply_batch(&ops)?;
    Ok(json!({ "removed": orphaned.len(), "assignmentIds": orphaned }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "teachers.create" => create(store, &req.params),
        "teachers.list" => list(store, &req.params),
        "teachers.update" => update(store, &req.params),
        "teachers.deactivate" => deactivate(store, &req.params),
        "assignments.assign" => assign(store, &req.params),
        "assignments.list" => assignments_list(store, &req.params),
        "assignments.remove" => assignments_remove(store, &req.params),
        "assignments.pruneOrphaned" => prune_orphaned(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" | "teachers.list" | "teachers.update" | "teachers.deactivate"
        | "assignments.assign" | "assignments.list" | "assignments.remove"
        | "assignments.pruneOrphaned" => Some(dispatch(state, req)),
        _ => None,
    }
}

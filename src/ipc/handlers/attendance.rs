use crate::ipc::error::ok;
use crate::ipc::helpers::{
    doc_json, get_opt_str, get_required_str, resolve_period, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{BatchOp, Filter, Order, Query, Store};
use serde_json::{json, Value};

const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn check_status(status: &str) -> Result<(), HandlerErr> {
    if STATUSES.contains(&status) {
        return Ok(());
    }
    Err(HandlerErr::bad_params(format!(
        "status must be one of present, absent, late, excused; got {}",
        status
    )))
}

fn check_date(date: &str) -> Result<(), HandlerErr> {
    records::date_millis(date)
        .map(|_| ())
        .ok_or_else(|| HandlerErr::bad_params(format!("date must be YYYY-MM-DD, got {}", date)))
}

fn entry_id(student_id: &str, date: &str) -> String {
    format!("att_{}_{}", student_id, date)
}

/// One row per student per day. Re-recording the same day overwrites the
/// earlier status instead of stacking a second row.
fn record(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let date = get_required_str(params, "date")?;
    let status = get_required_str(params, "status")?;
    check_date(&date)?;
    check_status(&status)?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;

    let id = entry_id(&student.id, &date);
    let mut body = json!({
        "studentId": student.id,
        "classId": student.str_field("classId"),
        "date": date,
        "status": status,
        "term": period.term,
        "session": period.session,
        "recordedAt": records::now_rfc3339(),
    });
    if let Some(actor) = get_opt_str(params, "recordedBy") {
        body["recordedBy"] = json!(actor);
    }
    store.set("attendance", &id, &body)?;
    Ok(json!({ "attendanceId": id, "status": status }))
}

/// Whole-class register for one date. Unknown students in the entry list are
/// skipped and counted rather than failing the batch; every accepted row lands
/// in one transaction.
fn bulk_record(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    check_date(&date)?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing params.entries"))?;
    let period = resolve_period(store, params)?;
    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }
    let roster = records::active_students_in_class(store, &class_id)?;
    let recorded_by = get_opt_str(params, "recordedBy");
    let now = records::now_rfc3339();

    let mut ops: Vec<BatchOp> = Vec::new();
    let mut skipped = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("entries[].studentId is required"));
        };
        let Some(status) = entry.get("status").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("entries[].status is required"));
        };
        check_status(status)?;
        if !roster.iter().any(|s| s.id == student_id) {
            skipped += 1;
            continue;
        }
        let mut body = json!({
            "studentId": student_id,
            "classId": class_id,
            "date": date,
            "status": status,
            "term": period.term,
            "session": period.session,
            "recordedAt": now,
        });
        if let Some(actor) = &recorded_by {
            body["recordedBy"] = json!(actor);
        }
        ops.push(BatchOp::Set {
            collection: "attendance",
            id: entry_id(student_id, &date),
            body,
        });
    }
    if !ops.is_empty() {
        store.apply_batch(&ops)?;
    }
    Ok(json!({ "recorded": ops.len(), "skipped": skipped }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    if let Some(student_ref) = get_opt_str(params, "studentId") {
        let student = records::resolve_student(store, &student_ref)?.ok_or_else(|| {
            HandlerErr::not_found(format!("student not found: {}", student_ref))
        })?;
        let period = resolve_period(store, params)?;
        let docs = records::attendance_for(store, &student.id, &period.term, &period.session)?;
        let entries: Vec<Value> = docs.iter().map(doc_json).collect();
        let tally = records::tally_attendance(&docs);
        return Ok(json!({
            "entries": entries,
            "summary": {
                "present": tally.present,
                "absent": tally.absent,
                "late": tally.late,
                "excused": tally.excused,
                "percentage": tally.percentage(),
            },
        }));
    }
    if let Some(class_id) = get_opt_str(params, "classId") {
        let date = get_required_str(params, "date")?;
        check_date(&date)?;
        let docs = store.query(
            &Query::collection("attendance")
                .filter(Filter::Eq("classId", json!(class_id)))
                .filter(Filter::Eq("date", json!(date)))
                .order_by("studentId", Order::Asc),
        )?;
        let entries: Vec<Value> = docs.iter().map(doc_json).collect();
        return Ok(json!({ "entries": entries }));
    }
    Err(HandlerErr::bad_params(
        "pass studentId (with term/session) or classId with date",
    ))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "attendance.record" => record(store, &req.params),
        "attendance.bulkRecord" => bulk_record(store, &req.params),
        "attendance.list" => list(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" | "attendance.bulkRecord" | "attendance.list" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}

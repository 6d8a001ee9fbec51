use crate::ipc::error::ok;
use crate::ipc::helpers::{
    doc_json, get_opt_str, get_required_i64, get_required_str, resolve_period, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::reports::{sanitize_id_component, Period};
use crate::store::{BatchOp, Store};
use serde_json::{json, Value};
use uuid::Uuid;

fn summary_id(student_id: &str, period: &Period) -> String {
    format!(
        "merit_{}_{}_{}",
        sanitize_id_component(student_id),
        sanitize_id_component(&period.term),
        sanitize_id_component(&period.session)
    )
}

/// Award and running summary move together: the record insert and the
/// recomputed summary land in one transaction. The running total never goes
/// below zero no matter how many demerits stack up.
fn award(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let points = get_required_i64(params, "points")?;
    if points == 0 {
        return Err(HandlerErr::bad_params("points must be non-zero"));
    }
    let reason = get_required_str(params, "reason")?;
    let awarded_by = get_required_str(params, "awardedBy")?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;

    let date = match get_opt_str(params, "date") {
        Some(date) => {
            if records::date_millis(&date).is_none() {
                return Err(HandlerErr::bad_params(format!(
                    "date must be YYYY-MM-DD, got {}",
                    date
                )));
            }
            date
        }
        None => records::today_date(),
    };

    let mut record = json!({
        "studentId": student.id,
        "classId": student.str_field("classId"),
        "points": points,
        "reason": reason,
        "date": date,
        "term": period.term,
        "session": period.session,
        "awardedBy": awarded_by,
        "recordedAt": records::now_rfc3339(),
    });
    if let Some(category) = get_opt_str(params, "category") {
        record["category"] = json!(category);
    }

    let sid = summary_id(&student.id, &period);
    let prior = store
        .get("meritSummaries", &sid)?
        .and_then(|d| d.i64_field("total"))
        .unwrap_or(0);
    let total = (prior + points).max(0);
    let tier = records::merit_tier(total);

    let record_id = Uuid::new_v4().to_string();
    store.apply_batch(&[
        BatchOp::Set {
            collection: "meritRecords",
            id: record_id.clone(),
            body: record,
        },
        BatchOp::Set {
            collection: "meritSummaries",
            id: sid,
            body: json!({
                "studentId": student.id,
                "term": period.term,
                "session": period.session,
                "total": total,
                "tier": tier,
                "updatedAt": records::now_rfc3339(),
            }),
        },
    ])?;
    Ok(json!({ "recordId": record_id, "total": total, "tier": tier }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;
    let docs = records::merit_records_for(store, &student.id, &period.term, &period.session)?;
    let entries: Vec<Value> = docs.iter().map(doc_json).collect();
    let tally = records::tally_merit(&docs);
    Ok(json!({
        "entries": entries,
        "merit": tally.merit,
        "demerit": tally.demerit,
        "net": tally.net(),
    }))
}

/// Missing summary reads as zero, the state of a student nobody has awarded
/// anything yet.
fn summary(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;
    let sid = summary_id(&student.id, &period);
    match store.get("meritSummaries", &sid)? {
        Some(doc) => Ok(json!({ "summary": doc_json(&doc) })),
        None => Ok(json!({
            "summary": {
                "studentId": student.id,
                "term": period.term,
                "session": period.session,
                "total": 0,
                "tier": "None",
            }
        })),
    }
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "merit.award" => award(store, &req.params),
        "merit.list" => list(store, &req.params),
        "merit.summary" => summary(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "merit.award" | "merit.list" | "merit.summary" => Some(dispatch(state, req)),
        _ => None,
    }
}

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    doc_json, get_opt_str, get_required_f64, get_required_str, resolve_period, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, AssessmentType};
use crate::store::{Filter, Order, Query, Store};
use serde_json::{json, Value};

fn check_range(label: &str, score: f64, max: f64) -> Result<(), HandlerErr> {
    if score < 0.0 || score > max {
        return Err(HandlerErr::bad_params(format!(
            "{} must be between 0 and {}, got {}",
            label, max, score
        )));
    }
    Ok(())
}

/// Tagged shape: one assessment column per call. The legacy flat shape
/// (ca1/ca2/exam on a single row) is still accepted so imported gradebooks can
/// be replayed through the same method.
fn record(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;

    let mut body = json!({
        "studentId": student.id,
        "classId": student.str_field("classId"),
        "subjectId": subject_id,
        "term": period.term,
        "session": period.session,
        "recordedAt": records::now_rfc3339(),
    });
    if let Some(actor) = get_opt_str(params, "recordedBy") {
        body["recordedBy"] = json!(actor);
    }

    match get_opt_str(params, "assessmentType") {
        Some(tag) => {
            let assessment = AssessmentType::parse(&tag).ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "assessmentType must be one of classwork, homework, ca1, ca2, exam; got {}",
                    tag
                ))
            })?;
            let score = get_required_f64(params, "score")?;
            let max = params
                .get("maxScore")
                .and_then(|v| v.as_f64())
                .unwrap_or_else(|| assessment.default_max());
            if max <= 0.0 {
                return Err(HandlerErr::bad_params("maxScore must be positive"));
            }
            check_range("score", score, max)?;
            body["assessmentType"] = json!(assessment.as_str());
            body["score"] = json!(score);
            body["maxScore"] = json!(max);
        }
        None => {
            let mut any = false;
            for (key, assessment) in [
                ("ca1", AssessmentType::Ca1),
                ("ca2", AssessmentType::Ca2),
                ("exam", AssessmentType::Exam),
            ] {
                let Some(score) = params.get(key).and_then(|v| v.as_f64()) else {
                    continue;
                };
                check_range(key, score, assessment.default_max())?;
                body[key] = json!(score);
                any = true;
            }
            if !any {
                return Err(HandlerErr::bad_params(
                    "pass assessmentType with score, or at least one of ca1, ca2, exam",
                ));
            }
        }
    }

    let id = store.create("results", None, &body)?;
    Ok(json!({ "resultId": id }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;

    let mut q = Query::collection("results")
        .filter(Filter::Eq("studentId", json!(student.id)))
        .filter(Filter::Eq("term", json!(period.term)))
        .filter(Filter::Eq("session", json!(period.session)))
        .order_by("recordedAt", Order::Asc);
    if let Some(subject_id) = get_opt_str(params, "subjectId") {
        q = q.filter(Filter::Eq("subjectId", json!(subject_id)));
    }
    let docs = store.query(&q)?;

    let raw: Vec<Value> = docs.iter().map(doc_json).collect();
    let normalized: Vec<Value> = docs
        .iter()
        .flat_map(|d| records::normalize_result(d))
        .map(|e| {
            json!({
                "subjectId": e.subject_id,
                "assessmentType": e.assessment.as_str(),
                "score": e.score,
                "maxScore": e.max_score,
            })
        })
        .collect();
    Ok(json!({ "results": raw, "normalized": normalized }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "results.record" => record(store, &req.params),
        "results.list" => list(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.record" | "results.list" => Some(dispatch(state, req)),
        _ => None,
    }
}

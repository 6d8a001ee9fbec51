use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_required_i64, get_required_str, resolve_period, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records::AssessmentType;
use crate::reports::{
    bulk_generate, generate_ca_report, generate_term_report, generate_weekly_report,
    report_collection_for_id,
};
use crate::store::Store;
use serde_json::{json, Value};

fn ca_assessment(params: &Value) -> Result<AssessmentType, HandlerErr> {
    let tag = get_required_str(params, "assessmentType")?;
    match AssessmentType::parse(&tag) {
        Some(a @ (AssessmentType::Ca1 | AssessmentType::Ca2)) => Ok(a),
        _ => Err(HandlerErr::bad_params(format!(
            "assessmentType must be ca1 or ca2, got {}",
            tag
        ))),
    }
}

fn generate_ca(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let assessment = ca_assessment(params)?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let period = resolve_period(store, params)?;
    let card = generate_ca_report(store, &student_ref, &period, assessment, &generated_by)?;
    Ok(json!({ "reportId": card.id, "report": card }))
}

fn generate_term(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let period = resolve_period(store, params)?;
    let card = generate_term_report(store, &student_ref, &period, &generated_by)?;
    Ok(json!({ "reportId": card.id, "report": card }))
}

fn generate_weekly(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let week_start = get_required_i64(params, "weekStart")?;
    let week_end = get_required_i64(params, "weekEnd")?;
    let period = resolve_period(store, params)?;
    let card = generate_weekly_report(
        store,
        &student_ref,
        &period,
        week_start,
        week_end,
        &generated_by,
    )?;
    Ok(json!({ "reportId": card.id, "report": card }))
}

fn require_class(store: &Store, params: &Value) -> Result<String, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if store.get("classes", &class_id)?.is_none() {
        return Err(HandlerErr::not_found(format!(
            "class not found: {}",
            class_id
        )));
    }
    Ok(class_id)
}

fn bulk_ca(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(store, params)?;
    let assessment = ca_assessment(params)?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let period = resolve_period(store, params)?;
    let outcome = bulk_generate(store, &class_id, |store, student| {
        generate_ca_report(store, &student.id, &period, assessment, &generated_by).map(|_| ())
    })?;
    Ok(json!(outcome))
}

fn bulk_term(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(store, params)?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let period = resolve_period(store, params)?;
    let outcome = bulk_generate(store, &class_id, |store, student| {
        generate_term_report(store, &student.id, &period, &generated_by).map(|_| ())
    })?;
    Ok(json!(outcome))
}

fn bulk_weekly(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(store, params)?;
    let generated_by = get_required_str(params, "generatedBy")?;
    let week_start = get_required_i64(params, "weekStart")?;
    let week_end = get_required_i64(params, "weekEnd")?;
    let period = resolve_period(store, params)?;
    let outcome = bulk_generate(store, &class_id, |store, student| {
        generate_weekly_report(
            store,
            &student.id,
            &period,
            week_start,
            week_end,
            &generated_by,
        )
        .map(|_| ())
    })?;
    Ok(json!(outcome))
}

/// The id prefix says which collection a snapshot lives in, so fetching needs
/// no kind parameter.
fn get(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let collection = report_collection_for_id(&report_id).ok_or_else(|| {
        HandlerErr::not_found(format!("no report kind matches id: {}", report_id))
    })?;
    let doc = store
        .get(collection, &report_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("report not found: {}", report_id)))?;
    Ok(json!({ "report": doc.body }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "reports.generateCa" => generate_ca(store, &req.params),
        "reports.generateTerm" => generate_term(store, &req.params),
        "reports.generateWeekly" => generate_weekly(store, &req.params),
        "reports.bulkCa" => bulk_ca(store, &req.params),
        "reports.bulkTerm" => bulk_term(store, &req.params),
        "reports.bulkWeekly" => bulk_weekly(store, &req.params),
        "reports.get" => get(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.generateCa" | "reports.generateTerm" | "reports.generateWeekly"
        | "reports.bulkCa" | "reports.bulkTerm" | "reports.bulkWeekly" | "reports.get" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}

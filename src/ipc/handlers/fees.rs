use crate::ipc::error::ok;
use crate::ipc::helpers::{
    doc_json, get_opt_str, get_required_f64, get_required_str, resolve_period, store, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{Filter, Order, Query, Store};
use serde_json::{json, Value};

/// Status is derived, never stored: the payments array is the ledger and the
/// two totals say the rest.
fn fee_status(due: f64, paid: f64) -> &'static str {
    if paid <= 0.0 {
        "unpaid"
    } else if paid >= due {
        "paid"
    } else {
        "partial"
    }
}

fn with_status(doc: &crate::store::Document) -> Value {
    let due = doc.f64_field("amountDue").unwrap_or(0.0);
    let paid = doc.f64_field("amountPaid").unwrap_or(0.0);
    let mut v = doc_json(doc);
    v["status"] = json!(fee_status(due, paid));
    v["balance"] = json!((due - paid).max(0.0));
    v
}

fn create(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let student_ref = get_required_str(params, "studentId")?;
    let description = get_required_str(params, "description")?;
    let amount_due = get_required_f64(params, "amountDue")?;
    if amount_due <= 0.0 {
        return Err(HandlerErr::bad_params("amountDue must be positive"));
    }
    let period = resolve_period(store, params)?;
    let student = records::resolve_student(store, &student_ref)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_ref)))?;

    let now = records::now_rfc3339();
    let body = json!({
        "studentId": student.id,
        "classId": student.str_field("classId"),
        "description": description,
        "amountDue": amount_due,
        "amountPaid": 0.0,
        "payments": [],
        "term": period.term,
        "session": period.session,
        "createdAt": now,
        "updatedAt": now,
    });
    let id = store.create("fees", None, &body)?;
    Ok(json!({ "feeId": id, "status": "unpaid" }))
}

fn record_payment(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let amount = get_required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let received_by = get_required_str(params, "receivedBy")?;
    let mut fee = store
        .get("fees", &fee_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("fee not found: {}", fee_id)))?;

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
    let mut payment = json!({
        "amount": amount,
        "date": date,
        "receivedBy": received_by,
        "recordedAt": records::now_rfc3339(),
    });
    if let Some(method) = get_opt_str(params, "method") {
        payment["method"] = json!(method);
    }

    let due = fee.f64_field("amountDue").unwrap_or(0.0);
    let paid = fee.f64_field("amountPaid").unwrap_or(0.0) + amount;
    match fee.body.get_mut("payments").and_then(|v| v.as_array_mut()) {
        Some(arr) => arr.push(payment),
        None => fee.body["payments"] = json!([payment]),
    }
    fee.body["amountPaid"] = json!(paid);
    fee.body["updatedAt"] = json!(records::now_rfc3339());
    store.set("fees", &fee_id, &fee.body)?;

    Ok(json!({
        "feeId": fee_id,
        "amountPaid": paid,
        "balance": (due - paid).max(0.0),
        "status": fee_status(due, paid),
    }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let mut q = Query::collection("fees").order_by("createdAt", Order::Asc);
    let mut keyed = false;
    if let Some(student_ref) = get_opt_str(params, "studentId") {
        let student = records::resolve_student(store, &student_ref)?.ok_or_else(|| {
            HandlerErr::not_found(format!("student not found: {}", student_ref))
        })?;
        q = q.filter(Filter::Eq("studentId", json!(student.id)));
        keyed = true;
    } else if let Some(class_id) = get_opt_str(params, "classId") {
        q = q.filter(Filter::Eq("classId", json!(class_id)));
        keyed = true;
    }
    if !keyed {
        return Err(HandlerErr::bad_params("pass studentId or classId"));
    }
    if let Some(term) = get_opt_str(params, "term") {
        q = q.filter(Filter::Eq("term", json!(term)));
    }
    if let Some(session) = get_opt_str(params, "session") {
        q = q.filter(Filter::Eq("session", json!(session)));
    }
    let docs = store.query(&q)?;
    let fees: Vec<Value> = docs.iter().map(with_status).collect();
    let total_due: f64 = docs.iter().filter_map(|d| d.f64_field("amountDue")).sum();
    let total_paid: f64 = docs.iter().filter_map(|d| d.f64_field("amountPaid")).sum();
    Ok(json!({
        "fees": fees,
        "totalDue": total_due,
        "totalPaid": total_paid,
        "outstanding": (total_due - total_paid).max(0.0),
    }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "fees.create" => create(store, &req.params),
        "fees.recordPayment" => record_payment(store, &req.params),
        "fees.list" => list(store, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.create" | "fees.recordPayment" | "fees.list" => Some(dispatch(state, req)),
        _ => None,
    }
}

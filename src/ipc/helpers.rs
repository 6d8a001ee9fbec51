//! Shared handler plumbing: typed handler errors, param extraction, and the
//! term/session fallback to the school settings document.

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::reports::{Period, ReportError};
use crate::store::{BatchOp, Document, Store, StoreError};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.message().to_string(),
            details: None,
        }
    }
}

impl From<ReportError> for HandlerErr {
    fn from(e: ReportError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.message(),
            details: None,
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        HandlerErr {
            code: "store_open_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn store<'a>(state: &'a AppState, req: &Request) -> Result<&'a Store, Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_str_array(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v
                .as_array()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of strings", key)))?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("{} must be an array of strings", key))
                    })?
                    .trim()
                    .to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

/// Body plus the row id, the shape every list/get method returns.
pub fn doc_json(doc: &Document) -> Value {
    let mut body = doc.body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".to_string(), Value::String(doc.id.clone()));
    }
    body
}

/// Term and session from the request, falling back to `settings/school`.
/// Aggregators always receive the resolved pair; only this layer knows about
/// the fallback.
pub fn resolve_period(store: &Store, params: &Value) -> Result<Period, HandlerErr> {
    let term = get_opt_str(params, "term");
    let session = get_opt_str(params, "session");
    if let (Some(term), Some(session)) = (term.clone(), session.clone()) {
        return Ok(Period::new(term, session));
    }
    let settings = store.get("settings", "school")?;
    let term = term.or_else(|| {
        settings
            .as_ref()
            .and_then(|d| d.str_field("currentTerm").map(String::from))
    });
    let session = session.or_else(|| {
        settings
            .as_ref()
            .and_then(|d| d.str_field("currentSession").map(String::from))
    });
    match (term, session) {
        (Some(term), Some(session)) => Ok(Period::new(term, session)),
        _ => Err(HandlerErr::bad_params(
            "term and session are required (school settings carry no current period)",
        )),
    }
}

/// Audit entries ride in the same batch as the write they record.
pub fn audit_log(action: &str, actor: &str, subject_id: Option<&str>, detail: Value) -> BatchOp {
    BatchOp::Set {
        collection: "auditLogs",
        id: Uuid::new_v4().to_string(),
        body: json!({
            "action": action,
            "actor": actor,
            "subjectId": subject_id,
            "detail": detail,
            "at": records::now_rfc3339(),
        }),
    }
}

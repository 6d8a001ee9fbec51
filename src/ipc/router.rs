use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Family = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// First family claiming the method wins; method names are disjoint across
/// families, so order only matters for dispatch cost.
const FAMILIES: &[Family] = &[
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::teachers::try_handle,
    handlers::parents::try_handle,
    handlers::approvals::try_handle,
    handlers::classes::try_handle,
    handlers::subjects::try_handle,
    handlers::attendance::try_handle,
    handlers::results::try_handle,
    handlers::merit::try_handle,
    handlers::fees::try_handle,
    handlers::reports::try_handle,
    handlers::backup_exchange::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

use axum::http::{Method, StatusCode, Uri};
use axum::response::Response;
use log::*;

use crate::response::respond;

pub(crate) mod health_check_controller;
pub(crate) mod receive_controller;
pub(crate) mod send_controller;

/// Fallback for every route the bridge does not serve.
pub(crate) async fn not_found(uri: Uri) -> Response {
    debug!("No route for {uri}");
    respond(StatusCode::NOT_FOUND, "not found")
}

/// Fallback for a served route called with a method it does not accept.
pub(crate) async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    debug!("{method} is not allowed on {uri}");
    respond(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

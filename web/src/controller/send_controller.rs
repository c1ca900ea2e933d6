use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::extractors::validated_query::ValidatedQuery;
use crate::params::send::{SendToQueueParams, SendToTopicParams};
use crate::response::respond;
use crate::{AppState, Error};
use domain::error::{DomainErrorKind, Error as DomainError, RequestErrorKind};
use domain::{send as SendApi, SendTarget};
use log::*;

/// POST a JSON object (one message) or array (one message per element) to a topic
#[utoipa::path(
    post,
    path = "/send_message_to_topic",
    request_body(content = Object, description = "A JSON object or an array of JSON values", content_type = "application/json"),
    params(SendToTopicParams),
    responses(
        (status = 200, description = "One [success, diagnostic] pair per message, in order", body = crate::response::Envelope),
        (status = 400, description = "Missing or invalid parameters, unknown connection key or malformed body", body = crate::response::Envelope),
        (status = 500, description = "The broker could not be reached or refused the batch", body = crate::response::Envelope)
    )
)]
pub async fn send_to_topic(
    State(app_state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<SendToTopicParams>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    debug!("POST send to topic with params: {params:?}");

    let target = params.target()?;
    let connection_string = app_state.connection_string(&params.connection_key)?;
    send(&app_state, connection_string, &target, params.session_id(), &body).await
}

/// POST a JSON object (one message) or array (one message per element) to a queue
#[utoipa::path(
    post,
    path = "/send_message_to_queue",
    request_body(content = Object, description = "A JSON object or an array of JSON values", content_type = "application/json"),
    params(SendToQueueParams),
    responses(
        (status = 200, description = "One [success, diagnostic] pair per message, in order", body = crate::response::Envelope),
        (status = 400, description = "Missing or invalid parameters, unknown connection key or malformed body", body = crate::response::Envelope),
        (status = 500, description = "The broker could not be reached or refused the batch", body = crate::response::Envelope)
    )
)]
pub async fn send_to_queue(
    State(app_state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<SendToQueueParams>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    debug!("POST send to queue with params: {params:?}");

    let target = params.target()?;
    let connection_string = app_state.connection_string(&params.connection_key)?;
    send(&app_state, connection_string, &target, params.session_id(), &body).await
}

async fn send(
    app_state: &AppState,
    connection_string: &str,
    target: &SendTarget,
    session_id: Option<&str>,
    body: &[u8],
) -> Result<Response, Error> {
    let body = parse_body(body)?;
    let outcomes = SendApi::send_messages(
        app_state.broker_ref(),
        connection_string,
        target,
        &body,
        session_id,
    )
    .await?;

    info!("Sent {} message(s) to {target}", outcomes.len());
    Ok(respond(StatusCode::OK, json!(outcomes)))
}

/// An empty body sends nothing; anything else must be JSON.
fn parse_body(body: &[u8]) -> Result<Value, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|err| {
        DomainError {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Request(RequestErrorKind::InvalidBody),
        }
        .into()
    })
}

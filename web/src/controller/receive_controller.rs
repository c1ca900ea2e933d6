use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::IntoResponse;

use crate::extractors::validated_query::ValidatedQuery;
use crate::params::receive::{ReceiveQueueParams, ReceiveSubscriptionParams};
use crate::{AppState, Error};
use domain::receive as ReceiveApi;
use log::*;

/// GET every pending JSON message from a topic subscription
///
/// Messages whose bodies are not valid JSON are left on the broker. Success is a bare JSON
/// array of message bodies rather than an envelope.
#[utoipa::path(
    get,
    path = "/receive_sub_messages",
    params(ReceiveSubscriptionParams),
    responses(
        (status = 200, description = "JSON array of message bodies in fetch order", content_type = "application/json"),
        (status = 400, description = "Missing or invalid parameters or unknown connection key", body = crate::response::Envelope),
        (status = 500, description = "The broker could not be reached or failed mid-drain", body = crate::response::Envelope)
    )
)]
pub async fn receive_subscription_messages(
    State(app_state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<ReceiveSubscriptionParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET receive subscription messages with params: {params:?}");

    let source = params.source()?;
    let settings = params.settings(app_state.config())?;
    let connection_string = app_state.connection_string(&params.connection_key)?;

    let messages = ReceiveApi::drain_messages(
        app_state.broker_ref(),
        connection_string,
        &source,
        &params.session(),
        &settings,
    )
    .await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        messages,
    ))
}

/// GET every pending JSON message from a queue
///
/// Messages whose bodies are not valid JSON are left on the broker. Success is a bare JSON
/// array of message bodies rather than an envelope.
#[utoipa::path(
    get,
    path = "/receive_queue_messages",
    params(ReceiveQueueParams),
    responses(
        (status = 200, description = "JSON array of message bodies in fetch order", content_type = "application/json"),
        (status = 400, description = "Missing or invalid parameters or unknown connection key", body = crate::response::Envelope),
        (status = 500, description = "The broker could not be reached or failed mid-drain", body = crate::response::Envelope)
    )
)]
pub async fn receive_queue_messages(
    State(app_state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<ReceiveQueueParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET receive queue messages with params: {params:?}");

    let source = params.source()?;
    let settings = params.settings(app_state.config())?;
    let connection_string = app_state.connection_string(&params.connection_key)?;

    let messages = ReceiveApi::drain_messages(
        app_state.broker_ref(),
        connection_string,
        &source,
        &params.session(),
        &settings,
    )
    .await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        messages,
    ))
}

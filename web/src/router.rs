use crate::{
    controller::{
        health_check_controller, method_not_allowed, not_found, receive_controller,
        send_controller,
    },
    AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Bus Bridge API"
        ),
        paths(
            send_controller::send_to_topic,
            send_controller::send_to_queue,
            receive_controller::receive_subscription_messages,
            receive_controller::receive_queue_messages,
            health_check_controller::health_check,
        ),
        components(
            schemas(
                crate::response::Envelope,
            )
        ),
        tags(
            (name = "bus_bridge", description = "Forward JSON between HTTP callers and message broker queues, topics and subscriptions")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(send_routes(app_state.clone()))
        .merge(receive_routes(app_state))
        .merge(health_routes())
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
        .fallback(not_found)
}

fn send_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/send_message_to_topic",
            post(send_controller::send_to_topic),
        )
        .route(
            "/send_message_to_queue",
            post(send_controller::send_to_queue),
        )
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(app_state)
}

fn receive_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/receive_sub_messages",
            get(receive_controller::receive_subscription_messages),
        )
        .route(
            "/receive_queue_messages",
            get(receive_controller::receive_queue_messages),
        )
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .method_not_allowed_fallback(method_not_allowed)
}

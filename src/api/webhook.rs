use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;

use crate::errors::AppError;
use crate::models::webhook::WebhookEvent;
use crate::webhook::{RoutedEvent, SIGNATURE_HEADER};
use crate::AppState;

/// POST /api/bling-webhook
///
/// The signature is checked against the raw bytes before anything is parsed.
/// Only a handler failure yields 500, which makes Bling redeliver.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event_id = new_event_id();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if let Err(e) = state.verifier.verify(&body, signature) {
        tracing::warn!(event_id = %event_id, signature_present = signature.is_some(), "webhook rejected: {}", e);
        return (
            e.status(),
            Json(json!({ "error": e.to_string(), "eventId": event_id })),
        )
            .into_response();
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            let err = AppError::InvalidBody(e.to_string());
            tracing::warn!(event_id = %event_id, "webhook body is not a valid event: {}", err);
            return (
                err.status(),
                Json(json!({ "error": err.to_string(), "eventId": event_id })),
            )
                .into_response();
        }
    };

    let routed = RoutedEvent {
        event_id: event_id.clone(),
        name: event.name(),
        event,
    };
    tracing::info!(
        event_id = %event_id,
        event = routed.event.event.as_deref().unwrap_or("-"),
        "webhook accepted"
    );

    match state.events.handle(&routed).await {
        Ok(()) => Json(json!({
            "status": "ok",
            "eventId": event_id,
            "processed": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(event_id = %event_id, "webhook processing failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "webhook processing failed",
                    "eventId": event_id,
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

fn new_event_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("wh_{}_{}", chrono::Utc::now().timestamp_millis(), &suffix[..10])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_unique_and_prefixed() {
        let a = new_event_id();
        let b = new_event_id();
        assert!(a.starts_with("wh_"));
        assert_ne!(a, b);
    }
}

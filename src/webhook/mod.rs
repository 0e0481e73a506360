pub mod signature;

use async_trait::async_trait;

use crate::models::webhook::{EventName, Resource, WebhookEvent};

pub use signature::{sign, SignatureCheck, SignatureVerifier, SIGNATURE_HEADER};

/// A verified delivery, routed by resource tag.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub event_id: String,
    pub name: Option<EventName>,
    pub event: WebhookEvent,
}

/// Side effects for accepted webhook deliveries.
///
/// Bling delivers at least once and redelivers on any 5xx, so implementations
/// must be safe to run twice for the same event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RoutedEvent) -> anyhow::Result<()>;
}

/// Default handler: structured log line per resource, nothing else.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, routed: &RoutedEvent) -> anyhow::Result<()> {
        let Some(name) = &routed.name else {
            tracing::info!(event_id = %routed.event_id, "webhook without event name, nothing to dispatch");
            return Ok(());
        };

        let subject = routed
            .event
            .subject_id(&name.resource)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());

        match &name.resource {
            Resource::Product => {
                tracing::info!(event_id = %routed.event_id, action = %name.action, id = %subject, "product event")
            }
            Resource::Order => {
                tracing::info!(event_id = %routed.event_id, action = %name.action, id = %subject, "order event")
            }
            Resource::Stock => {
                tracing::info!(event_id = %routed.event_id, action = %name.action, product = %subject, "stock event")
            }
            Resource::Invoice => {
                tracing::info!(event_id = %routed.event_id, action = %name.action, id = %subject, "invoice event")
            }
            Resource::Other(tag) => {
                tracing::info!(event_id = %routed.event_id, resource = %tag, action = %name.action, "unmapped event")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed(raw: &str) -> RoutedEvent {
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        RoutedEvent {
            event_id: "wh_test".into(),
            name: event.name(),
            event,
        }
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_known_and_unknown_resources() {
        let handler = LoggingEventHandler;
        for raw in [
            r#"{"event":"product.created","data":{"id":1}}"#,
            r#"{"event":"order.updated","data":{"id":2}}"#,
            r#"{"event":"stock.updated","data":{"produto":{"id":3}}}"#,
            r#"{"event":"invoice.authorized","data":{"id":4}}"#,
            r#"{"event":"supplier.deleted","data":{}}"#,
            r#"{"companyId":"no-event"}"#,
        ] {
            tokio_test::assert_ok!(handler.handle(&routed(raw)).await);
        }
    }
}

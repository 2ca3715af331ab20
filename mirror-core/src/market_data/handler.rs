//! Per-frame dispatch: control events, table actions and the error boundary

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::table_store::TableStore;
use crate::exchanges::{ExchangeError, ExchangeResult, InboundMessage};

/// Frame counters
#[derive(Debug, Default)]
pub struct HandlerStats {
    messages_received: AtomicU64,
    messages_applied: AtomicU64,
    message_errors: AtomicU64,
}

/// Point-in-time copy of `HandlerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStatsSnapshot {
    pub messages_received: u64,
    pub messages_applied: u64,
    pub message_errors: u64,
}

impl HandlerStats {
    pub fn snapshot(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_applied: self.messages_applied.load(Ordering::Relaxed),
            message_errors: self.message_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_applied.store(0, Ordering::Relaxed);
        self.message_errors.store(0, Ordering::Relaxed);
    }
}

/// Turns text frames into store mutations or control events
pub struct MessageHandler {
    tables: TableStore,
    stats: Arc<HandlerStats>,
}

impl MessageHandler {
    pub fn new(tables: TableStore, stats: Arc<HandlerStats>) -> Self {
        Self { tables, stats }
    }

    /// Process one frame.
    ///
    /// Recoverable failures are logged and swallowed so the read loop keeps
    /// going; a fatal control event breaks with the error that ends the connection.
    pub fn process(&self, text: &str) -> ControlFlow<ExchangeError> {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        match self.handle(text) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) if e.is_fatal() => ControlFlow::Break(e),
            Err(e) => {
                self.stats.message_errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to process message: {}", e);
                ControlFlow::Continue(())
            }
        }
    }

    fn handle(&self, text: &str) -> ExchangeResult<()> {
        debug!("{}", text);

        match InboundMessage::parse(text)? {
            InboundMessage::Subscription(ack) => {
                if ack.success {
                    debug!("Subscribed to {}.", ack.subscribe);
                    Ok(())
                } else {
                    Err(ExchangeError::Subscription {
                        topic: ack.topic(),
                        message: ack.error.clone().unwrap_or_default(),
                    })
                }
            }
            InboundMessage::Status(notice) => match notice.status {
                400 => Err(ExchangeError::BadRequest {
                    message: notice.error.unwrap_or_else(|| "bad request".to_string()),
                }),
                401 => Err(ExchangeError::Authentication {
                    reason: "API Key incorrect, please check and restart.".to_string(),
                }),
                status => {
                    warn!("Status {} from server: {}", status, notice.error.unwrap_or_default());
                    Ok(())
                }
            },
            InboundMessage::Table(message) => {
                self.tables.apply(message)?;
                self.stats.messages_applied.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            InboundMessage::Welcome(welcome) => {
                info!("{} (version {})", welcome.info, welcome.version.as_deref().unwrap_or("unknown"));
                Ok(())
            }
            InboundMessage::Other(value) => {
                debug!("Ignoring unrecognised message: {}", value);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::DataStore;

    fn handler() -> (MessageHandler, Arc<DataStore>, Arc<HandlerStats>) {
        let store = Arc::new(DataStore::new());
        let stats = Arc::new(HandlerStats::default());
        (MessageHandler::new(TableStore::new(store.clone()), stats.clone()), store, stats)
    }

    #[test]
    fn test_delete_miss_does_not_stop_processing() {
        let (handler, store, stats) = handler();
        let frames = [
            r#"{"table":"order","action":"partial","keys":["orderID"],"data":[{"orderID":"A","leavesQty":1}]}"#,
            r#"{"table":"order","action":"delete","data":[{"orderID":"nope"}]}"#,
            r#"{"table":"order","action":"insert","data":[{"orderID":"B","leavesQty":2}]}"#,
        ];

        for frame in frames {
            assert_eq!(handler.process(frame), ControlFlow::Continue(()));
        }

        assert_eq!(store.len("order"), 2);
        let stats = stats.snapshot();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.messages_applied, 2);
        assert_eq!(stats.message_errors, 1);
    }

    #[test]
    fn test_malformed_frames_are_contained() {
        let (handler, store, stats) = handler();
        assert!(handler.process("{not json").is_continue());
        assert!(handler.process(r#"{"table":"trade","action":"merge","data":[]}"#).is_continue());
        assert!(handler
            .process(r#"{"table":"trade","action":"partial","keys":[],"data":[{"size":1}]}"#)
            .is_continue());

        assert_eq!(store.len("trade"), 1);
        assert_eq!(stats.snapshot().message_errors, 2);
    }

    #[test]
    fn test_subscription_failure_is_fatal() {
        let (handler, _store, _stats) = handler();
        let frame = r#"{"success":false,"subscribe":"order:XBTUSD","error":"Not authenticated",
            "request":{"op":"subscribe","args":["order:XBTUSD"]}}"#;

        match handler.process(frame) {
            ControlFlow::Break(ExchangeError::Subscription { topic, message }) => {
                assert_eq!(topic, "order:XBTUSD");
                assert_eq!(message, "Not authenticated");
            }
            other => panic!("unexpected flow: {:?}", other),
        }

        let ok = r#"{"success":true,"subscribe":"trade:XBTUSD","request":{"op":"subscribe","args":["trade:XBTUSD"]}}"#;
        assert!(handler.process(ok).is_continue());
    }

    #[test]
    fn test_status_codes() {
        let (handler, _store, _stats) = handler();

        assert!(matches!(
            handler.process(r#"{"status":401,"error":"Invalid API Key."}"#),
            ControlFlow::Break(ExchangeError::Authentication { .. })
        ));
        assert!(matches!(
            handler.process(r#"{"status":400,"error":"Unknown table: foo"}"#),
            ControlFlow::Break(ExchangeError::BadRequest { message }) if message == "Unknown table: foo"
        ));
        assert!(handler.process(r#"{"status":429,"error":"Rate limit exceeded"}"#).is_continue());
    }

    #[test]
    fn test_welcome_and_unknown_frames_are_ignored() {
        let (handler, store, stats) = handler();
        assert!(handler.process(r#"{"info":"Welcome","version":"2.0"}"#).is_continue());
        assert!(handler.process(r#"{"docs":"https://example.invalid"}"#).is_continue());
        assert!(store.table_names().is_empty());
        assert_eq!(stats.snapshot().message_errors, 0);
    }
}

use crate::error::SessionError;
use crate::peer::engine::EngineChannel;
use crate::peer::types::Readiness;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Single replaceable callback for inbound messages, shared by every session
/// of one facade.
#[derive(Clone, Default)]
pub struct HandlerSlot(Arc<Mutex<Option<MessageHandler>>>);

impl HandlerSlot {
    /// Installs `handler`; returns whether a previous one was discarded.
    pub fn replace(&self, handler: MessageHandler) -> bool {
        self.0.lock().replace(handler).is_some()
    }

    /// Calls the current handler. The lock is released first so the handler
    /// may itself replace the slot.
    pub fn dispatch(&self, message: String) -> bool {
        let handler = self.0.lock().clone();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}

struct Inner {
    handle: Option<Arc<dyn EngineChannel>>,
    readiness: Readiness,
}

/// Wraps the session's one data channel.
pub struct ChannelAdapter {
    inner: Mutex<Inner>,
}

impl Default for ChannelAdapter {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handle: None,
                readiness: Readiness::Connecting,
            }),
        }
    }
}

impl ChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of the channel handle. A second handle is refused.
    pub fn attach(&self, handle: Arc<dyn EngineChannel>) -> bool {
        let mut inner = self.inner.lock();
        if inner.handle.is_some() || inner.readiness == Readiness::Closed {
            warn!(label = %handle.label(), "extra data channel ignored");
            return false;
        }
        debug!(label = %handle.label(), "data channel attached");
        inner.handle = Some(handle);
        true
    }

    pub fn has_channel(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    /// Connecting -> Open. Returns true only on the actual transition.
    pub fn mark_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.handle.is_none() || inner.readiness != Readiness::Connecting {
            return false;
        }
        inner.readiness = Readiness::Open;
        true
    }

    pub fn mark_closed(&self) -> bool {
        let mut inner = self.inner.lock();
        let changed = inner.readiness != Readiness::Closed;
        inner.readiness = Readiness::Closed;
        changed
    }

    pub fn readiness(&self) -> Readiness {
        self.inner.lock().readiness
    }

    pub fn is_open(&self) -> bool {
        self.readiness() == Readiness::Open
    }

    pub async fn send(&self, text: String) -> Result<(), SessionError> {
        let handle = {
            let inner = self.inner.lock();
            match (&inner.handle, inner.readiness) {
                (Some(handle), Readiness::Open) => handle.clone(),
                _ => return Err(SessionError::ChannelNotOpen),
            }
        };
        handle.send_text(text).await?;
        Ok(())
    }

    /// Hands an inbound payload to the current handler; dropped when none is set.
    pub fn deliver(&self, data: &[u8], handlers: &HandlerSlot) -> bool {
        let text = String::from_utf8_lossy(data).into_owned();
        let delivered = handlers.dispatch(text);
        if !delivered {
            debug!(len = data.len(), "no message handler, message dropped");
        }
        delivered
    }

    pub async fn close(&self) {
        let handle = {
            let mut inner = self.inner.lock();
            inner.readiness = Readiness::Closed;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.close().await {
                debug!(error = %err, "data channel close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<String>>,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl EngineChannel for Recording {
        fn label(&self) -> String {
            "test".into()
        }

        async fn send_text(&self, text: String) -> Result<(), EngineError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&self) -> Result<(), EngineError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_requires_open_channel() {
        let adapter = ChannelAdapter::new();
        assert!(matches!(
            adapter.send("early".into()).await,
            Err(SessionError::ChannelNotOpen)
        ));

        let channel = Arc::new(Recording::default());
        adapter.attach(channel.clone());
        assert!(matches!(
            adapter.send("still early".into()).await,
            Err(SessionError::ChannelNotOpen)
        ));

        assert!(adapter.mark_open());
        assert!(!adapter.mark_open());
        adapter.send("hello".into()).await.unwrap();
        assert_eq!(*channel.sent.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn open_needs_a_handle() {
        let adapter = ChannelAdapter::new();
        assert!(!adapter.mark_open());
        assert_eq!(adapter.readiness(), Readiness::Connecting);
    }

    #[test]
    fn second_handle_is_refused() {
        let adapter = ChannelAdapter::new();
        assert!(adapter.attach(Arc::new(Recording::default())));
        assert!(!adapter.attach(Arc::new(Recording::default())));
    }

    #[tokio::test]
    async fn close_is_final() {
        let adapter = ChannelAdapter::new();
        let channel = Arc::new(Recording::default());
        adapter.attach(channel.clone());
        adapter.mark_open();
        adapter.close().await;
        adapter.close().await;

        assert_eq!(adapter.readiness(), Readiness::Closed);
        assert_eq!(channel.closes.load(Ordering::SeqCst), 1);
        assert!(!adapter.mark_open());
        assert!(matches!(
            adapter.send("late".into()).await,
            Err(SessionError::ChannelNotOpen)
        ));
    }

    #[test]
    fn replaced_handler_stops_receiving() {
        let slot = HandlerSlot::default();
        let adapter = ChannelAdapter::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        assert!(!adapter.deliver(b"nobody", &slot));

        let sink = first.clone();
        assert!(!slot.replace(Arc::new(move |msg: String| sink.lock().push(msg))));
        adapter.deliver(b"one", &slot);

        let sink = second.clone();
        assert!(slot.replace(Arc::new(move |msg: String| sink.lock().push(msg))));
        adapter.deliver(b"two", &slot);

        assert_eq!(*first.lock(), vec!["one".to_string()]);
        assert_eq!(*second.lock(), vec!["two".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let slot = HandlerSlot::default();
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        slot.replace(Arc::new(move |msg: String| *sink.lock() = msg));
        ChannelAdapter::new().deliver(&[b'o', b'k', 0xff], &slot);
        assert_eq!(*seen.lock(), "ok\u{fffd}");
    }
}

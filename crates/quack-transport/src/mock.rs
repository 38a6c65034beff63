use crate::topic::accept_inbound;
use crate::{Inbound, Result, Scope, TopicError, Transport, TransportError, TransportEvent};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use tracing::warn;

/// A published or written request as the mock saw it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    sink: Option<Sender<TransportEvent>>,
    scope: Option<Scope>,
    initialized: bool,
    sent: Vec<SentMessage>,
}

/// In-process transport. Injected traffic goes through the same inbound rules as the
/// real backends; sends are recorded.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a message as if a dongle had emitted it. Returns whether it was accepted.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let inner = self.lock();
        let (Some(sink), Some(scope)) = (&inner.sink, &inner.scope) else {
            return false;
        };
        match accept_inbound(topic.as_bytes(), scope) {
            Ok(address) => sink
                .send(TransportEvent::Message(Inbound::new(address, payload.to_vec())))
                .is_ok(),
            Err(TopicError::Echo) => false,
            Err(e) => {
                warn!(error = %e, topic, "mock dropping message");
                false
            }
        }
    }

    pub fn inject_log(&self, line: &str) -> bool {
        match &self.lock().sink {
            Some(sink) => sink.send(TransportEvent::DeviceLog(line.to_string())).is_ok(),
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        core::mem::take(&mut self.lock().sent)
    }

    pub fn scope(&self) -> Option<Scope> {
        self.lock().scope.clone()
    }
}

impl Transport for MockTransport {
    fn initialize(&self, sink: Sender<TransportEvent>, scope: Scope) -> Result<()> {
        let mut inner = self.lock();
        if inner.initialized {
            return Err(TransportError::AlreadyInitialized);
        }
        inner.initialized = true;
        inner.sink = Some(sink);
        inner.scope = Some(scope);
        Ok(())
    }

    fn set_scope(&self, scope: Scope) -> Result<()> {
        self.lock().scope = Some(scope);
        Ok(())
    }

    fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.sink.is_none() {
            return Err(TransportError::NotReady);
        }
        inner.sent.push(SentMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lock().sink.is_some()
    }

    fn shutdown(&self) {
        self.lock().sink = None;
    }
}

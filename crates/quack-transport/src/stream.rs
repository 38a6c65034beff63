use crate::frame::{encode_frame, FrameDecoder, FrameEvent};
use crate::topic::accept_inbound;
use crate::{Inbound, Result, Scope, TopicError, Transport, TransportError, TransportEvent};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

type Reader = Box<dyn Read + Send>;
type Writer = Box<dyn Write + Send>;

const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Framed transport over any byte stream; the serial port in production.
///
/// A byte stream has no native wildcard, so every frame is decoded and the configured
/// scope is applied in software.
pub struct StreamTransport {
    label: String,
    reader: Mutex<Option<Reader>>,
    writer: Arc<Mutex<Option<Writer>>>,
    scope: Arc<RwLock<Scope>>,
    ready: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Wrap an already-open stream. The reader should time out periodically so shutdown
    /// is not blocked on a silent line.
    pub fn from_io(label: impl Into<String>, reader: Reader, writer: Writer) -> Self {
        Self {
            label: label.into(),
            reader: Mutex::new(Some(reader)),
            writer: Arc::new(Mutex::new(Some(writer))),
            scope: Arc::new(RwLock::new(Scope::Any)),
            ready: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Transport for StreamTransport {
    fn initialize(&self, sink: Sender<TransportEvent>, scope: Scope) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TransportError::AlreadyInitialized)?;
        *self.scope.write().unwrap_or_else(|e| e.into_inner()) = scope;

        let scope = Arc::clone(&self.scope);
        let stop = Arc::clone(&self.stop);
        let ready = Arc::clone(&self.ready);
        let handle = std::thread::Builder::new()
            .name("rfq-serial-rx".to_string())
            .spawn(move || read_loop(reader, sink, scope, stop, ready))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.ready.store(true, Ordering::SeqCst);
        info!(port = %self.label, "stream transport ready");
        Ok(())
    }

    fn set_scope(&self, scope: Scope) -> Result<()> {
        debug!(%scope, "stream scope");
        *self.scope.write().unwrap_or_else(|e| e.into_inner()) = scope;
        Ok(())
    }

    fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_ready() {
            warn!(topic, "send before transport ready");
            return Err(TransportError::NotReady);
        }
        let frame = encode_frame(topic, payload)?;
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let writer = guard.as_mut().ok_or(TransportError::NotReady)?;
        writer
            .write_all(&frame)
            .and_then(|_| writer.flush())
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(topic, len = payload.len(), "sent frame");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    mut reader: Reader,
    sink: Sender<TransportEvent>,
    scope: Arc<RwLock<Scope>>,
    stop: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 512];
    while !stop.load(Ordering::SeqCst) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(IDLE_BACKOFF);
                continue;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                warn!(error = %e, "stream read failed; receive path stopping");
                ready.store(false, Ordering::SeqCst);
                return;
            }
        };
        for event in decoder.feed(&buf[..n]) {
            let event = match event {
                FrameEvent::LogLine(line) => TransportEvent::DeviceLog(line),
                FrameEvent::Packet { topic, payload } => {
                    let configured = scope.read().unwrap_or_else(|e| e.into_inner()).clone();
                    match accept_inbound(&topic, &configured) {
                        Ok(address) => TransportEvent::Message(Inbound::new(address, payload)),
                        Err(TopicError::Echo) => continue,
                        Err(e) => {
                            warn!(error = %e, topic = %String::from_utf8_lossy(&topic), "dropping frame");
                            continue;
                        }
                    }
                }
            };
            if sink.send(event).is_err() {
                debug!("session channel closed; receive path stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame_with_prefix, PREFIX_IN};
    use std::io::Cursor;
    use std::sync::mpsc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn transport(input: Vec<u8>) -> (StreamTransport, SharedBuf) {
        let out = SharedBuf::default();
        let t = StreamTransport::from_io("test", Box::new(Cursor::new(input)), Box::new(out.clone()));
        (t, out)
    }

    fn device_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        encode_frame_with_prefix(PREFIX_IN, topic, payload).unwrap()
    }

    #[test]
    fn send_requires_initialize() {
        let (t, out) = transport(Vec::new());
        assert!(!t.is_ready());
        assert!(matches!(t.send("any/in/info", b""), Err(TransportError::NotReady)));
        assert!(out.0.lock().unwrap().is_empty());
    }

    #[test]
    fn writes_one_frame_per_send() -> anyhow::Result<()> {
        let (t, out) = transport(Vec::new());
        let (tx, _rx) = mpsc::channel();
        t.initialize(tx, Scope::Any)?;
        t.send("any/in/info", b"")?;
        assert_eq!(out.0.lock().unwrap().as_slice(), b">any/in/info~\0");
        t.shutdown();
        assert!(!t.is_ready());
        assert!(matches!(t.send("any/in/info", b""), Err(TransportError::NotReady)));
        Ok(())
    }

    #[test]
    fn second_initialize_is_refused() -> anyhow::Result<()> {
        let (t, _) = transport(Vec::new());
        let (tx, _rx) = mpsc::channel();
        t.initialize(tx.clone(), Scope::Any)?;
        assert!(matches!(t.initialize(tx, Scope::Any), Err(TransportError::AlreadyInitialized)));
        Ok(())
    }

    #[test]
    fn receive_path_filters_and_forwards() -> anyhow::Result<()> {
        let mut input = b"boot ok\n".to_vec();
        input.extend(device_frame("a/in/set/radio/rfquack_VoidValue/rx", b""));
        input.extend(device_frame("b/out/set/radio/rfquack_CmdReply/rx", b"\x08\x01"));
        input.extend(device_frame("a/out/set/radio/rfquack_CmdReply/rx", b"\x08\x02"));
        input.extend(device_frame("short/out", b""));
        let (t, _) = transport(input);
        let (tx, rx) = mpsc::channel();
        t.initialize(tx, Scope::device("a"))?;

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout)?, TransportEvent::DeviceLog("boot ok".to_string()));
        match rx.recv_timeout(timeout)? {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.address.scope(), &Scope::device("a"));
                assert_eq!(msg.payload, b"\x08\x02");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        t.shutdown();
        Ok(())
    }
}

use crate::topic::{accept_inbound, subscription_filter};
use crate::{Inbound, Result, Scope, TopicError, Transport, TransportError, TransportEvent};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, TlsConfiguration};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// PEM material for a TLS broker connection.
#[derive(Clone, Debug)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    /// Client certificate and key, both PEM.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub tls: Option<TlsMaterial>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            tls: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Exactly-once normally; at-least-once over TLS.
    pub fn qos(&self) -> QoS {
        if self.tls.is_some() {
            QoS::AtLeastOnce
        } else {
            QoS::ExactlyOnce
        }
    }
}

/// Transport over an MQTT broker. Topics are addresses verbatim, payloads raw protobuf.
pub struct MqttTransport {
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<Connection>>,
    qos: QoS,
    scope: Arc<RwLock<Scope>>,
    ready: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Result<Self> {
        if settings.host.trim().is_empty() {
            return Err(TransportError::MissingParameter("host"));
        }
        if settings.client_id.trim().is_empty() {
            return Err(TransportError::MissingParameter("client_id"));
        }
        let qos = settings.qos();
        let mut options = MqttOptions::new(settings.client_id.as_str(), settings.host.as_str(), settings.port);
        options.set_keep_alive(settings.keep_alive);
        if let Some((user, pass)) = &settings.credentials {
            options.set_credentials(user.as_str(), pass.as_str());
        }
        if let Some(tls) = settings.tls {
            options.set_transport(rumqttc::Transport::tls_with_config(TlsConfiguration::Simple {
                ca: tls.ca,
                alpn: None,
                client_auth: tls.client_auth,
            }));
        }
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, ?qos, "mqtt client created");
        Ok(Self {
            client: Mutex::new(Some(client)),
            connection: Mutex::new(Some(connection)),
            qos,
            scope: Arc::new(RwLock::new(Scope::Any)),
            ready: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<Client> {
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TransportError::NotReady)
    }
}

impl Transport for MqttTransport {
    fn initialize(&self, sink: Sender<TransportEvent>, scope: Scope) -> Result<()> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TransportError::AlreadyInitialized)?;
        *self.scope.write().unwrap_or_else(|e| e.into_inner()) = scope;

        let ctx = LoopContext {
            client: self.client()?,
            qos: self.qos,
            sink,
            scope: Arc::clone(&self.scope),
            stop: Arc::clone(&self.stop),
        };
        let handle = std::thread::Builder::new()
            .name("rfq-mqtt-net".to_string())
            .spawn(move || network_loop(connection, ctx))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_scope(&self, scope: Scope) -> Result<()> {
        let old = {
            let mut current = self.scope.write().unwrap_or_else(|e| e.into_inner());
            core::mem::replace(&mut *current, scope.clone())
        };
        if !self.is_ready() || old == scope {
            return Ok(());
        }
        let client = self.client()?;
        client
            .unsubscribe(subscription_filter(&old))
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        client
            .subscribe(subscription_filter(&scope), self.qos)
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        debug!(%old, new = %scope, "mqtt resubscribed");
        Ok(())
    }

    fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_ready() {
            warn!(topic, "send before transport ready");
            return Err(TransportError::NotReady);
        }
        self.client()?
            .publish(topic, self.qos, false, payload.to_vec())
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        debug!(topic, len = payload.len(), "published");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if let Err(e) = client.disconnect() {
                debug!(error = %e, "mqtt disconnect");
            }
        }
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoopContext {
    client: Client,
    qos: QoS,
    sink: Sender<TransportEvent>,
    scope: Arc<RwLock<Scope>>,
    stop: Arc<AtomicBool>,
}

fn network_loop(mut connection: Connection, ctx: LoopContext) {
    for notification in connection.iter() {
        if ctx.stop.load(Ordering::SeqCst) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let filter = subscription_filter(&ctx.scope.read().unwrap_or_else(|e| e.into_inner()));
                info!(%filter, "broker connected; subscribing");
                if let Err(e) = ctx.client.try_subscribe(filter, ctx.qos) {
                    warn!(error = %e, "subscribe failed");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let configured = ctx.scope.read().unwrap_or_else(|e| e.into_inner()).clone();
                match accept_inbound(publish.topic.as_bytes(), &configured) {
                    Ok(address) => {
                        let event = TransportEvent::Message(Inbound::new(address, publish.payload.to_vec()));
                        if ctx.sink.send(event).is_err() {
                            debug!("session channel closed; network loop stopping");
                            break;
                        }
                    }
                    Err(TopicError::Echo) => {}
                    Err(e) => warn!(error = %e, topic = %publish.topic, "dropping message"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                if ctx.stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "mqtt connection error; retrying");
                std::thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }
    debug!("mqtt network loop finished");
}

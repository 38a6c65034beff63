use crate::display::{DisplayEvent, DisplayFn};
use crate::state::{Device, Reply, SessionState};
use crate::{Result, SessionError, SessionMetrics};
use quack_registry::schema::{PACKET_TYPE, VOID_TYPE};
use quack_registry::{CallArgs, DispatchRegistry, Request, SchemaCatalog};
use quack_transport::{topic, Direction, Inbound, Scope, Transport, TransportEvent, Verb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Select the first dongle that shows up.
    pub select_first: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    catalog: Arc<SchemaCatalog>,
    state: RwLock<SessionState>,
    metrics: SessionMetrics,
    options: SessionOptions,
    display: Option<DisplayFn>,
    selection: Mutex<()>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.transport.is_ready() {
            return Err(SessionError::NotReady);
        }
        self.transport.send(topic, payload)?;
        self.metrics.tx_requests.inc();
        Ok(())
    }

    fn lock_selection(&self) -> MutexGuard<'_, ()> {
        self.selection.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `index` the active dongle. The state lock is released before the transport
    /// is touched; the selection lock orders competing selections.
    fn select(&self, index: usize) -> Result<Device> {
        let _selection = self.lock_selection();
        let device = self
            .write()
            .activate(index)
            .ok_or_else(|| SessionError::UnknownDevice(index.to_string()))?;
        self.follow(&device)?;
        Ok(device)
    }

    /// Point the transport at `device` and ask it for its commands.
    fn follow(&self, device: &Device) -> Result<()> {
        info!(id = device.id, address = %device.address, "device selected");
        self.transport.set_scope(device.address.clone())?;
        self.send(&topic::discovery_request(&device.address), &[])
    }

    /// Record an unseen sender. With `select_first`, the first device is activated in
    /// the same critical section that records it.
    fn discover(&self, scope: &Scope) {
        let _selection = self.lock_selection();
        let (device, count, selected) = {
            let mut state = self.write();
            let Some(device) = state.discover(scope) else {
                return;
            };
            let selected =
                self.options.select_first && state.active.is_none() && state.activate(device.id).is_some();
            (device, state.devices.len(), selected)
        };
        self.metrics.devices.set(count as i64);
        info!(id = device.id, address = %device.address, "device discovered");
        if selected {
            if let Err(e) = self.follow(&device) {
                warn!(error = %e, "auto-select failed");
            }
        }
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceLog(line) => {
                self.metrics.device_log_lines.inc();
                info!(target: "device", "{line}");
            }
            TransportEvent::Message(inbound) => {
                self.metrics.rx_messages.inc();
                self.handle_message(inbound);
            }
        }
    }

    fn handle_message(&self, inbound: Inbound) {
        let Inbound {
            address,
            payload,
            received_at,
        } = inbound;
        debug!(%address, len = payload.len(), "inbound");

        let message = match self.catalog.decode(address.message_type(), &payload) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.rx_dropped.inc();
                warn!(error = %e, %address, "dropping message");
                return;
            }
        };
        self.discover(address.scope());

        if address.verb() == &Verb::Info {
            let mut state = self.write();
            let from_active = state
                .active_device()
                .map(|d| &d.address == address.scope());
            if from_active == Some(false) {
                debug!(%address, "descriptor from inactive device ignored");
                return;
            }
            let Some(command) = address.args().first() else {
                self.metrics.rx_dropped.inc();
                warn!(%address, "descriptor without command name");
                return;
            };
            state.registry.ingest(address.module(), command, &message);
            return;
        }

        let reply = Reply {
            address,
            message,
            received_at,
        };
        let (commands, active) = {
            let mut state = self.write();
            if reply.address.message_type() == PACKET_TYPE {
                state.packets.push(reply.clone());
            }
            state.last_reply = Some(reply.clone());
            let commands = state
                .registry
                .module(reply.address.module())
                .map(|m| m.command_names())
                .unwrap_or_default();
            (commands, state.active.is_some())
        };
        if !active {
            return;
        }
        if let Some(display) = &self.display {
            display(&DisplayEvent {
                module: reply.address.module(),
                verb: reply.address.verb(),
                commands: &commands,
                message: &reply.message,
                address: &reply.address,
            });
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>, rx: Receiver<TransportEvent>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL) {
            Ok(event) => shared.handle(event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("dispatcher finished");
}

/// A running client: transport, device table, active dongle and its command registry.
pub struct Session {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Initialize the transport on the wildcard scope, start the dispatcher and ping
    /// every dongle in reach so they announce themselves.
    pub fn start(
        transport: Arc<dyn Transport>,
        catalog: Arc<SchemaCatalog>,
        options: SessionOptions,
        display: Option<DisplayFn>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: RwLock::new(SessionState::new(DispatchRegistry::new(Arc::clone(&catalog)))),
            transport,
            catalog,
            metrics: SessionMetrics::new()?,
            options,
            display,
            selection: Mutex::new(()),
        });
        let (tx, rx) = mpsc::channel();
        shared.transport.initialize(tx, Scope::Any)?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("rfq-dispatch".to_string())
                .spawn(move || dispatch_loop(shared, rx, stop))
                .map_err(|e| SessionError::Spawn(e.to_string()))?
        };
        let session = Self {
            shared,
            stop,
            dispatcher: Mutex::new(Some(handle)),
        };

        let ping = topic::build(&Scope::Any, Direction::In, &Verb::Set, "ping", &[VOID_TYPE, "ping"]);
        if let Err(e) = session.shared.send(&ping, &[]) {
            warn!(error = %e, "ping failed");
        }
        Ok(session)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.transport.is_ready()
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.shared.catalog
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.shared.metrics
    }

    pub fn devices(&self) -> Vec<Device> {
        self.shared.read().devices.clone()
    }

    pub fn active_device(&self) -> Option<Device> {
        self.shared.read().active_device().cloned()
    }

    pub fn select(&self, index: usize) -> Result<Device> {
        self.shared.select(index)
    }

    /// Select by device identifier (the scope segment the dongle uses).
    pub fn select_by_address(&self, address: &str) -> Result<Device> {
        let scope = Scope::parse(address);
        let index = self
            .shared
            .read()
            .find(&scope)
            .map(|d| d.id)
            .ok_or_else(|| SessionError::UnknownDevice(address.to_string()))?;
        self.shared.select(index)
    }

    pub fn modules(&self) -> Vec<String> {
        self.shared.read().registry.module_names()
    }

    /// Help for one module, or for every module.
    pub fn help(&self, module: Option<&str>) -> Result<String> {
        let state = self.shared.read();
        match module {
            Some(m) => Ok(state.registry.help(m)?),
            None => Ok(state.registry.modules().map(|m| m.help()).collect::<Vec<_>>().join("\n")),
        }
    }

    pub fn invoke(&self, module: &str, command: &str, args: CallArgs) -> Result<Request> {
        let request = self.shared.read().registry.invoke(module, command, args)?;
        self.dispatch(request)
    }

    pub fn get(&self, module: &str, attribute: &str) -> Result<Request> {
        let request = self.shared.read().registry.get(module, attribute)?;
        self.dispatch(request)
    }

    pub fn set(&self, module: &str, command: &str, args: CallArgs) -> Result<Request> {
        let request = self.shared.read().registry.set(module, command, args)?;
        self.dispatch(request)
    }

    fn dispatch(&self, request: Request) -> Result<Request> {
        let scope = self
            .active_device()
            .map(|d| d.address)
            .unwrap_or(Scope::Any);
        self.shared.send(&request.topic(&scope), &request.payload)?;
        Ok(request)
    }

    /// Most recent non-descriptor message. Overwritten by every arrival.
    pub fn last_reply(&self) -> Option<Reply> {
        self.shared.read().last_reply.clone()
    }

    /// Every `Packet` received so far.
    pub fn packets(&self) -> Vec<Reply> {
        self.shared.read().packets.clone()
    }

    /// Drop the stored packets; returns how many there were.
    pub fn clear_packets(&self) -> usize {
        let mut state = self.shared.write();
        let count = state.packets.len();
        state.packets.clear();
        count
    }

    pub fn shutdown(&self) {
        self.shared.transport.shutdown();
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use prost::Message as _;
    use prost_reflect::{DynamicMessage, Value};
    use quack_registry::{DispatchError, FieldValue};
    use quack_transport::frame::{encode_frame_with_prefix, PREFIX_IN};
    use quack_transport::{MockTransport, StreamTransport};
    use std::io::{self, Read, Write};
    use std::time::Instant;

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn cmd_info(catalog: &SchemaCatalog, arg: &str, kind: i32) -> Vec<u8> {
        let mut msg = catalog.empty("rfquack_CmdInfo").unwrap();
        msg.set_field_by_name("argumentType", Value::String(arg.to_string()));
        msg.set_field_by_name("cmdType", Value::EnumNumber(kind));
        msg.encode_to_vec()
    }

    fn packet(catalog: &SchemaCatalog, data: &'static [u8]) -> Vec<u8> {
        let mut msg = catalog.empty(PACKET_TYPE).unwrap();
        msg.set_field_by_name("data", Value::Bytes(Bytes::from_static(data)));
        msg.encode_to_vec()
    }

    struct Harness {
        mock: Arc<MockTransport>,
        catalog: Arc<SchemaCatalog>,
        session: Session,
        shown: Arc<Mutex<Vec<(String, String)>>>,
    }

    fn start(select_first: bool) -> Harness {
        let mock = Arc::new(MockTransport::new());
        let catalog = Arc::new(SchemaCatalog::builtin().unwrap());
        let shown = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&shown);
        let display: DisplayFn = Box::new(move |ev: &DisplayEvent<'_>| {
            let hex = match ev.message.get_field_by_name("data").as_deref() {
                Some(Value::Bytes(b)) => b.iter().map(|x| format!("{x:02x}")).collect(),
                _ => String::new(),
            };
            sink.lock().unwrap().push((ev.module.to_string(), hex));
        });
        let transport: Arc<dyn Transport> = mock.clone();
        let session = Session::start(
            transport,
            Arc::clone(&catalog),
            SessionOptions { select_first },
            Some(display),
        )
        .unwrap();
        Harness { mock, catalog, session, shown }
    }

    #[test]
    fn start_pings_every_dongle() {
        let h = start(false);
        let sent = h.mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "any/in/set/ping/rfquack_VoidValue/ping");
        assert!(sent[0].payload.is_empty());
        assert_eq!(h.mock.scope(), Some(Scope::Any));
    }

    #[test]
    fn discovery_records_each_device_once() {
        let h = start(false);
        let void = Vec::new();
        h.mock.inject("dongleA/out/set/ping/rfquack_VoidValue/ping", &void);
        h.mock.inject("dongleA/out/set/ping/rfquack_VoidValue/ping", &void);
        h.mock.inject("dongleB/out/set/ping/rfquack_VoidValue/ping", &void);
        assert!(wait_until(|| h.session.devices().len() == 2));
        let devices = h.session.devices();
        assert_eq!(devices[0].id, 0);
        assert_eq!(devices[0].address, Scope::device("dongleA"));
        assert_eq!(devices[1].address, Scope::device("dongleB"));
        assert!(h.session.active_device().is_none());
        assert!(h.session.metrics().encode_text().contains("rfq_devices 2"));
    }

    #[test]
    fn serial_scenario() -> anyhow::Result<()> {
        let h = start(true);
        h.mock.take_sent();

        h.mock.inject("any/out/info/radioA/rfquack_CmdInfo/rx", &cmd_info(&h.catalog, VOID_TYPE, 1));
        assert!(wait_until(|| h.session.modules() == ["radioA"]));
        assert!(h.session.devices().is_empty());

        h.mock.inject("deviceX/out/data/radioA/rfquack_Packet", &packet(&h.catalog, b"\xca\xfe\x01"));
        assert!(wait_until(|| h.session.packets().len() == 1));

        let active = h.session.active_device().map(|d| d.address);
        assert_eq!(active, Some(Scope::device("deviceX")));
        assert_eq!(h.mock.scope(), Some(Scope::device("deviceX")));
        assert_eq!(h.mock.take_sent()[0].topic, "deviceX/in/info");

        let last = h.session.last_reply().map(|r| r.address.message_type().to_string());
        assert_eq!(last.as_deref(), Some("rfquack_Packet"));
        assert!(wait_until(|| !h.shown.lock().unwrap().is_empty()));
        assert_eq!(h.shown.lock().unwrap()[0], ("radioA".to_string(), "cafe01".to_string()));
        Ok(())
    }

    /// Serial line fed chunk by chunk; reads time out while nothing is queued.
    struct Line(mpsc::Receiver<Vec<u8>>);

    impl Read for Line {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv_timeout(Duration::from_millis(10)) {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Err(_) => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn serial_scenario_over_framed_stream() -> anyhow::Result<()> {
        let catalog = Arc::new(SchemaCatalog::builtin()?);
        let (feed, line) = mpsc::channel();
        let wire = Wire::default();
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::from_io(
            "scenario",
            Box::new(Line(line)),
            Box::new(wire.clone()),
        ));
        let shown = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&shown);
        let display: DisplayFn = Box::new(move |ev: &DisplayEvent<'_>| {
            sink.lock().unwrap().push(ev.module.to_string());
        });
        let session = Session::start(
            transport,
            Arc::clone(&catalog),
            SessionOptions { select_first: true },
            Some(display),
        )?;

        let mut chunk = b"RFQuack booting\n".to_vec();
        chunk.extend(encode_frame_with_prefix(
            PREFIX_IN,
            "any/out/info/radioA/rfquack_CmdInfo/rx",
            &cmd_info(&catalog, VOID_TYPE, 1),
        )?);
        feed.send(chunk)?;
        assert!(wait_until(|| session.modules() == ["radioA"]));
        assert!(session.help(Some("radioA"))?.contains("rx()"));
        assert!(wait_until(|| session.metrics().encode_text().contains("rfq_device_log_lines 1")));

        feed.send(encode_frame_with_prefix(
            PREFIX_IN,
            "deviceX/out/data/radioA/rfquack_Packet",
            &packet(&catalog, b"\xca\xfe\x01"),
        )?)?;
        assert!(wait_until(|| session.packets().len() == 1));
        assert_eq!(session.active_device().map(|d| d.address), Some(Scope::device("deviceX")));
        assert!(wait_until(|| !shown.lock().unwrap().is_empty()));
        assert_eq!(shown.lock().unwrap()[0], "radioA");

        let written = wire.0.lock().unwrap().clone();
        assert!(written.starts_with(b">any/in/set/ping/rfquack_VoidValue/ping~\0"));
        assert!(contains(&written, b">deviceX/in/info~\0"));
        session.shutdown();
        Ok(())
    }

    #[test]
    fn dropped_messages_do_not_discover_devices() {
        let h = start(true);
        h.mock.take_sent();
        h.mock.inject("rogue/out/get/radio/rfquack_NoSuchType/x", b"\x01");
        h.mock.inject("rogue/out/get/radio/rfquack_Packet/x", b"\x0a\x09");
        assert!(wait_until(|| h.session.metrics().encode_text().contains("rfq_rx_dropped 2")));
        assert!(h.session.devices().is_empty());
        assert!(h.session.active_device().is_none());
        assert!(h.mock.take_sent().is_empty());
        assert_eq!(h.mock.scope(), Some(Scope::Any));
    }

    #[test]
    fn auto_select_keeps_an_earlier_choice() -> anyhow::Result<()> {
        let h = start(true);
        h.mock.inject("A/out/set/ping/rfquack_VoidValue/ping", &[]);
        assert!(wait_until(|| h.session.active_device().is_some()));
        h.mock.set_scope(Scope::Any)?;
        h.mock.inject("B/out/set/ping/rfquack_VoidValue/ping", &[]);
        assert!(wait_until(|| h.session.devices().len() == 2));
        assert_eq!(h.session.active_device().map(|d| d.address), Some(Scope::device("A")));

        h.session.select(1)?;
        h.mock.set_scope(Scope::Any)?;
        h.mock.inject("C/out/set/ping/rfquack_VoidValue/ping", &[]);
        assert!(wait_until(|| h.session.devices().len() == 3));
        assert_eq!(h.session.active_device().map(|d| d.address), Some(Scope::device("B")));
        Ok(())
    }

    #[test]
    fn clearing_packets_bounds_the_store() {
        let h = start(false);
        h.mock.inject("any/out/data/radio/rfquack_Packet", &packet(&h.catalog, b"\x01"));
        h.mock.inject("any/out/data/radio/rfquack_Packet", &packet(&h.catalog, b"\x02"));
        assert!(wait_until(|| h.session.packets().len() == 2));
        assert_eq!(h.session.clear_packets(), 2);
        assert!(h.session.packets().is_empty());
        assert!(h.session.last_reply().is_some());
    }

    #[test]
    fn replies_are_not_displayed_before_selection() {
        let h = start(false);
        h.mock.inject("any/out/get/radio/rfquack_Packet/packet", &packet(&h.catalog, b"\x01"));
        assert!(wait_until(|| h.session.last_reply().is_some()));
        assert_eq!(h.session.packets().len(), 1);
        assert!(h.shown.lock().unwrap().is_empty());
    }

    #[test]
    fn selecting_b_clears_a() -> anyhow::Result<()> {
        let h = start(false);
        h.mock.inject("A/out/set/ping/rfquack_VoidValue/ping", &[]);
        h.mock.inject("B/out/set/ping/rfquack_VoidValue/ping", &[]);
        assert!(wait_until(|| h.session.devices().len() == 2));

        h.session.select(0)?;
        h.mock.inject("A/out/info/radio/rfquack_CmdInfo/rx", &cmd_info(&h.catalog, VOID_TYPE, 1));
        h.mock.inject("A/out/info/radio/rfquack_CmdInfo/tx", &cmd_info(&h.catalog, VOID_TYPE, 1));
        assert!(wait_until(|| h.session.help(Some("radio")).map(|t| t.contains("tx()")).unwrap_or(false)));
        h.session.invoke("radio", "rx", CallArgs::None)?;

        h.session.select_by_address("B")?;
        assert!(h.session.modules().is_empty());
        assert!(matches!(
            h.session.invoke("radio", "rx", CallArgs::None),
            Err(SessionError::Dispatch(DispatchError::UnknownModule { .. }))
        ));

        h.mock.inject("B/out/info/stats/rfquack_CmdInfo/reset", &cmd_info(&h.catalog, VOID_TYPE, 1));
        assert!(wait_until(|| h.session.modules() == ["stats"]));

        let topics: Vec<String> = h.mock.take_sent().into_iter().map(|m| m.topic).collect();
        assert!(topics.contains(&"A/in/info".to_string()));
        assert!(topics.contains(&"A/in/set/radio/rfquack_VoidValue/rx".to_string()));
        assert!(topics.contains(&"B/in/info".to_string()));
        Ok(())
    }

    #[test]
    fn descriptors_from_other_devices_are_ignored_once_selected() -> anyhow::Result<()> {
        let h = start(false);
        h.mock.inject("A/out/set/ping/rfquack_VoidValue/ping", &[]);
        assert!(wait_until(|| h.session.devices().len() == 1));
        h.session.select(0)?;
        h.mock.set_scope(Scope::Any)?;
        h.mock.inject("B/out/info/radio/rfquack_CmdInfo/rx", &cmd_info(&h.catalog, VOID_TYPE, 1));
        h.mock.inject("A/out/info/stats/rfquack_CmdInfo/reset", &cmd_info(&h.catalog, VOID_TYPE, 1));
        assert!(wait_until(|| h.session.modules() == ["stats"]));
        Ok(())
    }

    #[test]
    fn bad_payloads_and_unknown_types_are_dropped() {
        let h = start(false);
        h.mock.inject("any/out/get/radio/rfquack_Unknown/x", b"\x01");
        h.mock.inject("any/out/get/radio/rfquack_Packet/x", b"\x0a\x09");
        h.mock.inject("any/out/get/radio/rfquack_Packet/x", &packet(&h.catalog, b"ok"));
        assert!(wait_until(|| h.session.packets().len() == 1));
        assert!(h.session.metrics().encode_text().contains("rfq_rx_dropped 2"));
    }

    #[test]
    fn requests_carry_field_issues_and_reach_the_transport() -> anyhow::Result<()> {
        let h = start(false);
        h.mock.inject("any/out/info/radio/rfquack_CmdInfo/set_register", &cmd_info(&h.catalog, "rfquack_Register", 1));
        assert!(wait_until(|| !h.session.modules().is_empty()));
        h.mock.take_sent();

        let req = h.session.invoke(
            "radio",
            "set_register",
            CallArgs::Fields(vec![
                ("address".to_string(), FieldValue::Int(0x02)),
                ("bogus".to_string(), FieldValue::Int(1)),
            ]),
        )?;
        assert_eq!(req.issues.len(), 1);
        let sent = h.mock.take_sent();
        assert_eq!(sent[0].topic, "any/in/set/radio/rfquack_Register/set_register");
        assert_eq!(sent[0].payload, vec![0x08, 0x02]);
        Ok(())
    }

    #[test]
    fn prebuilt_message_is_sent_verbatim() -> anyhow::Result<()> {
        let h = start(false);
        h.mock.inject("any/out/info/radio/rfquack_CmdInfo/send", &cmd_info(&h.catalog, PACKET_TYPE, 1));
        assert!(wait_until(|| !h.session.modules().is_empty()));
        h.mock.take_sent();
        let mut pkt = DynamicMessage::new(h.catalog.resolve(PACKET_TYPE)?);
        pkt.set_field_by_name("data", Value::Bytes(Bytes::from_static(b"\x10\x20")));
        h.session.invoke("radio", "send", CallArgs::Message(pkt.clone()))?;
        assert_eq!(h.mock.take_sent()[0].payload, pkt.encode_to_vec());
        Ok(())
    }

    #[test]
    fn shutdown_rejects_later_requests() {
        let h = start(false);
        h.session.shutdown();
        assert!(!h.session.is_ready());
        assert!(matches!(h.session.select(0), Err(SessionError::UnknownDevice(_))));
        let void = Vec::new();
        assert!(!h.mock.inject("A/out/set/ping/rfquack_VoidValue/ping", &void));
    }

    #[test]
    fn device_log_lines_are_counted() {
        let h = start(false);
        h.mock.inject_log("radio init ok");
        assert!(wait_until(|| h.session.metrics().encode_text().contains("rfq_device_log_lines 1")));
    }
}

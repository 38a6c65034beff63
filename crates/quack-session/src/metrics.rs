use crate::SessionError;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub rx_messages: IntCounter,
    pub rx_dropped: IntCounter,
    pub tx_requests: IntCounter,
    pub device_log_lines: IntCounter,
    pub devices: IntGauge,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, SessionError> {
    IntCounter::new(name, help).map_err(|e| SessionError::Metrics(e.to_string()))
}

impl SessionMetrics {
    pub fn new() -> Result<Self, SessionError> {
        let registry = Registry::new();
        let metrics = Self {
            rx_messages: counter("rfq_rx_messages", "Messages accepted from the transport")?,
            rx_dropped: counter("rfq_rx_dropped", "Inbound messages dropped (unknown type, bad payload)")?,
            tx_requests: counter("rfq_tx_requests", "Requests sent to a dongle")?,
            device_log_lines: counter("rfq_device_log_lines", "Out-of-band log lines from the dongle")?,
            devices: IntGauge::new("rfq_devices", "Dongles discovered")
                .map_err(|e| SessionError::Metrics(e.to_string()))?,
            registry,
        };
        let _ = metrics.registry.register(Box::new(metrics.rx_messages.clone()));
        let _ = metrics.registry.register(Box::new(metrics.rx_dropped.clone()));
        let _ = metrics.registry.register(Box::new(metrics.tx_requests.clone()));
        let _ = metrics.registry.register(Box::new(metrics.device_log_lines.clone()));
        let _ = metrics.registry.register(Box::new(metrics.devices.clone()));
        Ok(metrics)
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_exposition_lists_counters() -> anyhow::Result<()> {
        let m = SessionMetrics::new()?;
        m.rx_messages.inc();
        m.devices.set(2);
        let text = m.encode_text();
        assert!(text.contains("rfq_rx_messages 1"));
        assert!(text.contains("rfq_devices 2"));
        Ok(())
    }
}

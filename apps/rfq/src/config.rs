use anyhow::{bail, Context, Result};
use quack_registry::SchemaCatalog;
use quack_transport::{
    MqttSettings, MqttTransport, StreamTransport, TlsMaterial, Transport, DEFAULT_BAUD_RATE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_host() -> String {
    DEFAULT_MQTT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

pub fn default_client_id() -> String {
    format!("rfq-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca: PathBuf,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    Mqtt {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        tls: Option<TlsConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub select_first: bool,
    /// Compiled `FileDescriptorSet` replacing the built-in message catalog.
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let cfg: ClientConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    Ok(cfg)
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn tls_material(tls: &TlsConfig) -> Result<TlsMaterial> {
    let client_auth = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
        (None, None) => None,
        _ => bail!("client certificate and key must be given together"),
    };
    Ok(TlsMaterial {
        ca: read_pem(&tls.ca)?,
        client_auth,
    })
}

pub fn build_transport(cfg: &TransportConfig) -> Result<Arc<dyn Transport>> {
    match cfg {
        TransportConfig::Serial { port, baud_rate } => {
            info!(%port, baud_rate, "opening serial transport");
            let transport = StreamTransport::open_serial(port, *baud_rate)
                .with_context(|| format!("opening serial port {port}"))?;
            Ok(Arc::new(transport))
        }
        TransportConfig::Mqtt {
            host,
            port,
            client_id,
            username,
            password,
            tls,
        } => {
            let mut settings = MqttSettings::new(
                host.as_str(),
                *port,
                client_id.clone().unwrap_or_else(default_client_id),
            );
            settings.credentials = match (username, password) {
                (Some(user), pass) => Some((user.clone(), pass.clone().unwrap_or_default())),
                (None, Some(_)) => bail!("a password needs a username"),
                (None, None) => None,
            };
            settings.tls = tls.as_ref().map(tls_material).transpose()?;
            let transport = MqttTransport::new(settings).context("creating mqtt transport")?;
            Ok(Arc::new(transport))
        }
    }
}

pub fn load_catalog(path: Option<&Path>) -> Result<SchemaCatalog> {
    match path {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("reading descriptor set: {}", path.display()))?;
            SchemaCatalog::from_descriptor_set(&bytes)
                .with_context(|| format!("loading descriptor set: {}", path.display()))
        }
        None => Ok(SchemaCatalog::builtin()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serial_defaults() -> Result<()> {
        let cfg: ClientConfig = serde_yaml::from_str("transport:\n  kind: serial\n  port: /dev/ttyUSB0\n")?;
        assert_eq!(
            cfg.transport,
            TransportConfig::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115_200
            }
        );
        assert!(!cfg.select_first);
        assert!(cfg.schema.is_none());
        Ok(())
    }

    #[test]
    fn mqtt_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "select_first: true\ntransport:\n  kind: mqtt\n  username: quack\n  password: secret\n"
        )?;
        let cfg = load_config(file.path())?;
        assert!(cfg.select_first);
        match cfg.transport {
            TransportConfig::Mqtt { host, port, client_id, username, tls, .. } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 1883);
                assert!(client_id.is_none());
                assert_eq!(username.as_deref(), Some("quack"));
                assert!(tls.is_none());
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let parsed: Result<ClientConfig, _> = serde_yaml::from_str("transport:\n  kind: carrier_pigeon\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn client_ids_are_unique() {
        let a = default_client_id();
        assert!(a.starts_with("rfq-"));
        assert_ne!(a, default_client_id());
    }

    #[test]
    fn half_a_client_certificate_is_fatal() {
        let tls = TlsConfig {
            ca: PathBuf::from("/nonexistent/ca.pem"),
            cert: Some(PathBuf::from("cert.pem")),
            key: None,
        };
        assert!(tls_material(&tls).is_err());
    }

    #[test]
    fn builtin_catalog_by_default() -> Result<()> {
        let catalog = load_catalog(None)?;
        assert!(catalog.resolve("rfquack_Status").is_ok());
        assert!(load_catalog(Some(Path::new("/nonexistent/rfquack.pb"))).is_err());
        Ok(())
    }
}

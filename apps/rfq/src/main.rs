use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use quack_session::{DisplayEvent, DisplayFn, Session, SessionOptions};
use quack_transport::DEFAULT_BAUD_RATE;

mod config;
mod render;
mod shell;

use config::{ClientConfig, TlsConfig, TransportConfig, DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT};
use shell::Outcome;

#[derive(Parser, Debug)]
#[command(
    name = "rfq",
    version,
    about = "RFQuack dongle client",
    disable_help_subcommand = true
)]
struct Cli {
    /// Log filter (e.g. `debug`, `quack_transport=trace`); defaults to RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print decoded messages as JSON
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,
    /// Talk to a dongle on a serial port
    Serial {
        #[arg(long)]
        port: String,
        #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,
        /// Select the first dongle that answers
        #[arg(long, action = ArgAction::SetTrue)]
        select_first: bool,
        /// Compiled FileDescriptorSet replacing the built-in messages
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Talk to dongles through an MQTT broker
    Mqtt {
        #[arg(long, default_value = DEFAULT_MQTT_HOST)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
        port: u16,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// CA certificate (PEM); enables TLS
        #[arg(long)]
        ca: Option<PathBuf>,
        /// Client certificate (PEM)
        #[arg(long, requires = "ca")]
        cert: Option<PathBuf>,
        /// Client key (PEM)
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        select_first: bool,
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Run from a YAML config file
    Run {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.log_level.as_deref());

    let cfg = match cli.command {
        Commands::Ports => return list_ports(),
        Commands::Serial {
            port,
            baud,
            select_first,
            schema,
        } => ClientConfig {
            transport: TransportConfig::Serial {
                port,
                baud_rate: baud,
            },
            select_first,
            schema,
        },
        Commands::Mqtt {
            host,
            port,
            client_id,
            username,
            password,
            ca,
            cert,
            key,
            select_first,
            schema,
        } => ClientConfig {
            transport: TransportConfig::Mqtt {
                host,
                port,
                client_id,
                username,
                password,
                tls: ca.map(|ca| TlsConfig { ca, cert, key }),
            },
            select_first,
            schema,
        },
        Commands::Run { config } => config::load_config(&config)?,
    };
    run_client(cfg, cli.json)
}

fn setup_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::from_default_env(),
    };
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn list_ports() -> Result<()> {
    for port in quack_transport::list_ports()? {
        println!("{}\t{}", port.name, port.driver);
    }
    Ok(())
}

fn run_client(cfg: ClientConfig, json: bool) -> Result<()> {
    let catalog = Arc::new(config::load_catalog(cfg.schema.as_deref())?);
    let transport = config::build_transport(&cfg.transport)?;
    let display: DisplayFn = Box::new(move |ev: &DisplayEvent<'_>| {
        println!("\n[{} {}] {}\n{}", ev.module, ev.verb, ev.address, render::render(ev.message, json));
    });
    let session = Session::start(
        transport,
        catalog,
        SessionOptions {
            select_first: cfg.select_first,
        },
        Some(display),
    )
    .context("starting session")?;
    info!("session started; waiting for dongles");
    println!("Select a dongle with `select <n>` once it shows up in `devices`; `help` lists commands.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("rfq> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        match shell::parse_line(&line) {
            Ok(cmd) => match shell::execute(&session, cmd, json) {
                Outcome::Print(text) if text.is_empty() => {}
                Outcome::Print(text) => println!("{text}"),
                Outcome::Exit => break,
            },
            Err(e) => println!("error: {e}"),
        }
    }
    session.shutdown();
    Ok(())
}

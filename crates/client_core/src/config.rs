use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    board::SnapshotFailurePolicy,
    connection::ReconnectOptions,
    error::TransportError,
    transport::{EventStreamTransport, SocketTransport, Transport},
};

pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    EventStream,
    Socket,
}

impl std::str::FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "event_stream" | "sse" => Ok(Self::EventStream),
            "socket" | "ws" => Ok(Self::Socket),
            other => Err(anyhow::anyhow!("unknown transport '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub transport: TransportKind,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub manual_reconnect_delay_ms: u64,
    pub snapshot_failure: SnapshotFailurePolicy,
    /// Room joined on start when the transport supports rooms.
    pub workflow_room: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            transport: TransportKind::EventStream,
            auto_reconnect: true,
            reconnect_interval_ms: 3000,
            manual_reconnect_delay_ms: 100,
            snapshot_failure: SnapshotFailurePolicy::Fallback,
            workflow_room: None,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            auto_reconnect: self.auto_reconnect,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            manual_reconnect_delay: Duration::from_millis(self.manual_reconnect_delay_ms),
        }
    }

    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(match self.transport {
            TransportKind::EventStream => Arc::new(EventStreamTransport::new(&self.server_url)),
            TransportKind::Socket => Arc::new(SocketTransport::from_server_url(&self.server_url)?),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    transport: Option<TransportKind>,
    auto_reconnect: Option<bool>,
    reconnect_interval_ms: Option<u64>,
    manual_reconnect_delay_ms: Option<u64>,
    snapshot_failure: Option<SnapshotFailurePolicy>,
    workflow_room: Option<String>,
}

/// Defaults, then the toml file (if any), then `PIPELINE_*` variables.
///
/// An explicit path must exist; the default `pipeline.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let file = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    if let Some(raw) = file {
        let file_cfg: FileSettings = toml::from_str(&raw).context("invalid client config")?;
        apply_file(&mut settings, file_cfg);
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.transport {
        settings.transport = v;
    }
    if let Some(v) = file_cfg.auto_reconnect {
        settings.auto_reconnect = v;
    }
    if let Some(v) = file_cfg.reconnect_interval_ms {
        settings.reconnect_interval_ms = v;
    }
    if let Some(v) = file_cfg.manual_reconnect_delay_ms {
        settings.manual_reconnect_delay_ms = v;
    }
    if let Some(v) = file_cfg.snapshot_failure {
        settings.snapshot_failure = v;
    }
    if file_cfg.workflow_room.is_some() {
        settings.workflow_room = file_cfg.workflow_room;
    }
}

fn apply_env<F>(settings: &mut ClientSettings, var: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = var("PIPELINE_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("PIPELINE_TRANSPORT") {
        settings.transport = v.parse()?;
    }
    if let Some(v) = var("PIPELINE_AUTO_RECONNECT") {
        settings.auto_reconnect = v
            .parse()
            .with_context(|| format!("PIPELINE_AUTO_RECONNECT must be true or false, got '{v}'"))?;
    }
    if let Some(v) = var("PIPELINE_RECONNECT_INTERVAL_MS") {
        settings.reconnect_interval_ms = v
            .parse()
            .with_context(|| format!("invalid PIPELINE_RECONNECT_INTERVAL_MS '{v}'"))?;
    }
    if let Some(v) = var("PIPELINE_SNAPSHOT_FAILURE") {
        settings.snapshot_failure = match v.as_str() {
            "fallback" => SnapshotFailurePolicy::Fallback,
            "empty" => SnapshotFailurePolicy::Empty,
            other => anyhow::bail!("PIPELINE_SNAPSHOT_FAILURE must be fallback or empty, got '{other}'"),
        };
    }
    if let Some(v) = var("PIPELINE_WORKFLOW_ROOM") {
        settings.workflow_room = Some(v).filter(|room| !room.is_empty());
    }
    Ok(())
}

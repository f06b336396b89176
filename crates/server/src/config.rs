use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    /// Capacity of the workflow event fan-out; slow subscribers past this lag.
    pub event_buffer: usize,
    pub ping_interval_secs: u64,
    pub seed_demo_board: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            event_buffer: 256,
            ping_interval_secs: 30,
            seed_demo_board: true,
        }
    }
}

impl Settings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Err(err) = apply_file_settings(&mut settings, &raw) {
            tracing::warn!("ignoring server.toml: {err:#}");
        }
    }
    apply_env_settings(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, &raw)?;
    apply_env_settings(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw)
        .context("server.toml is not valid toml")?;
    if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
        settings.server_bind = v.to_string();
    }
    if let Some(v) = file_cfg.get("event_buffer").and_then(toml::Value::as_integer) {
        settings.event_buffer = usize::try_from(v).context("event_buffer must be positive")?;
    }
    if let Some(v) = file_cfg
        .get("ping_interval_secs")
        .and_then(toml::Value::as_integer)
    {
        settings.ping_interval_secs =
            u64::try_from(v).context("ping_interval_secs must be positive")?;
    }
    if let Some(v) = file_cfg.get("seed_demo_board").and_then(toml::Value::as_bool) {
        settings.seed_demo_board = v;
    }
    Ok(())
}

fn apply_env_settings<F>(settings: &mut Settings, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed;
        }
    }
    if let Some(v) = var("APP__PING_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.ping_interval_secs = parsed;
        }
    }
    if let Some(v) = var("APP__SEED_DEMO_BOARD") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.seed_demo_board = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

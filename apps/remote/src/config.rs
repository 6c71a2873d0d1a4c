use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use client_core::{transport::parse_controller_url, CancelPolicy, GestureConfig, SessionConfig};
use serde::Deserialize;
use shared::domain::{DEFAULT_SLOT_COUNT, MAX_SLOTS};

pub const DEFAULT_SETTINGS_FILE: &str = "remote.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub controller_url: String,
    pub database_url: String,
    pub slot_count: usize,
    pub long_press_ms: u64,
    pub settle_ms: u64,
    pub cancel_policy: CancelPolicy,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_url: "ws://192.168.4.1:81".into(),
            database_url: "sqlite://./data/remote.db".into(),
            slot_count: DEFAULT_SLOT_COUNT,
            long_press_ms: 600,
            settle_ms: 50,
            cancel_policy: CancelPolicy::SameAsRelease,
            log_filter: "info".into(),
        }
    }
}

/// Optional keys accepted in `remote.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    controller_url: Option<String>,
    database_url: Option<String>,
    slot_count: Option<usize>,
    long_press_ms: Option<u64>,
    settle_ms: Option<u64>,
    cancel_policy: Option<CancelPolicy>,
    log_filter: Option<String>,
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            slot_count: self.slot_count,
            gesture: GestureConfig {
                long_press_threshold: Duration::from_millis(self.long_press_ms),
                post_release_settle: Duration::from_millis(self.settle_ms),
                cancel_policy: self.cancel_policy,
            },
            ..SessionConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_controller_url(&self.controller_url)?;
        if !(1..=MAX_SLOTS).contains(&self.slot_count) {
            bail!(
                "slot_count must be between 1 and {MAX_SLOTS}, got {}",
                self.slot_count
            );
        }
        if self.long_press_ms == 0 {
            bail!("long_press_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Defaults, then `remote.toml` in the working directory, then environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    }

    apply_env(&mut settings, env);
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.controller_url {
        settings.controller_url = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.slot_count {
        settings.slot_count = v;
    }
    if let Some(v) = file_cfg.long_press_ms {
        settings.long_press_ms = v;
    }
    if let Some(v) = file_cfg.settle_ms {
        settings.settle_ms = v;
    }
    if let Some(v) = file_cfg.cancel_policy {
        settings.cancel_policy = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("DISPENSER_URL") {
        settings.controller_url = v;
    }
    if let Some(v) = env("APP__CONTROLLER_URL") {
        settings.controller_url = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(parsed) = env("APP__SLOT_COUNT").and_then(|v| v.trim().parse().ok()) {
        settings.slot_count = parsed;
    }
    if let Some(parsed) = env("APP__LONG_PRESS_MS").and_then(|v| v.trim().parse().ok()) {
        settings.long_press_ms = parsed;
    }
    if let Some(parsed) = env("APP__SETTLE_MS").and_then(|v| v.trim().parse().ok()) {
        settings.settle_ms = parsed;
    }
    if let Some(policy) = env("APP__CANCEL_POLICY").and_then(|v| parse_cancel_policy(&v)) {
        settings.cancel_policy = policy;
    }

    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

pub fn parse_cancel_policy(raw: &str) -> Option<CancelPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "same_as_release" | "release" => Some(CancelPolicy::SameAsRelease),
        "abort" => Some(CancelPolicy::Abort),
        _ => None,
    }
}

/// Turns a bare file path into a `sqlite://` url; other urls pass through.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

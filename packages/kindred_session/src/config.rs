use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Session config (figment-deserialized from defaults / kindred.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   kindred.toml:    [connect]
//                    backoff_base_ms = 500
//
//   env var:         KINDRED_CONNECT__BACKOFF_BASE_MS=500   (double underscore = nesting)
//
// The endpoint URL is the only required setting; everything else defaults.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://host/realtime`. The current auth
    /// token is appended as `?token=<value>` at dial time.
    #[serde(default)]
    pub endpoint: String,
    /// Initial auth token. Rotations arrive later via `update_token`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            connect: ConnectConfig::default(),
            dedup: DedupConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

/// Connection lifecycle tunables (lives under `[connect]` in kindred.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Minimum interval between connection attempts.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// First reconnect delay; doubled per consecutive failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive failed attempts before automatic reconnection stops.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Outbound queue capacity; oldest frames are dropped beyond this.
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    /// Delay before the connect nudge scheduled by `send()` while offline.
    #[serde(default = "default_send_nudge_ms")]
    pub send_nudge_ms: u64,
    /// How long to wait after a `processing` frame before giving up on the
    /// reply and surfacing the fallback message.
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_attempts: default_max_attempts(),
            queue_cap: default_queue_cap(),
            send_nudge_ms: default_send_nudge_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
        }
    }
}

/// Reply deduplication tunables (lives under `[dedup]` in kindred.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Window within which a similar reply is treated as a duplicate.
    #[serde(default = "default_dedup_window_ms")]
    pub window_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: default_dedup_window_ms(),
        }
    }
}

/// Playback tunables (lives under `[audio]` in kindred.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output gain while capture is inactive.
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Reduced (not muted) output gain while local capture is active.
    #[serde(default = "default_duck_gain")]
    pub duck_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            duck_gain: default_duck_gain(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    1_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_queue_cap() -> usize {
    256
}

fn default_send_nudge_ms() -> u64 {
    250
}

fn default_processing_timeout_ms() -> u64 {
    30_000
}

fn default_dedup_window_ms() -> u64 {
    5_000
}

fn default_gain() -> f32 {
    1.0
}

fn default_duck_gain() -> f32 {
    0.3
}

impl SessionConfig {
    /// Minimal config for callers that supply everything in code.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Build the figment for a config directory: struct defaults, then
    /// `kindred.toml`, then `KINDRED_*` env vars (double underscore nesting).
    pub fn figment(config_dir: &Path) -> figment::Figment {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        Figment::from(Serialized::defaults(SessionConfig::default()))
            .merge(Toml::file(config_dir.join("kindred.toml")))
            .merge(Env::prefixed("KINDRED_").split("__"))
    }

    /// Load and validate configuration from a directory.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config: SessionConfig = Self::figment(config_dir)
            .extract()
            .context("failed to read session configuration")?;
        ensure!(
            !config.endpoint.is_empty(),
            "session endpoint is not configured (set `endpoint` in kindred.toml or KINDRED_ENDPOINT)"
        );
        Ok(config)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.connect.cooldown_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.connect.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.connect.backoff_max_ms)
    }

    pub fn send_nudge(&self) -> Duration {
        Duration::from_millis(self.connect.send_nudge_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.connect.processing_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    #[test]
    fn defaults_are_sane() {
        let config = SessionConfig::default();
        assert_eq!(config.connect.cooldown_ms, 1_000);
        assert_eq!(config.connect.backoff_base_ms, 1_000);
        assert_eq!(config.connect.backoff_max_ms, 30_000);
        assert_eq!(config.connect.max_attempts, 5);
        assert_eq!(config.dedup.window_ms, 5_000);
        assert!(config.audio.duck_gain > 0.0, "ducking must not mute");
        assert!(config.audio.duck_gain < config.audio.gain);
    }

    #[test]
    fn toml_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(SessionConfig::default())).merge(
            Toml::string(
                r#"
                endpoint = "wss://example.test/realtime"

                [connect]
                backoff_base_ms = 500
                max_attempts = 3

                [dedup]
                window_ms = 2000
                "#,
            ),
        );
        let config: SessionConfig = figment.extract().unwrap();
        assert_eq!(config.endpoint, "wss://example.test/realtime");
        assert_eq!(config.connect.backoff_base_ms, 500);
        assert_eq!(config.connect.max_attempts, 3);
        // Untouched fields keep their defaults
        assert_eq!(config.connect.backoff_max_ms, 30_000);
        assert_eq!(config.dedup.window_ms, 2_000);
    }

    #[test]
    fn load_rejects_missing_endpoint() {
        let dir = std::env::temp_dir().join("kindred-config-test-empty");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(SessionConfig::load(&dir).is_err());
    }

    #[test]
    fn duration_accessors() {
        let config = SessionConfig::for_endpoint("wss://example.test/realtime");
        assert_eq!(config.cooldown(), Duration::from_millis(1_000));
        assert_eq!(config.dedup_window(), Duration::from_secs(5));
        assert_eq!(config.processing_timeout(), Duration::from_secs(30));
    }
}

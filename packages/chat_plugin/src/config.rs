use anyhow::{Context, Result};
use chat_session::{ReconnectPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [session]
//                    idle_timeout_secs = 600
//
//   env var:         CHAT_SESSION__IDLE_TIMEOUT_SECS=600   (double underscore = nesting)
//
//   CLI flag:        --endpoint wss://chat.example.com     (server.ws_url only)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Where the chat server lives (under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Base WebSocket URL; the stream path is appended.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
        }
    }
}

/// Session tunables (under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Disconnect after this many seconds connected (0 = never).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Keep sent messages in the transcript.
    #[serde(default = "default_record_outbound")]
    pub record_outbound: bool,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            record_outbound: default_record_outbound(),
        }
    }
}

/// Reconnect-after-failure tunables (under `[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// 0 = retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://localhost:8000".to_string()
}
fn default_idle_timeout_secs() -> u64 {
    3600
}
fn default_record_outbound() -> bool {
    true
}
fn default_initial_delay_ms() -> u64 {
    5000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    5
}

/// Build a figment that layers: defaults → config.toml → CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHAT_SERVER__WS_URL=wss://chat.example.com`  →  `server.ws_url`
///   `CHAT_RECONNECT__ENABLED=true`  →  `reconnect.enabled = true`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHAT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, handed to the session manager)
// =============================================================================

pub fn reconnect_policy_from_file(fc: &ReconnectFileConfig) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: fc.enabled,
        initial_delay: Duration::from_millis(fc.initial_delay_ms),
        max_delay: Duration::from_millis(fc.max_delay_ms.max(fc.initial_delay_ms)),
        multiplier: fc.multiplier,
        max_attempts: fc.max_attempts,
    }
}

/// Resolve the session config. `endpoint` (from `--endpoint`) wins over
/// `server.ws_url`.
pub fn session_config_from_file(fc: &FileConfig, endpoint: Option<&str>) -> Result<SessionConfig> {
    let ws_url = endpoint.unwrap_or(&fc.server.ws_url);
    let config = SessionConfig::from_base_url(ws_url)
        .with_context(|| format!("Invalid server URL: {}", ws_url))?;

    let idle_timeout = if fc.session.idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(fc.session.idle_timeout_secs))
    };

    Ok(config
        .with_idle_timeout(idle_timeout)
        .with_record_outbound(fc.session.record_outbound)
        .with_reconnect(reconnect_policy_from_file(&fc.reconnect)))
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
    /// Durable chat id and registration flag.
    pub state_path: PathBuf,
}

impl ChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chat_plugin"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let state_path = data_dir.join("state.json");

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            state_path,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_session_file_config_defaults() {
        let d = SessionFileConfig::default();
        assert_eq!(d.idle_timeout_secs, 3600);
        assert!(d.record_outbound);
    }

    #[test]
    fn test_reconnect_file_config_defaults() {
        let d = ReconnectFileConfig::default();
        assert!(!d.enabled);
        assert_eq!(d.initial_delay_ms, 5000);
        assert_eq!(d.max_delay_ms, 60_000);
        assert_eq!(d.multiplier, 2.0);
        assert_eq!(d.max_attempts, 5);
    }

    // ── session_config_from_file ────────────────────────────────────────

    #[test]
    fn test_session_config_defaults() {
        let sc = session_config_from_file(&FileConfig::default(), None).unwrap();
        assert_eq!(sc.endpoint.as_str(), "ws://localhost:8000/ws/chat/user");
        assert_eq!(sc.idle_timeout, Some(Duration::from_secs(3600)));
        assert!(sc.record_outbound);
        assert!(!sc.reconnect.enabled);
    }

    #[test]
    fn test_session_config_idle_timeout_zero_disables() {
        let fc = FileConfig {
            session: SessionFileConfig {
                idle_timeout_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let sc = session_config_from_file(&fc, None).unwrap();
        assert!(sc.idle_timeout.is_none());
    }

    #[test]
    fn test_session_config_endpoint_flag_wins() {
        let sc = session_config_from_file(&FileConfig::default(), Some("wss://chat.example.com"))
            .unwrap();
        assert_eq!(sc.endpoint.as_str(), "wss://chat.example.com/ws/chat/user");
    }

    #[test]
    fn test_session_config_rejects_bad_url() {
        let err = session_config_from_file(&FileConfig::default(), Some("nope")).unwrap_err();
        assert!(err.to_string().contains("Invalid server URL"));
    }

    #[test]
    fn test_reconnect_policy_from_file() {
        let fc = ReconnectFileConfig {
            enabled: true,
            initial_delay_ms: 250,
            max_delay_ms: 100,
            multiplier: 3.0,
            max_attempts: 0,
        };
        let policy = reconnect_policy_from_file(&fc);
        assert!(policy.enabled);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        // Cap never undercuts the first delay.
        assert_eq!(policy.max_delay, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 0);
    }

    // ── ChatConfig ──────────────────────────────────────────────────────

    #[test]
    fn test_chat_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let config = ChatConfig::new(Some(dir.clone())).unwrap();

        assert!(dir.exists());
        assert_eq!(config.data_dir, dir);
        assert_eq!(config.state_path, dir.join("state.json"));
        assert_eq!(config.config_toml_path(), dir.join("config.toml"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.ws_url, "ws://localhost:8000");
        assert_eq!(fc.session.idle_timeout_secs, 3600);
        assert!(!fc.reconnect.enabled);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nws_url = \"wss://chat.example.com\"\n\n\
             [session]\nidle_timeout_secs = 60\nrecord_outbound = false\n\n\
             [reconnect]\nenabled = true\nmax_attempts = 2\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.ws_url, "wss://chat.example.com");
        assert_eq!(fc.session.idle_timeout_secs, 60);
        assert!(!fc.session.record_outbound);
        assert!(fc.reconnect.enabled);
        assert_eq!(fc.reconnect.max_attempts, 2);
        // Untouched keys keep their defaults.
        assert_eq!(fc.reconnect.initial_delay_ms, 5000);
    }

    #[test]
    fn test_load_config_rejects_wrong_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[session]\nidle_timeout_secs = \"soon\"\n",
        )
        .unwrap();
        assert!(load_config(tmp.path()).extract::<FileConfig>().is_err());
    }
}

use crate::strategy::DEFAULT_TRANSIENT_MESSAGES;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub backend: BackendConfig,
    pub watch: WatchConfig,
    pub component: ComponentConfig,
    pub client: ClientConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BackendConfig {
    /// Connection URL of the supervised database
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Channel the listener subscribes to
    #[serde(default = "default_channel")]
    pub channel: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Directory to watch for role change markers; monitoring is off when unset
    pub path: Option<String>,

    /// File names whose change triggers a role check
    #[serde(default = "default_marker_files")]
    pub marker_files: Vec<String>,

    /// Scan period of the directory watcher
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ComponentConfig {
    /// Largest backoff delay of a component, in seconds
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,

    /// Depth of the listener-to-processor notification queue
    #[serde(default = "default_notification_depth")]
    pub notification_depth: usize,

    /// Wake the processor once when the listener starts
    #[serde(default = "default_fire_on_start")]
    pub fire_on_start: bool,

    /// Backend error messages treated as transient
    #[serde(default = "default_transient_messages")]
    pub transient_messages: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClientConfig {
    /// Largest delay between role checks while the backend is unreachable, in seconds
    #[serde(default = "default_retry_ceiling_secs")]
    pub retry_ceiling_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ProcessorConfig {
    /// SQL statement executed on every wake-up
    pub statement: Option<String>,
}

impl SupervisorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("rolewarden.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("backend.url", default_backend_url())?
            .set_default("backend.channel", default_channel())?
            .set_default("watch.marker_files", default_marker_files())?
            .set_default("watch.poll_interval_ms", default_poll_interval_ms())?
            .set_default("component.backoff_ceiling_secs", default_backoff_ceiling_secs())?
            .set_default(
                "component.notification_depth",
                default_notification_depth() as u64,
            )?
            .set_default("component.fire_on_start", default_fire_on_start())?
            .set_default("component.transient_messages", default_transient_messages())?
            .set_default("client.retry_ceiling_secs", default_retry_ceiling_secs())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables such as ROLEWARDEN_BACKEND__URL
            .add_source(
                Environment::with_prefix("ROLEWARDEN")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch.marker_files")
                    .with_list_parse_key("component.transient_messages")
                    .try_parsing(true),
            )
            .build()?;

        let config: SupervisorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Backend url must not be empty".to_string(),
            ));
        }

        if self.backend.channel.trim().is_empty() {
            return Err(ConfigError::Message(
                "Backend channel must not be empty".to_string(),
            ));
        }

        if let Some(path) = &self.watch.path {
            if path.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Watch path must not be empty when set".to_string(),
                ));
            }
        }

        if let Some(marker) = self
            .watch
            .marker_files
            .iter()
            .find(|marker| marker.is_empty() || marker.contains(['/', '\\']))
        {
            return Err(ConfigError::Message(format!(
                "Marker file '{}' must be a bare file name",
                marker
            )));
        }

        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Watch poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.component.backoff_ceiling_secs == 0 {
            return Err(ConfigError::Message(
                "Component backoff_ceiling_secs must be greater than 0".to_string(),
            ));
        }

        if self.component.notification_depth == 0 {
            return Err(ConfigError::Message(
                "Component notification_depth must be greater than 0".to_string(),
            ));
        }

        if self.client.retry_ceiling_secs == 0 {
            return Err(ConfigError::Message(
                "Client retry_ceiling_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.poll_interval_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: default_backend_url(),
                channel: default_channel(),
            },
            watch: WatchConfig {
                path: None,
                marker_files: default_marker_files(),
                poll_interval_ms: default_poll_interval_ms(),
            },
            component: ComponentConfig {
                backoff_ceiling_secs: default_backoff_ceiling_secs(),
                notification_depth: default_notification_depth(),
                fire_on_start: default_fire_on_start(),
                transient_messages: default_transient_messages(),
            },
            client: ClientConfig {
                retry_ceiling_secs: default_retry_ceiling_secs(),
            },
            processor: ProcessorConfig::default(),
        }
    }
}

// Default value functions
fn default_backend_url() -> String {
    "postgres://localhost/postgres".to_string()
}
fn default_channel() -> String {
    "rolewarden".to_string()
}

fn default_marker_files() -> Vec<String> {
    vec![
        "recovery.conf".to_string(),
        "recovery.done".to_string(),
        "standby.signal".to_string(),
    ]
}
fn default_poll_interval_ms() -> u64 {
    500
}

fn default_backoff_ceiling_secs() -> u64 {
    crate::component::DEFAULT_BACKOFF_CEILING
}
fn default_notification_depth() -> usize {
    crate::messaging::DEFAULT_NOTIFICATION_DEPTH
}
fn default_fire_on_start() -> bool {
    true
}
fn default_transient_messages() -> Vec<String> {
    DEFAULT_TRANSIENT_MESSAGES
        .iter()
        .map(|message| message.to_string())
        .collect()
}

fn default_retry_ceiling_secs() -> u64 {
    crate::backoff::ROLE_CHECK_CEILING_SECS
}

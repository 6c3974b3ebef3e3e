// Session configuration. Defaults target a LAN: no ICE servers, so only host
// candidates are gathered.

use crate::error::ConfigError;
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_CHANNEL_LABEL: &str = "lanpair-data";

/// Comma separated ICE server urls.
pub const ENV_ICE_SERVERS: &str = "LANPAIR_ICE_SERVERS";
/// Credentials applied to every `turn:` url from [`ENV_ICE_SERVERS`].
pub const ENV_TURN_USERNAME: &str = "LANPAIR_TURN_USERNAME";
pub const ENV_TURN_CREDENTIAL: &str = "LANPAIR_TURN_CREDENTIAL";
/// `json` or `compact`.
pub const ENV_FORMAT: &str = "LANPAIR_FORMAT";
pub const ENV_LOG: &str = "LANPAIR_LOG";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// One rendezvous / relay hint handed to the transport engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        id: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: IceServerKind::Turn,
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Url with its scheme guaranteed.
    pub fn normalized_url(&self) -> String {
        add_ice_url_scheme(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl {
                id: self.id.clone(),
            });
        }
        if self.kind == IceServerKind::Turn
            && (self.username.is_none() || self.credential.is_none())
        {
            return Err(ConfigError::MissingCredentials {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Text form produced for local descriptions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionFormat {
    /// `{"type":"offer","sdp":"..."}`, same shape as a browser description.
    #[default]
    Json,
    /// gzip + base64 of the json form, short enough for a QR code.
    Compact,
}

impl FromStr for DescriptionFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

/// What starting a new session does while the previous one is still live.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Close the previous session and carry on with the new one.
    #[default]
    Replace,
    /// Refuse with `InvalidState` until the previous session is closed or failed.
    Reject,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            // debug builds log, release builds stay quiet unless asked
            enabled: cfg!(debug_assertions),
            level: "lanpair=info".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub channel_label: String,
    pub format: DescriptionFormat,
    pub restart: RestartPolicy,
    pub log: LogConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            format: DescriptionFormat::default(),
            restart: RestartPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_label.trim().is_empty() {
            return Err(ConfigError::EmptyChannelLabel);
        }
        self.ice_servers.iter().try_for_each(ServerConfig::validate)
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_format(mut self, format: DescriptionFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Defaults overridden by `LANPAIR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(urls) = get(ENV_ICE_SERVERS) {
            let username = get(ENV_TURN_USERNAME);
            let credential = get(ENV_TURN_CREDENTIAL);
            config.ice_servers = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .enumerate()
                .map(|(index, url)| {
                    let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                    ServerConfig {
                        id: format!("env-{index}"),
                        kind: if is_turn {
                            IceServerKind::Turn
                        } else {
                            IceServerKind::Stun
                        },
                        url: url.to_string(),
                        username: if is_turn { username.clone() } else { None },
                        credential: if is_turn { credential.clone() } else { None },
                    }
                })
                .collect();
        }
        if let Some(format) = get(ENV_FORMAT) {
            config.format = format.parse()?;
        }
        if let Some(level) = get(ENV_LOG) {
            config.log.enabled = true;
            config.log.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

//! Server configuration
//!
//! The configuration is decoded from YAML, validated once and then shared as
//! an immutable `Arc<Conf>` snapshot.

use std::collections::BTreeMap;
use std::path::Path as FsPath;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

/// Name of the path configuration that matches any path name
pub const CATCH_ALL_PATH: &str = "all";

/// Source value of a path fed by publishing clients
pub const PUBLISHER_SOURCE: &str = "publisher";

const DEFAULT_RTSP_PORT: u16 = 554;
const DEFAULT_RTMP_PORT: u16 = 1935;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfError {
    /// The configuration file could not be read
    #[error("unable to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// The YAML document is malformed or has unknown keys
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A path name contains forbidden characters or sequences
    #[error("invalid path name '{name}': {reason}")]
    InvalidPathName { name: String, reason: &'static str },

    /// A static source URL cannot be parsed
    #[error("invalid source URL '{url}': {error}")]
    InvalidSourceUrl { url: String, error: url::ParseError },

    /// A source URL uses a scheme no static source handles
    #[error("unsupported source '{0}'")]
    UnsupportedSource(String),

    /// The catch-all path was given a static source
    #[error("path 'all' can only be fed by publishers")]
    StaticCatchAll,

    /// A duration string could not be parsed
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    /// A path configuration is invalid
    #[error("path '{name}': {error}")]
    Path { name: String, error: Box<ConfError> },
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Server configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Conf {
    /// Log verbosity
    pub log_level: LogLevel,

    /// Read timeout applied by protocol handlers
    #[serde(with = "duration_str")]
    pub read_timeout: Duration,

    /// Write timeout applied by protocol handlers
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,

    /// Enable the administrative API
    pub api: bool,

    /// Address the administrative API listens on
    pub api_address: String,

    /// Disable the RTSP listener
    pub rtsp_disable: bool,

    /// Address of the RTSP listener
    pub rtsp_address: String,

    /// Disable the RTMP listener
    pub rtmp_disable: bool,

    /// Address of the RTMP listener
    pub rtmp_address: String,

    /// Path configurations keyed by path name
    #[serde(deserialize_with = "deserialize_paths")]
    pub paths: BTreeMap<String, PathConf>,
}

impl Default for Conf {
    fn default() -> Self {
        let mut paths = BTreeMap::new();
        paths.insert(CATCH_ALL_PATH.to_string(), PathConf::default());

        Self {
            log_level: LogLevel::Info,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            api: false,
            api_address: "127.0.0.1:9997".to_string(),
            rtsp_disable: false,
            rtsp_address: ":8554".to_string(),
            rtmp_disable: false,
            rtmp_address: ":1935".to_string(),
            paths,
        }
    }
}

impl Conf {
    /// Decode and validate a YAML document
    pub fn from_yaml(text: &str) -> Result<Self, ConfError> {
        let conf: Conf = serde_yaml::from_str(text)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Read, decode and validate a YAML file
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Check every path name and path source
    pub fn validate(&self) -> Result<(), ConfError> {
        for (name, path_conf) in &self.paths {
            let wrap = |error: ConfError| ConfError::Path {
                name: name.clone(),
                error: Box::new(error),
            };

            validate_path_name(name).map_err(wrap)?;
            let kind = path_conf.source_kind().map_err(wrap)?;

            if name == CATCH_ALL_PATH && kind != SourceKind::Publisher {
                return Err(wrap(ConfError::StaticCatchAll));
            }
        }
        Ok(())
    }

    /// Find the configuration that applies to a path name
    ///
    /// An exact entry wins over the catch-all entry.
    pub fn find_path_conf(&self, name: &str) -> Option<(&str, &PathConf)> {
        self.paths
            .get_key_value(name)
            .or_else(|| self.paths.get_key_value(CATCH_ALL_PATH))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Names of the paths that exist because configuration names them
    pub fn static_path_names(&self) -> impl Iterator<Item = &str> {
        self.paths
            .keys()
            .map(String::as_str)
            .filter(|name| *name != CATCH_ALL_PATH)
    }

    /// Enable the API
    pub fn api(mut self, enabled: bool) -> Self {
        self.api = enabled;
        self
    }

    /// Set the API address
    pub fn api_address(mut self, addr: impl Into<String>) -> Self {
        self.api_address = addr.into();
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Add or replace a path configuration
    pub fn path(mut self, name: impl Into<String>, conf: PathConf) -> Self {
        self.paths.insert(name.into(), conf);
        self
    }

    /// Remove a path configuration
    pub fn without_path(mut self, name: &str) -> Self {
        self.paths.remove(name);
        self
    }
}

/// Configuration of a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PathConf {
    /// `publisher`, or the URL of a static source
    pub source: String,

    /// Pause between reconnection attempts of a static source
    #[serde(with = "duration_str")]
    pub source_retry_pause: Duration,
}

impl Default for PathConf {
    fn default() -> Self {
        Self {
            source: PUBLISHER_SOURCE.to_string(),
            source_retry_pause: Duration::from_secs(5),
        }
    }
}

impl PathConf {
    /// Path fed by publishing clients
    pub fn publisher() -> Self {
        Self::default()
    }

    /// Path pulled from a remote URL
    pub fn pull(url: impl Into<String>) -> Self {
        Self {
            source: url.into(),
            ..Default::default()
        }
    }

    /// Set the retry pause of a static source
    pub fn source_retry_pause(mut self, pause: Duration) -> Self {
        self.source_retry_pause = pause;
        self
    }

    /// Classify the configured source
    pub fn source_kind(&self) -> Result<SourceKind, ConfError> {
        if self.source == PUBLISHER_SOURCE {
            return Ok(SourceKind::Publisher);
        }

        let url = Url::parse(&self.source).map_err(|error| ConfError::InvalidSourceUrl {
            url: self.source.clone(),
            error,
        })?;

        if url.host_str().is_none() {
            return Err(ConfError::UnsupportedSource(self.source.clone()));
        }

        match url.scheme() {
            "rtsp" => Ok(SourceKind::Rtsp(url)),
            "rtmp" => Ok(SourceKind::Rtmp(url)),
            _ => Err(ConfError::UnsupportedSource(self.source.clone())),
        }
    }

    /// Whether the path is fed by a static source
    pub fn has_static_source(&self) -> bool {
        self.source != PUBLISHER_SOURCE
    }
}

/// Kind of source a path is configured with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Publishing clients attach dynamically
    Publisher,
    /// Pull from an RTSP server
    Rtsp(Url),
    /// Pull from an RTMP server
    Rtmp(Url),
}

impl SourceKind {
    /// Upstream host and port of a static source
    pub fn upstream(&self) -> Option<(String, u16)> {
        let (url, default_port) = match self {
            SourceKind::Publisher => return None,
            SourceKind::Rtsp(url) => (url, DEFAULT_RTSP_PORT),
            SourceKind::Rtmp(url) => (url, DEFAULT_RTMP_PORT),
        };
        let host = url.host_str()?.to_string();
        Some((host, url.port().unwrap_or(default_port)))
    }
}

/// Validate a path name
///
/// Names are non-empty, do not start or end with a slash, do not contain
/// `..` and only use alphanumerics and `_-./~`.
pub fn validate_path_name(name: &str) -> Result<(), ConfError> {
    let invalid = |reason| ConfError::InvalidPathName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if name.starts_with('/') {
        return Err(invalid("can't begin with a slash"));
    }
    if name.ends_with('/') {
        return Err(invalid("can't end with a slash"));
    }
    if name.contains("..") {
        return Err(invalid("can't contain '..'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./~".contains(c))
    {
        return Err(invalid("can contain only alphanumeric characters, underscore, minus, dot, slash or tilde"));
    }
    Ok(())
}

fn deserialize_paths<'de, D>(deserializer: D) -> Result<BTreeMap<String, PathConf>, D::Error>
where
    D: Deserializer<'de>,
{
    // `cam1:` with no body decodes as null
    let raw: BTreeMap<String, Option<PathConf>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, conf)| (name, conf.unwrap_or_default()))
        .collect())
}

/// Parse `"250ns"`, `"750us"`, `"500ms"`, `"10s"`, `"2m"` or `"1h"`
pub fn parse_duration(text: &str) -> Result<Duration, ConfError> {
    let invalid = || ConfError::InvalidDuration(text.to_string());
    let text = text.trim();

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (value, unit) = text.split_at(split);
    let value: u64 = value.parse().map_err(|_| invalid())?;

    match unit {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.checked_mul(60).ok_or_else(invalid)?)),
        "h" => Ok(Duration::from_secs(value.checked_mul(3600).ok_or_else(invalid)?)),
        _ => Err(invalid()),
    }
}

/// Format a duration the way [`parse_duration`] reads it, in the coarsest
/// unit that keeps it exact
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        format!("{}s", duration.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", duration.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", duration.as_micros())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

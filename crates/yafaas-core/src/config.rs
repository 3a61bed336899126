//! Config - 起動時に一度だけ検証する実行設定
//!
//! - `EVENTS_API`: `<host>:<port>`（必須）
//! - function ディレクトリ（デフォルト: カレントディレクトリ）
//! - handler 参照（デフォルト: `index.handler`）

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ports::{HandlerRef, LoadError};

pub const DEFAULT_HANDLER: &str = "index.handler";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint invalid, got: {0} wanted: <host>:<port>")]
    Endpoint(String),

    #[error("unknown log format: {0} (expected pretty or json)")]
    LogFormat(String),

    #[error(transparent)]
    Handler(#[from] LoadError),
}

/// Event bus address, `<host>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Endpoint(value.to_string());
        let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub endpoint: Endpoint,
    pub function_dir: PathBuf,
    pub handler: HandlerRef,
}

impl RuntimeConfig {
    /// Validates raw bootstrap inputs. `function_dir` and `handler` fall back
    /// to the current directory and `index.handler`.
    pub fn from_parts(
        events_api: &str,
        function_dir: Option<PathBuf>,
        handler: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let endpoint = events_api.parse()?;
        let handler = HandlerRef::parse(handler.unwrap_or(DEFAULT_HANDLER))?;
        Ok(Self {
            endpoint,
            function_dir: function_dir.unwrap_or_else(|| PathBuf::from(".")),
            handler,
        })
    }
}

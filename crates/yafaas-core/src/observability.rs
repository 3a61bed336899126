//! Observability - tracing の初期化と span ヘルパー
//!
//! `RUST_LOG` でレベルを制御（デフォルト `info`）。
//! 出力形式は Pretty（開発用）と Json（本番用）。

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ConfigError;
use crate::domain::EventId;

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(ConfigError::LogFormat(s.to_string())),
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if let Err(err) = installed {
            eprintln!("logging already initialized: {err}");
        }
    });
}

/// Span wrapping everything done for one invocation.
#[must_use]
pub fn invocation_span(event_id: &EventId) -> Span {
    tracing::info_span!("invocation", event_id = %event_id)
}

//! yafaas-runtime - event bus から invocation を取り出して handler を実行する
//!
//! ```text
//! yafaas-runtime [FUNCTION_DIR] [HANDLER] --events-api <host:port>
//! ```

mod functions;

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use yafaas_core::app::{BuildError, ErrorRoute, FatalReason, RuntimeBuilder, Termination};
use yafaas_core::config::{ConfigError, DEFAULT_HANDLER, RuntimeConfig};
use yafaas_core::domain::HandlerError;
use yafaas_core::impls::HttpEventSource;
use yafaas_core::observability::{LogFormat, init_logging};
use yafaas_core::ports::EventSource;

#[derive(Debug, Parser)]
#[command(name = "yafaas-runtime", version, about = "Function runtime client for the yafaas event bus")]
struct Args {
    /// Directory containing the function code. `FUNCTION_DIR` takes
    /// precedence; defaults to the current directory.
    function_dir: Option<PathBuf>,

    /// Handler reference, `<module>.<export-path>`.
    #[arg(default_value = DEFAULT_HANDLER)]
    handler: String,

    /// Event bus address, `<host>:<port>`.
    #[arg(long, env = "EVENTS_API")]
    events_api: String,

    #[arg(long, env = "YAFAAS_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_format);

    let termination = tokio::select! {
        termination = run(args) => termination,
        name = shutdown_signal() => {
            tracing::info!("{name} Exiting...");
            Termination::Shutdown
        }
    };
    ExitCode::from(termination.exit_code())
}

async fn run(args: Args) -> Termination {
    let function_dir = resolve_function_dir(std::env::var_os("FUNCTION_DIR"), args.function_dir);
    let config = match RuntimeConfig::from_parts(
        &args.events_api,
        function_dir,
        Some(args.handler.as_str()),
    ) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Termination::Fatal(match err {
                ConfigError::Handler(_) => FatalReason::HandlerLoad,
                _ => FatalReason::RuntimeFault,
            });
        }
    };
    tracing::info!(
        "Executing '{}' in function directory '{}'",
        config.handler,
        config.function_dir.display()
    );

    let source: Arc<dyn EventSource> = match HttpEventSource::new(config.endpoint.base_url()) {
        Ok(source) => Arc::new(source),
        Err(err) => {
            tracing::error!(error = %err, "failed to create event bus client");
            return Termination::Fatal(FatalReason::RuntimeFault);
        }
    };

    if let Err(err) = std::env::set_current_dir(&config.function_dir) {
        let error = HandlerError::new(format!(
            "cannot enter function directory '{}': {err}",
            config.function_dir.display()
        ));
        return ErrorRoute::new()
            .report_runtime(source.as_ref(), error)
            .await;
    }

    let registry = match functions::registry() {
        Ok(registry) => registry,
        Err(err) => {
            tracing::error!(error = %err, "failed to register bundled modules");
            return Termination::Fatal(FatalReason::HandlerLoad);
        }
    };

    let built = RuntimeBuilder::new()
        .event_source(source)
        .loader(Arc::new(registry))
        .handler_ref(config.handler.to_string())
        .build();
    let mut executor = match built {
        Ok(executor) => executor,
        Err(BuildError::Load(err)) => {
            // invocation がまだ無いので event bus には送らない
            tracing::error!(kind = ?err.kind(), error = %err, "failed to load handler");
            return Termination::Fatal(FatalReason::HandlerLoad);
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to build runtime");
            return Termination::Fatal(FatalReason::RuntimeFault);
        }
    };

    executor.run().await
}

/// A non-empty `FUNCTION_DIR` wins over the positional argument.
fn resolve_function_dir(env: Option<OsString>, positional: Option<PathBuf>) -> Option<PathBuf> {
    env.filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or(positional)
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
        _ => {
            tracing::warn!("failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            tracing::warn!(error = %err, "failed to install signal handler");
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_positional_arguments() {
        let args = Args::try_parse_from(["yafaas-runtime", "--events-api", "127.0.0.1:9001"]).unwrap();
        assert_eq!(args.handler, "index.handler");
        assert_eq!(args.events_api, "127.0.0.1:9001");
    }

    #[test]
    fn positional_arguments_and_log_format() {
        let args = Args::try_parse_from([
            "yafaas-runtime",
            "/var/task",
            "app.main",
            "--events-api",
            "localhost:8080",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.function_dir, Some(PathBuf::from("/var/task")));
        assert_eq!(args.handler, "app.main");
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn function_dir_environment_overrides_positional() {
        let positional = Some(PathBuf::from("/var/task"));
        assert_eq!(
            resolve_function_dir(Some(OsString::from("/opt/fn")), positional.clone()),
            Some(PathBuf::from("/opt/fn"))
        );
        assert_eq!(
            resolve_function_dir(Some(OsString::new()), positional.clone()),
            positional
        );
        assert_eq!(resolve_function_dir(None, positional.clone()), positional);
        assert_eq!(resolve_function_dir(None, None), None);
    }

    #[tokio::test]
    async fn invalid_endpoint_is_fatal() {
        let args = Args::try_parse_from(["yafaas-runtime", ".", "index.handler", "--events-api", "nope"])
            .unwrap();
        assert_eq!(run(args).await, Termination::Fatal(FatalReason::RuntimeFault));
    }

    #[tokio::test]
    async fn bad_handler_reference_is_a_load_failure() {
        let args = Args::try_parse_from([
            "yafaas-runtime",
            ".",
            "index",
            "--events-api",
            "127.0.0.1:9001",
        ])
        .unwrap();
        assert_eq!(run(args).await, Termination::Fatal(FatalReason::HandlerLoad));
    }

    #[tokio::test]
    async fn unknown_export_is_a_load_failure() {
        let args = Args::try_parse_from([
            "yafaas-runtime",
            ".",
            "index.missing",
            "--events-api",
            "127.0.0.1:9001",
        ])
        .unwrap();
        assert_eq!(run(args).await, Termination::Fatal(FatalReason::HandlerLoad));
    }
}

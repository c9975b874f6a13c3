//! Tracing subscriber setup
//!
//! Console and rolling-file output share one formatting style taken from
//! [`LogSettings`]. `RUST_LOG` overrides the configured level.

use std::str::FromStr;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, format, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::domain::settings::LogSettings;

/// Keeps the non-blocking file writer alive. Logs buffered for the file are
/// flushed when it is dropped.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

fn level_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn rotation(settings: &LogSettings) -> Rotation {
    match settings.rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn styled<S, W>(
    settings: &LogSettings,
    writer: W,
) -> fmt::Layer<S, format::DefaultFields, format::Format, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_file(settings.show_file_line)
        .with_line_number(settings.show_file_line)
        .with_thread_ids(settings.show_thread_ids)
        .with_target(settings.show_target)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = settings
        .console_logging_enabled
        .then(|| styled(settings, std::io::stdout).with_ansi(settings.ansi_colors));

    let file_layer = if settings.file_logging_enabled {
        let appender = RollingFileAppender::new(
            rotation(settings),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(styled(settings, writer).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level: {}, file: {})",
        settings.level,
        settings.file_logging_enabled
    );

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parsing() {
        let mut settings = LogSettings::default();
        for (name, expected) in [
            ("Hourly", Rotation::HOURLY),
            ("minutely", Rotation::MINUTELY),
            ("never", Rotation::NEVER),
            ("weekly", Rotation::DAILY),
        ] {
            settings.rotation = name.to_string();
            assert_eq!(rotation(&settings), expected);
        }
    }

    #[test]
    fn test_file_logging_writes_to_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            file_logging_enabled: true,
            console_logging_enabled: false,
            log_dir: dir.path().display().to_string(),
            rotation: "never".to_string(),
            ..LogSettings::default()
        };

        // Another test in this binary may already own the global subscriber.
        if let Ok(guard) = init_logger(&settings) {
            drop(guard);
            assert!(dir.path().join(&settings.file_name_prefix).exists());
        }
    }
}

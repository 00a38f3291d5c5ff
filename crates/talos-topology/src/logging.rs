use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, Registry,
    layer::SubscriberExt as _,
    util::{SubscriberInitExt as _, TryInitError},
};

/// Number of rotated log files kept in the log directory.
const MAX_LOG_FILES: usize = 6;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "failed to initialize rolling file appender in {directory}",
        directory = directory.display()
    ))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with options from the environment variable given in `env`.
///
/// The variable holds an [`EnvFilter`] directive, for example `TALOS_TOPOLOGY_PREVIEWER_LOG=debug`.
/// If it is not set (or invalid), the maximum log level is INFO. Logs are written to stderr, so
/// they never mix with rendered output on stdout.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` to a directory path. The file
/// is written as JSON and rotated daily.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_layer = file_appender_directory
        .as_ref()
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log.json")
                .max_log_files(MAX_LOG_FILES)
                .build(directory)
                .context(InitRollingFileAppenderSnafu { directory })
        })
        .transpose()?
        .map(|appender| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(appender)
                .with_filter(env_filter(env))
        });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(env));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context(SetGlobalDefaultSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

fn env_filter(env: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env)
        .from_env_lossy()
}

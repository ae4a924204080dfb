use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file path
pub const LOG_FILE_ENV: &str = "HWINVENTORY_LOG_FILE";

/// When "true", the process id is added to the log file name
pub const LOG_UNIQUE_ENV: &str = "HWINVENTORY_LOG_UNIQUE";

/// When "true", logs are written as JSON
pub const LOG_JSON_ENV: &str = "HWINVENTORY_LOG_JSON";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());

        let file_path = env::var(LOG_FILE_ENV).ok().map(|path| {
            let path = PathBuf::from(path);
            if env::var(LOG_UNIQUE_ENV).unwrap_or_default() == "true" {
                unique_log_path(path, std::process::id())
            } else {
                path
            }
        });

        let json_format = env::var(LOG_JSON_ENV).unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// `inventory.log` -> `inventory.<pid>.log`
fn unique_log_path(mut path: PathBuf, pid: u32) -> PathBuf {
    if let Some(stem) = path.file_stem() {
        let stem = stem.to_string_lossy().into_owned();
        let unique = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if !ext.is_empty() => format!("{stem}.{pid}.{ext}"),
            _ => format!("{stem}.{pid}"),
        };
        path.set_file_name(unique);
    }
    path
}

/// Initialize the logging system based on configuration
///
/// Logs go to stderr (or a file) so stdout stays reserved for the inventory.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("warn"))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        // File + JSON format
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);

            subscriber.with(file_layer).init();
        }
        // File + human readable format
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(file_layer).init();
        }
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);

            subscriber.with(stderr_layer).init();
        }
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true);

            subscriber.with(stderr_layer).init();
        }
    }

    Ok(())
}

/// Log the duration of an operation as a structured event
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Performance timing"
        );
    };
}

use crate::socket::DEFAULT_SOCKET_PATH;
use clap::Parser;
use ohd_core::{DEFAULT_WINDOW_MINUTES, MAX_WINDOW_BUCKETS};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";

#[derive(Parser, Debug, Clone)]
#[command(name = "ohd-monitor", about = "Live terminal dashboard for an agent runtime")]
pub struct Args {
    /// Base URL of the task/file API; the realtime channel is served from the same host.
    #[arg(long, env = "OPENHANDS_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    #[arg(long, env = "OHD_SOCKET_PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket_path: String,
    /// Minutes shown in the activity chart.
    #[arg(long, default_value_t = DEFAULT_WINDOW_MINUTES)]
    pub window_minutes: usize,
    #[arg(long, env = "OHD_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub socket_path: String,
    pub window_minutes: usize,
    pub log_file: Option<PathBuf>,
    pub log_stdout: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        let api_url = if args.api_url.trim().is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            args.api_url.trim().to_string()
        };
        Self {
            api_url,
            socket_path: args.socket_path,
            window_minutes: args.window_minutes.clamp(1, MAX_WINDOW_BUCKETS),
            log_file: args.log_file,
            log_stdout: resolve_log_stdout(),
        }
    }
}

pub fn load_config() -> Config {
    Config::from_args(Args::parse())
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_log_stdout() -> bool {
    std::env::var("OHD_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

/// The dashboard owns the terminal, so logs go to a file when one is
/// configured and are otherwise discarded unless stdout is forced.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_stdout {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }
    if let Some(path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
            Err(err) => eprintln!("log_file_error: {err}"),
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::sink)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn args_fall_back_to_defaults() {
        let args = Args::try_parse_from(["ohd-monitor", "--api-url", "http://agents:9000/"]).unwrap();
        let config = Config::from_args(args);
        assert_eq!(config.api_url, "http://agents:9000/");
        assert_eq!(config.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(config.window_minutes, DEFAULT_WINDOW_MINUTES);
    }

    #[test]
    fn zero_window_is_clamped() {
        let args = Args::try_parse_from(["ohd-monitor", "--window-minutes", "0"]).unwrap();
        assert_eq!(Config::from_args(args).window_minutes, 1);
    }

    #[test]
    fn huge_window_is_capped_to_a_day() {
        let args = Args::try_parse_from(["ohd-monitor", "--window-minutes", "1000000"]).unwrap();
        assert_eq!(Config::from_args(args).window_minutes, MAX_WINDOW_BUCKETS);
    }

    #[test]
    fn log_file_is_created_on_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ohd-monitor.log");
        let args = Args::try_parse_from(["ohd-monitor"]).unwrap();
        let config = Config {
            log_file: Some(path.clone()),
            log_stdout: false,
            ..Config::from_args(args)
        };
        init_logging(&config);
        tracing::info!(event = "log_file_check");
        assert!(path.exists());
    }
}

use std::env;

/// Server configuration, resolved once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub db_path: String,
    /// Port for the tonic server; 0 disables the binary RPC transport.
    pub grpc_port: u16,
    /// Window within which a repeated idempotency key returns the
    /// original result instead of re-applying the send.
    pub dedup_window_secs: i64,
    /// Interval of the snooze-wake / retention sweep.
    pub snooze_sweep_secs: u64,
    /// Activity feed row cap; oldest entries are evicted past this.
    pub activity_max_rows: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: "data/mail.db".to_string(),
            grpc_port: 0,
            dedup_window_secs: 300,
            snooze_sweep_secs: 30,
            activity_max_rows: 10_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            db_path: env::var("DATABASE_PATH").unwrap_or(defaults.db_path),
            grpc_port: parse_env("GRPC_PORT", defaults.grpc_port),
            dedup_window_secs: parse_env("DEDUP_WINDOW_SECS", defaults.dedup_window_secs),
            snooze_sweep_secs: parse_env("SNOOZE_SWEEP_SECS", defaults.snooze_sweep_secs),
            activity_max_rows: parse_env("ACTIVITY_MAX_ROWS", defaults.activity_max_rows),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

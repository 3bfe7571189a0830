use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Tenderflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var overriding the data directory.
pub const DATA_DIR_ENV: &str = "TENDERFLOW_DATA_DIR";
/// Env var overriding the HTTP bind address.
pub const BIND_ENV: &str = "TENDERFLOW_BIND";

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Get the application data directory
/// `$TENDERFLOW_DATA_DIR` if set, else ~/Tenderflow/
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// SQLite database holding jobs and content records
pub fn database_path() -> PathBuf {
    app_data_dir().join("tenderflow.db")
}

/// AI provider settings file
pub fn ai_settings_path() -> PathBuf {
    app_data_dir().join("ai_settings.json")
}

/// HTTP bind address from `$TENDERFLOW_BIND`, falling back to loopback.
pub fn bind_addr() -> SocketAddr {
    let fallback = || {
        DEFAULT_BIND
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)))
    };
    match std::env::var(BIND_ENV) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "Invalid {BIND_ENV}, using {DEFAULT_BIND}");
            fallback()
        }),
        Err(_) => fallback(),
    }
}

/// Filter used when `RUST_LOG` is not set
pub fn default_log_filter() -> &'static str {
    "tenderflow_lib=info,tenderflow=info,tower_http=warn"
}

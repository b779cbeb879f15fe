//! Server configuration.
//!
//! Every flag can also be supplied through the environment.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "hearth-server")]
#[command(about = "Real-time room synchronization server for Hearth", long_about = None)]
pub struct Config {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "HEARTH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "HEARTH_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Redis URL for the cluster bus (in-process bus when unset)
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// PostgreSQL URL for the persistence store (in-memory store when unset)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of pooled database connections
    #[arg(long, env = "HEARTH_DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub db_max_connections: u32,

    /// Quiet period before a whiteboard change is saved, in milliseconds
    #[arg(long, env = "HEARTH_SAVE_DEBOUNCE_MS", default_value_t = 3000)]
    pub save_debounce_ms: u64,

    /// Capacity of each connection's outbound message queue
    #[arg(long, env = "HEARTH_OUTBOUND_QUEUE_CAPACITY", default_value_t = 256, value_parser = clap::value_parser!(u32).range(1..))]
    pub outbound_queue_capacity: u32,

    /// Default log level when RUST_LOG is not set
    #[arg(long, env = "HEARTH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn outbound_queue_capacity(&self) -> usize {
        self.outbound_queue_capacity as usize
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // テスト項目: 引数を省略した場合は既定値が使われる
        // given (前提条件):
        let args = ["hearth-server"];

        // when (操作):
        let config = Config::try_parse_from(args).unwrap();

        // then (期待する結果):
        assert_eq!(config.port, 8080);
        assert_eq!(config.save_debounce(), Duration::from_secs(3));
        assert_eq!(config.outbound_queue_capacity(), 256);
        assert_eq!(config.db_max_connections, 5);
    }

    #[test]
    fn test_flags_override_defaults() {
        // テスト項目: フラグで既定値を上書きできる
        // given (前提条件):
        let args = [
            "hearth-server",
            "--host",
            "0.0.0.0",
            "--port",
            "3000",
            "--save-debounce-ms",
            "500",
            "--redis-url",
            "redis://localhost:6379",
        ];

        // when (操作):
        let config = Config::try_parse_from(args).unwrap();

        // then (期待する結果):
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.save_debounce(), Duration::from_millis(500));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        // テスト項目: 送信キューの容量 0 は拒否される
        // given (前提条件):
        let args = ["hearth-server", "--outbound-queue-capacity", "0"];

        // when (操作):
        let result = Config::try_parse_from(args);

        // then (期待する結果):
        assert!(result.is_err());
    }
}

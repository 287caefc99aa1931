//! Environment-sourced defaults for [`crate::RedisStoreAdapter`], layered
//! under explicit [`crate::RedisStoreAdapter::with_max_batch_reads`]
//! overrides the same way [`ledger_core`]'s other adapters do.

use envconfig::Envconfig;

/// Connection and batching defaults read from `REDIS_*` environment
/// variables.
#[derive(Debug, Clone, Envconfig)]
pub struct Config {
    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub port: u16,

    #[envconfig(from = "REDIS_BATCH_SIZE", default = "500")]
    pub batch_size: usize,

    #[envconfig(from = "REDIS_MAX_BATCH_READS")]
    pub max_batch_reads: Option<u32>,
}

impl Config {
    /// Reads `REDIS_*` environment variables, falling back to defaults for
    /// any that are unset.
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    /// Builds a `redis://` connection URL from the host/port fields.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_usable_url() {
        let config = Config::init_from_hashmap(&std::collections::HashMap::new()).unwrap();
        assert_eq!(config.url(), "redis://localhost:6379");
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_batch_reads, None);
    }
}

//! Server configuration
//!
//! The server binary is the only place that reads process environment;
//! every crate below it receives configuration by value. Secrets (the
//! database password, the model-service credential) arrive through this
//! channel only.

use engram_core::EngramConfig;
use engram_storage::PgConfig;
use std::time::Duration;

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Store connection
    pub db: PgConfig,
    /// Model-service base URL (OpenAI-compatible)
    pub model_base_url: String,
    /// Optional model-service credential
    pub model_api_key: Option<String>,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Chat model identifier
    pub chat_model: String,
    /// Memory-core configuration
    pub engram: EngramConfig,
    /// Per-call deadline
    pub call_timeout: Duration,
    /// Default budget for get_relevant_context when the caller omits one
    pub context_default_budget: i32,
    /// Interval of the best-effort metrics flush job
    pub metrics_flush_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db: PgConfig::default(),
            model_base_url: "http://localhost:11434/v1".to_string(),
            model_api_key: None,
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "llama3.1".to_string(),
            engram: EngramConfig::default(),
            call_timeout: Duration::from_secs(30),
            context_default_budget: 8000,
            metrics_flush_interval: Duration::from_secs(30),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|value| value.parse().ok())
}

impl ApiConfig {
    /// Create configuration from environment variables, falling back to
    /// defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db = PgConfig {
            host: env_var("ENGRAM_DB_HOST").unwrap_or(defaults.db.host),
            port: env_parse("ENGRAM_DB_PORT").unwrap_or(defaults.db.port),
            dbname: env_var("ENGRAM_DB_NAME").unwrap_or(defaults.db.dbname),
            user: env_var("ENGRAM_DB_USER").unwrap_or(defaults.db.user),
            password: env_var("ENGRAM_DB_PASSWORD").unwrap_or(defaults.db.password),
            max_size: env_parse("ENGRAM_DB_POOL_SIZE").unwrap_or(defaults.db.max_size),
            timeout: Duration::from_secs(
                env_parse("ENGRAM_DB_TIMEOUT").unwrap_or(defaults.db.timeout.as_secs()),
            ),
        };

        let mut engram = EngramConfig::default();
        if let Some(dimension) = env_parse("ENGRAM_DIMENSION") {
            engram.dimension = dimension;
        }
        if let Some(capacity) = env_parse("ENGRAM_WORKING_MEMORY_CAPACITY") {
            engram.working_memory_capacity = capacity;
        }
        if let Some(floor) = env_parse("ENGRAM_RECALL_SIMILARITY") {
            engram.recall_similarity_floor = floor;
        }
        if let Some(floor) = env_parse("ENGRAM_DEDUP_SIMILARITY") {
            engram.dedup_similarity_floor = floor;
        }
        if let Some(backend) = env_var("ENGRAM_VECTOR_BACKEND") {
            if let Ok(parsed) = serde_json::from_value(serde_json::Value::String(backend)) {
                engram.vector_backend = parsed;
            }
        }

        Self {
            host: env_var("ENGRAM_API_BIND").unwrap_or(defaults.host),
            port: env_parse("PORT")
                .or_else(|| env_parse("ENGRAM_API_PORT"))
                .unwrap_or(defaults.port),
            db,
            model_base_url: env_var("ENGRAM_MODEL_URL").unwrap_or(defaults.model_base_url),
            model_api_key: env_var("ENGRAM_MODEL_API_KEY"),
            embedding_model: env_var("ENGRAM_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            chat_model: env_var("ENGRAM_CHAT_MODEL").unwrap_or(defaults.chat_model),
            engram,
            call_timeout: Duration::from_secs(
                env_parse("ENGRAM_CALL_TIMEOUT").unwrap_or(defaults.call_timeout.as_secs()),
            ),
            context_default_budget: env_parse("ENGRAM_CONTEXT_DEFAULT_BUDGET")
                .unwrap_or(defaults.context_default_budget),
            metrics_flush_interval: Duration::from_secs(
                env_parse("ENGRAM_METRICS_FLUSH_INTERVAL")
                    .unwrap_or(defaults.metrics_flush_interval.as_secs()),
            ),
        }
    }
}

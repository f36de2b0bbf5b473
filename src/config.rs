use std::path::Path;

use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct SeederConfig {
    /// MongoDB connection string
    pub mongodb_uri: String,

    /// Database to reconcile when neither the plan nor the command line names one
    pub database: String,

    /// Path to the plan file
    pub plan: String,

    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub max_idle_time_ms: u64,
    pub connect_timeout_ms: u64,

    /// Jaeger agent address (`host:port`); trace export is off when unset
    pub jaeger_agent_endpoint: Option<String>,

    pub service_name: String,
}

const EMPTY_CONFIG: &str = r#"### seeder configuration file

### MongoDB connection
# mongodb_uri = "mongodb://mongo:27017"
# database = "course_service"

### plan to apply
# plan = "fixtures/course_service.json"

### connection pool
# max_pool_size = 20
# min_pool_size = 0
# max_idle_time_ms = 300000
# connect_timeout_ms = 10000

### tracing export
# jaeger_agent_endpoint = "localhost:6831"
# service_name = "seeder"
"#;

impl SeederConfig {
    /// Build the configuration from defaults, an optional TOML file and
    /// `SEEDER_*` environment variables, later sources winning.
    ///
    /// E.g., `SEEDER_DATABASE=course_service_test seeder run` targets a
    /// different database.
    pub fn load(path: Option<&Path>) -> Result<SeederConfig> {
        let mut builder = Self::defaults()?;

        if let Some(path) = path {
            if !path.exists() {
                std::fs::write(path, EMPTY_CONFIG)
                    .map_err(|e| anyhow!("Unable to create config file {}: {}", path.display(), e))?;
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(Environment::with_prefix("SEEDER").try_parsing(true));

        builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?
            .try_deserialize::<SeederConfig>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
        Config::builder()
            .set_default("mongodb_uri", "mongodb://mongo:27017")?
            .set_default("database", "course_service")?
            .set_default("plan", "fixtures/course_service.json")?
            .set_default("max_pool_size", 20_i64)?
            .set_default("min_pool_size", 0_i64)?
            .set_default("max_idle_time_ms", 300_000_i64)?
            .set_default("connect_timeout_ms", 10_000_i64)?
            .set_default("service_name", "seeder")
            .map_err(|e| anyhow!("Failed to set configuration defaults: {}", e))
    }

    /// Connection string with any password masked, for logging
    pub fn redacted_uri(&self) -> String {
        redact(&self.mongodb_uri)
    }
}

fn redact(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<redacted>".to_string();
            }
            url.to_string()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}

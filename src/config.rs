use clap::Parser;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::prompt;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "remote" or "ollama"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    // Low temperature keeps SQL generation conservative
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            api_key: None,
            api_url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// File holding the schema description handed to the model.
    #[serde(default = "default_schema_file")]
    pub schema_file: String,
    #[serde(default = "default_example_queries")]
    pub example_queries: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            web: WebConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            schema_file: default_schema_file(),
            example_queries: default_example_queries(),
        }
    }
}

fn default_connection_string() -> String {
    "text2sql.db".to_string()
}

fn default_pool_size() -> usize {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_backend() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "sqlcoder".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> usize {
    512
}

fn default_max_attempts() -> usize {
    3
}

fn default_history_limit() -> usize {
    prompt::DEFAULT_HISTORY_LIMIT
}

fn default_schema_file() -> String {
    "schema.sql".to_string()
}

fn default_example_queries() -> Vec<String> {
    vec![
        "List all users".to_string(),
        "Total cost per billing month".to_string(),
        "Top 5 records by cost".to_string(),
    ]
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// File holding the schema description
    #[arg(long)]
    pub schema_file: Option<String>,

    /// Convert a single question and exit instead of starting the server
    #[arg(short, long)]
    pub question: Option<String>,

    /// With --question, also execute the generated SQL and print the rows
    #[arg(long)]
    pub execute: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/text2sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Command line args win over the file
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(schema_file) = &args.schema_file {
            config.schema_file = schema_file.clone();
        }

        Ok(config)
    }
}

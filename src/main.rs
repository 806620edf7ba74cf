use clap::Parser;
use r2d2::Pool;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use text2sql::config::{AppConfig, CliArgs};
use text2sql::db::{DuckDbConnectionManager, DuckDbExecutor, QueryExecutor};
use text2sql::llm::{GeneratorFactory, LlmManager};
use text2sql::service::Converter;
use text2sql::util::logging::init_tracing;
use text2sql::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Load the schema description handed to the model
    let schema_text = if Path::new(&config.schema_file).exists() {
        std::fs::read_to_string(&config.schema_file)?
    } else {
        warn!(
            "Schema file {} not found, continuing with an empty schema",
            config.schema_file
        );
        String::new()
    };

    info!("Initializing DuckDB connection pool");
    let db_manager = DuckDbConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;
    let executor: Arc<dyn QueryExecutor> = Arc::new(DuckDbExecutor::new(pool));

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    // One-shot mode: convert (and optionally execute) a single question
    if let Some(question) = &args.question {
        let converter = Converter::new(llm_manager.create()?);
        let sql = converter
            .convert(&schema_text, question, config.llm.max_tokens)
            .await?;

        println!("{}", sql);

        if args.execute {
            let result = executor.execute(&sql).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        return Ok(());
    }

    // Create application state and start the web server
    let app_state = Arc::new(AppState::new(
        config.clone(),
        schema_text,
        llm_manager,
        executor,
    ));

    info!(
        "Starting text2sql server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}

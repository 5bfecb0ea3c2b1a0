use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::Result;
use crate::chat::{NoopToolRunner, OwnerOnlyGuard, StreamCoordinator};
use crate::config::Config;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::sqlite::Database;
use crate::embeddings::client::EmbeddingClient;
use crate::generation::GenerationClient;
use crate::indexer::TranscriptIndexer;
use crate::server::{self, AppState};

/// Construct every shared handle once and wire them into the request state.
async fn build_state(config: &Config) -> Result<AppState> {
    let database = Database::new(config.database_path()).await?;
    let vector_store = Arc::new(Mutex::new(
        VectorStore::new(
            config.vector_database_path(),
            config.embedding.embedding_dimension as usize,
        )
        .await?,
    ));
    let embedding_client = EmbeddingClient::new(&config.embedding)?;
    let generation_client = GenerationClient::new(&config.generation)?;

    let indexer = Arc::new(TranscriptIndexer::new(
        database.clone(),
        Arc::clone(&vector_store),
        embedding_client,
        config.chunking.clone(),
    ));
    let coordinator = StreamCoordinator::new(
        database.clone(),
        generation_client,
        config.context.clone(),
        config.generation.clone(),
        Arc::new(OwnerOnlyGuard),
        Arc::new(NoopToolRunner),
    );

    Ok(AppState {
        database,
        vector_store,
        indexer,
        coordinator,
    })
}

/// Run the HTTP server until the process is stopped.
pub async fn serve(bind: Option<String>) -> Result<()> {
    let mut config = Config::load_default()?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    info!(base_dir = %config.base_dir.display(), "starting lectern");
    let state = build_state(&config).await?;
    server::serve(&config, state).await
}

/// Print connectivity and row counts for both databases.
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().unwrap_or_default();

    println!("Lectern Status");
    println!("{}", "=".repeat(40));

    match Database::new(config.database_path()).await {
        Ok(database) => {
            println!("SQLite: connected ({})", config.database_path().display());
            println!("  lectures: {}", database.count_lectures().await?);
            println!("  messages: {}", database.count_messages().await?);
        }
        Err(e) => println!("SQLite: unavailable - {e}"),
    }

    match VectorStore::new(
        config.vector_database_path(),
        config.embedding.embedding_dimension as usize,
    )
    .await
    {
        Ok(store) => {
            println!(
                "Vector store: connected ({})",
                config.vector_database_path().display()
            );
            println!("  embeddings: {}", store.count_embeddings().await?);
        }
        Err(e) => println!("Vector store: unavailable - {e}"),
    }

    println!(
        "Embedding service: {}://{}:{} ({})",
        config.embedding.protocol, config.embedding.host, config.embedding.port,
        config.embedding.model
    );
    println!(
        "Generation service: {}://{}:{} ({})",
        config.generation.protocol, config.generation.host, config.generation.port,
        config.generation.model
    );

    Ok(())
}

/// Print where the configuration lives.
pub fn show_config_path() -> Result<()> {
    let config = Config::load_default()?;
    println!("{}", config.base_dir.join("config.toml").display());
    Ok(())
}

/// Print the active configuration as TOML.
pub fn show_config() -> Result<()> {
    let config = Config::load_default()?;
    let rendered =
        toml::to_string_pretty(&config).map_err(|e| crate::LecternError::Config(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{connect_vector_index, DbAdapter, FileTextExtractor, OllamaAdapter, OllamaEmbedder},
    config::Config,
    error::ApiError,
    web::{self, rest::ApiDoc, state::AppState},
};
use axum::http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_core::{
    ConversationEngine, DocumentIndexer, ExerciseService, FeedbackComposer, GenerationConfig,
    LanguageModelClient, TextChunker,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let ollama = Arc::new(OllamaAdapter::new(
        config.ollama_base_url(),
        config.ollama_model.clone(),
        config.ollama_temperature,
        config.ollama_max_tokens,
        config.ollama_timeout,
    )?);
    let llm = LanguageModelClient::new(ollama);
    if !llm.health_check().await {
        warn!(
            "Ollama at {} is not ready with model {}; answers will be degraded until it is",
            config.ollama_base_url(),
            config.ollama_model
        );
    }

    let embedder = Arc::new(OllamaEmbedder::new(
        config.ollama_base_url(),
        config.embedding_model.clone(),
        config.ollama_timeout,
    )?);
    let index = connect_vector_index(&config.chroma_settings(), embedder).await;
    let extractor = Arc::new(FileTextExtractor::new(config.upload_dir.clone()));

    // --- 4. Build the Core Services ---
    let generation_config = GenerationConfig {
        backoff: config.generation_backoff,
        ..GenerationConfig::default()
    };
    let indexer = Arc::new(DocumentIndexer::new(
        db_adapter.clone(),
        index.clone(),
        extractor,
        TextChunker::default(),
    ));
    let conversation = ConversationEngine::new(db_adapter.clone(), index.clone(), llm.clone());
    let exercises = Arc::new(ExerciseService::new(
        db_adapter.clone(),
        index,
        llm.clone(),
        generation_config,
        TextChunker::default(),
    ));
    let feedback = Arc::new(FeedbackComposer::new(db_adapter.clone(), llm.clone()));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        llm,
        conversation,
        indexer,
        exercises,
        feedback,
    });

    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(web::middleware::USER_ID_HEADER)]);

    // --- 6. Create the Web Router ---
    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(web::router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

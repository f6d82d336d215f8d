//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DocumentExtractor, HtmlRenderAdapter, OpenAiEmbeddingAdapter, OpenAiGenerationAdapter,
    },
    config::Config,
    engine::{store::SessionStore, EngineSettings, SessionEngine},
    error::ApiError,
    web::{
        chat_handler, create_session_handler, delete_session_handler, download_artifact_handler,
        generate_notes_handler, generate_practice_test_handler, get_session_handler,
        health_handler, list_sessions_handler, remove_document_handler, rename_session_handler,
        rest::ApiDoc, upload_documents_handler, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
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

    // --- 2. Prepare the Session Directory Tree ---
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = SessionStore::new(&config.data_dir);

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let extractor = Arc::new(DocumentExtractor::new());
    let embedder = Arc::new(OpenAiEmbeddingAdapter::new(
        openai_client.clone(),
        config.embedding_model.clone(),
    ));
    let generator = Arc::new(OpenAiGenerationAdapter::new(
        openai_client.clone(),
        config.qa_model.clone(),
    ));
    let renderer = Arc::new(HtmlRenderAdapter::new());

    // --- 4. Build the Engine and Shared AppState ---
    let engine = Arc::new(SessionEngine::new(
        store,
        extractor,
        embedder,
        generator,
        renderer,
        EngineSettings {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            top_k: config.top_k,
            max_artifact_chars: config.max_artifact_chars,
            call_timeout: config.call_timeout,
        },
    ));
    let app_state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    let api_router = Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/{user_id}", get(list_sessions_handler))
        .route(
            "/sessions/{user_id}/{session_id}",
            get(get_session_handler)
                .put(rename_session_handler)
                .delete(delete_session_handler),
        )
        .route(
            "/sessions/{user_id}/{session_id}/documents",
            post(upload_documents_handler),
        )
        .route(
            "/sessions/{user_id}/{session_id}/documents/{document_id}",
            delete(remove_document_handler),
        )
        .route("/sessions/{user_id}/{session_id}/chat", post(chat_handler))
        .route(
            "/sessions/{user_id}/{session_id}/notes",
            post(generate_notes_handler),
        )
        .route(
            "/sessions/{user_id}/{session_id}/practice-test",
            post(generate_practice_test_handler),
        )
        .route(
            "/sessions/{user_id}/{session_id}/artifacts/{filename}",
            get(download_artifact_handler),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

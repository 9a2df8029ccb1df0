//! Voice tutor - real-time voice and vision tutoring sessions
//!
//! A Rust backend that listens to the user, watches their screen and talks
//! them through desktop software, driven by a session state machine.

mod api;
mod config;
mod conversation;
mod llm;
mod runtime;
mod speech;
mod state_machine;
mod system_prompt;
mod tools;
mod tutorial;

use api::{create_router, AppState};
use config::AppConfig;
use llm::LlmService;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_tutor=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();
    if let Err(e) = config.validate() {
        // Sessions are refused until this is fixed; the server still answers /health
        tracing::warn!(error = %e, "Configuration incomplete");
    }

    let llm = llm::service_from_config(&config.llm);
    match &llm {
        Some(service) => tracing::info!(model = %service.model_id(), "LLM service initialized"),
        None => tracing::warn!("No LLM API key configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY."),
    }

    let port = config.port;
    let state = AppState::new(config, llm);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Voice tutor listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

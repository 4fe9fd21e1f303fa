use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapter;
mod app;

#[derive(Parser)]
#[command(
    name = "strato-local",
    version,
    about = "Local development server that fronts a Strato pipeline"
)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strato_local=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let pipeline = Arc::new(app::build_pipeline());

    let router = Router::new()
        .fallback(adapter::serve)
        // Browser clients hit this directly during development.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(
        journal_table = %strato_journal::table_name(),
        "strato-local listening on {addr}"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, router).await.expect("server error");
}

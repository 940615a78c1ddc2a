//! AWS Lambda entry point for comment-sync
//!
//! Deploy with `cargo lambda build --release --features lambda`.

use comment_sync::lambda::handler;
use lambda_runtime::{Error as LambdaError, service_fn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("comment-sync Lambda starting...");
    lambda_runtime::run(service_fn(handler)).await
}

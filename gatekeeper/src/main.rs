//! CI Gatekeeper web server.
//!
//! Serves the request authorizer and the GitHub webhook endpoint. Every
//! request is handled independently; nothing is cached between requests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatekeeper::aws::{AwsJsonClient, CodeBuildClient, SsmParameterStore};
use gatekeeper::github::GitHubMeta;
use gatekeeper::web::router;
use gatekeeper::{AddressValidator, AppState, BuildTrigger, Config, Dispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("gatekeeper_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        region = %config.aws.region,
        token_parameter = %config.token_parameter,
        github_meta_url = %config.github_meta_url,
        codebuild_project = ?config.codebuild_project_name,
        webhook_secret_configured = config.github_webhook_secret.is_some(),
        "config_loaded"
    );

    let aws = AwsJsonClient::new(&config.aws, config.request_timeout())
        .context("Failed to build AWS client")?;
    info!(
        credential_sources = ?aws.credential_sources(),
        endpoint_override = ?config.aws.endpoint_url,
        "aws_client_ready"
    );
    let meta = GitHubMeta::new(config.github_meta_url.clone(), config.request_timeout())
        .context("Failed to build GitHub client")?;

    let validator = AddressValidator::new(
        Arc::new(SsmParameterStore::new(aws.clone())),
        Arc::new(meta),
        config.token_parameter.clone(),
    );

    let dispatcher = match config.build_settings() {
        Ok(settings) => {
            let trigger = BuildTrigger::new(&settings, Arc::new(CodeBuildClient::new(aws)));
            Some(Dispatcher::new(trigger))
        }
        Err(e) => {
            warn!(error = %e, "dispatch_disabled");
            None
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, validator, dispatcher));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("gatekeeper_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}

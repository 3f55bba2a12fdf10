use anyhow::{Context, Result};
use axum::Router;
use kube::{
    Client,
    api::{Api, DynamicObject},
    core::{ApiResource, GroupVersionKind},
};
use std::{future::IntoFuture, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, LogFormat};
use services::{
    emptier::BucketEmptier,
    guard_store::KubeGuardStore,
    reconciler::Reconciler,
    storage_service::S3ObjectStore,
    watcher::{BucketWatcher, Readiness},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cfg.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    tracing::info!("Starting bucket-reaper with config: {:?}", cfg);

    // --- Control-plane client (in-cluster config, else kubeconfig) ---
    let client = Client::try_default()
        .await
        .context("creating Kubernetes client")?;
    let gvk = GroupVersionKind::gvk(&cfg.group, &cfg.api_version, &cfg.kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, &cfg.plural);
    let api: Api<DynamicObject> = match cfg.namespace.as_deref() {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
        None => Api::all_with(client.clone(), &resource),
    };
    tracing::info!(
        "Watching {}/{} {} in {}",
        cfg.group,
        cfg.api_version,
        cfg.plural,
        cfg.namespace.as_deref().unwrap_or("all namespaces")
    );

    // --- Storage client ---
    let s3 = s3_client(&cfg).await;

    // --- Initialize core services ---
    let emptier = BucketEmptier::new(Arc::new(S3ObjectStore::new(s3)), cfg.page_size);
    let guards = Arc::new(KubeGuardStore::new(client, resource));
    let reconciler = Arc::new(Reconciler::new(emptier, guards, cfg.guard_marker()));
    tracing::info!("Guarding deletions with {:?}", reconciler.marker());

    let readiness = Readiness::default();
    let watcher = BucketWatcher::new(
        api,
        reconciler,
        readiness.clone(),
        cfg.resync,
        cfg.concurrency,
    );

    // --- Shutdown signal ---
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    // --- Probe server ---
    let app: Router = routes::routes::routes().with_state(readiness);
    let listener = bind(&cfg).await?;
    tracing::info!("Probes listening on http://{}", listener.local_addr()?);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();

    let (served, ()) = tokio::join!(server, watcher.run(cancel.clone()));
    served.context("probe server failed")?;

    tracing::info!("bucket-reaper stopped");
    Ok(())
}

/// Build the S3 client from the default AWS chain plus any overrides.
async fn s3_client(cfg: &AppConfig) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &cfg.s3_region {
        loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &cfg.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(cfg.s3_path_style)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Bind the probe listener, falling back to loopback when a wildcard bind is refused.
async fn bind(cfg: &AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            Ok(TcpListener::bind(&fallback_addr).await?)
        }
        Err(err) => Err(err).with_context(|| format!("binding probe server to {}", addr)),
    }
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown requested; abandoning in-flight work");
    cancel.cancel();
}

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod database;
pub mod error;
pub mod media_routes;
pub mod path_guard;
pub mod reconcile;
pub mod scanner;
pub mod structs;
pub mod upload_routes;
pub mod upload_store;
pub mod url_canon;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::signal;
use tower_http::{
    classify::ServerErrorsFailureClass, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog::postgres::PgCatalogStore;
use catalog::MediaCatalog;
use classifier::Category;
use config::Config;
use database::AppState;
use path_guard::PathGuard;
use reconcile::ReconciliationEngine;
use upload_store::UploadStore;
use url_canon::UrlCanonicalizer;

/// Multipart framing and the `addToLibrary` field on top of the file bytes.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        // Plain environment variables are enough; .env is a convenience.
        eprintln!("no .env file loaded: {err}");
    }

    let config = Config::from_env().expect("Invalid configuration");

    let _guard = config.sentry_url.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: 0.2,
                max_breadcrumbs: 50,
                send_default_pii: false,
                ..Default::default()
            },
        ))
    });

    // Enable tracing.
    let env_filter = if cfg!(debug_assertions) {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "{}=debug,tower_http=debug,axum=trace",
                env!("CARGO_CRATE_NAME")
            )
            .into()
        })
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "{}=info,tower_http=info,axum=info",
                env!("CARGO_CRATE_NAME")
            )
            .into()
        })
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let guard = PathGuard::new(&config.public_dir);
    for category in Category::ALL {
        let dir = guard.uploads_dir().join(category.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .unwrap_or_else(|err| panic!("Failed to create {}: {err}", dir.display()));
    }

    let pool = Arc::new(
        database::establish_pool_connection(&config)
            .await
            .expect("Failed to establish database connection pool"),
    );

    let store = PgCatalogStore::new(pool);
    store
        .initialize_schema()
        .await
        .expect("Failed to create the media table");

    let canon = UrlCanonicalizer::new(&config.proxy_prefix);
    let catalog = Arc::new(MediaCatalog::new(
        Arc::new(store),
        canon.clone(),
        guard.clone(),
        config.catalog_query_timeout,
    ));

    match catalog.migrate_canonical_urls().await {
        Ok(0) => tracing::debug!("all catalog urls already canonical"),
        Ok(count) => tracing::info!(count, "canonicalised stored catalog urls"),
        Err(err) => tracing::warn!(error = %err, "catalog url migration failed, continuing"),
    }

    let uploads = UploadStore::new(guard, canon);
    let uploads_dir = uploads.uploads_dir().to_path_buf();
    let state = Arc::new(AppState {
        reconciler: ReconciliationEngine::new(catalog.clone(), &uploads_dir),
        catalog,
        uploads,
        file_base_url: config.file_base_url.clone(),
        max_upload_file_size: config.max_upload_file_size,
        max_upload_files: config.max_upload_files,
    });

    let body_limit = config
        .max_upload_file_size
        .saturating_mul(config.max_upload_files)
        .saturating_add(MULTIPART_OVERHEAD);

    let app = Router::new()
        .merge(upload_routes::routes())
        .nest("/media", media_routes::routes())
        .with_state(state)
        .nest_service("/uploads", ServeDir::new(&uploads_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer((
            TraceLayer::new_for_http().on_failure(
                |error: ServerErrorsFailureClass, latency: std::time::Duration, _span: &tracing::Span| {
                    match &error {
                        ServerErrorsFailureClass::StatusCode(code) => {
                            // Handlers report their own errors; anything here slipped past them.
                            if code.is_server_error() {
                                sentry::with_scope(
                                    |scope| {
                                        scope.set_fingerprint(Some(&["unhandled_server_error", code.as_str()]));
                                        scope.set_tag("error_type", "unhandled_5xx");
                                        scope.set_tag("status_code", code.as_str());
                                    },
                                    || {
                                        sentry::capture_message(
                                            &format!(
                                                "UNHANDLED SERVER ERROR: {code} latency={}ms",
                                                latency.as_millis()
                                            ),
                                            sentry::Level::Error,
                                        );
                                    },
                                );
                                tracing::error!(
                                    status = %code,
                                    latency_ms = %latency.as_millis(),
                                    "Unhandled server error - check error handling"
                                );
                            }
                        }
                        ServerErrorsFailureClass::Error(msg) => {
                            tracing::warn!(
                                error = %msg,
                                latency_ms = %latency.as_millis(),
                                "Connection/protocol issue"
                            );
                        }
                    }
                },
            ),
            CorsLayer::permissive(),
        ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|err| panic!("Failed to bind {}: {err}", config.bind_addr));
    tracing::info!(
        addr = %config.bind_addr,
        public_dir = %config.public_dir.display(),
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

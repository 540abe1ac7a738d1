use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_check, list_status, run_check, service_alerts, service_checks, service_status,
    service_uptime, AppState,
};
use super::ws::status_feed;
use crate::config::{Config, ConfigError};
use crate::hub::StatusHub;
use crate::monitor::{Prober, Scheduler};
use crate::source::{FileServiceSource, SharedSource};
use crate::storage::{MemoryStore, SharedStore};

/// CORS policy for `origins`; a `*` entry allows any origin
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                    key: "UPWATCH_CORS_ORIGINS",
                    value: origin.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any))
}

/// Build the application router
pub fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Live feed
        .route("/ws/status", get(status_feed))
        // Status and history
        .route("/api/v1/status", get(list_status))
        .route("/api/v1/services/:id/status", get(service_status))
        .route("/api/v1/services/:id/checks", get(service_checks))
        .route("/api/v1/services/:id/alerts", get(service_alerts))
        .route("/api/v1/services/:id/uptime", get(service_uptime))
        // On-demand check
        .route("/api/v1/services/:id/check", post(run_check))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Open the store and service source selected by `config`
async fn open_backends(
    config: &Config,
) -> Result<(SharedStore, SharedSource), Box<dyn std::error::Error>> {
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = &config.database_url {
            let pg = Arc::new(
                crate::storage::PgStore::connect(url, config.db_max_connections).await?,
            );
            pg.migrate().await?;
            if config.services_file.is_some() {
                tracing::warn!("UPWATCH_SERVICES_FILE ignored, services are read from the database");
            }
            tracing::info!("Using Postgres store");
            let store: SharedStore = pg.clone();
            let source: SharedSource = pg;
            return Ok((store, source));
        }
    }

    #[cfg(not(feature = "postgres"))]
    {
        if config.database_url.is_some() {
            tracing::warn!("DATABASE_URL set but built without the postgres feature, using in-memory store");
        }
    }

    let source: SharedSource = match &config.services_file {
        Some(path) => Arc::new(FileServiceSource::open(path).await?),
        None => {
            tracing::warn!("No UPWATCH_SERVICES_FILE set, no services will be monitored");
            Arc::new(FileServiceSource::from_services(Vec::new()))
        }
    };
    tracing::info!("Using in-memory store");
    let store: SharedStore = Arc::new(MemoryStore::new());
    Ok((store, source))
}

/// Run the monitor and its HTTP server until Ctrl+C
pub async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let cors = cors_layer(&config.cors_origins)?;
    let (store, source) = open_backends(&config).await?;

    let shutdown = CancellationToken::new();
    let in_flight = TaskTracker::new();

    // Live feed
    let hub = StatusHub::new(config.hub_capacity, config.subscriber_buffer);
    let hub_handle = hub.handle();
    let hub_task = hub.start(shutdown.clone());

    // Scheduler
    let prober = Arc::new(
        Prober::new(Arc::clone(&store), hub_handle.clone())
            .with_default_timeout(config.default_timeout),
    );
    let scheduler_task = Scheduler::new(Arc::clone(&source), Arc::clone(&prober))
        .with_tick(config.tick)
        .with_fallback_interval(config.fallback_interval)
        .with_tracker(in_flight.clone())
        .start(shutdown.clone());

    let state = Arc::new(AppState {
        store,
        source,
        prober,
        hub: hub_handle,
    });
    let app = build_router(state, cors);

    let addr: SocketAddr = config.bind_addr().parse()?;
    tracing::info!("Starting upwatch on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Server may also have stopped on its own
    shutdown.cancel();
    let _ = scheduler_task.await;
    let _ = hub_task.await;

    in_flight.close();
    if tokio::time::timeout(config.shutdown_grace, in_flight.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = in_flight.len(),
            "Gave up waiting for in-flight checks"
        );
    }

    tracing::info!("upwatch stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
            }
        }
        _ = shutdown.cancelled() => {}
    }

    tracing::info!("Shutdown signal received, stopping scheduler and live feed...");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCheck, Service};
    use crate::monitor::{apply_transition, Observation};
    use crate::storage::Store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::util::ServiceExt;
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestApp {
        router: Router,
        store: MemoryStore,
        shutdown: CancellationToken,
    }

    fn create_test_app(services: Vec<Service>) -> TestApp {
        let store = MemoryStore::new();
        let shared: SharedStore = Arc::new(store.clone());
        let source: SharedSource = Arc::new(FileServiceSource::from_services(services));
        let shutdown = CancellationToken::new();
        let hub = StatusHub::new(16, 16);
        let handle = hub.handle();
        hub.start(shutdown.clone());

        let state = Arc::new(AppState {
            store: Arc::clone(&shared),
            source,
            prober: Arc::new(Prober::new(shared, handle.clone())),
            hub: handle,
        });

        let origins = vec!["http://localhost:3000".to_string()];
        TestApp {
            router: build_router(state, cors_layer(&origins).unwrap()),
            store,
            shutdown,
        }
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn record(store: &MemoryStore, service_id: i64, is_up: bool, response_time_ms: i64) {
        let status_code = if is_up { 200 } else { 500 };
        store
            .append_check(NewCheck {
                service_id,
                status_code,
                response_time_ms,
                is_up,
                error: None,
                checked_at: Utc::now(),
            })
            .await
            .unwrap();
        apply_transition(
            store,
            Observation {
                service_id,
                is_up,
                status_code,
                response_time_ms,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app(vec![]);
        let (status, body) = get_json(&app.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origins_only() {
        let app = create_test_app(vec![]);

        let allow_origin = |origin: &'static str| {
            let router = app.router.clone();
            async move {
                let response = router
                    .oneshot(
                        Request::builder()
                            .uri("/health")
                            .header("origin", origin)
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                response
                    .headers()
                    .get("access-control-allow-origin")
                    .map(|v| v.to_str().unwrap().to_string())
            }
        };

        assert_eq!(
            allow_origin("http://localhost:3000").await.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(allow_origin("https://evil.example").await, None);

        app.shutdown.cancel();
    }

    #[test]
    fn test_cors_layer_rejects_bad_origin() {
        assert!(cors_layer(&["*".to_string()]).is_ok());
        assert!(cors_layer(&["http://ok.example".to_string()]).is_ok());
        let err = cors_layer(&["bad\norigin".to_string()]).unwrap_err();
        assert!(err.to_string().contains("UPWATCH_CORS_ORIGINS"));
    }

    #[tokio::test]
    async fn test_status_list_includes_unchecked_services() {
        let app = create_test_app(vec![
            Service::new(1, "http://b").with_name("beta"),
            Service::new(2, "http://a").with_name("alpha"),
        ]);
        record(&app.store, 1, false, 40).await;

        let (status, body) = get_json(&app.router, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);

        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        // Sorted by name
        assert_eq!(rows[0]["name"], "alpha");
        assert_eq!(rows[0]["is_up"], false);
        assert_eq!(rows[0]["status_code"], 0);
        assert!(rows[0]["last_checked_at"].is_null());
        assert_eq!(rows[1]["name"], "beta");
        assert_eq!(rows[1]["status_code"], 500);
        assert_eq!(rows[1]["response_time"], 40);
        assert!(rows[1]["last_checked_at"].is_string());

        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let app = create_test_app(vec![Service::new(1, "http://a")]);

        for uri in [
            "/api/v1/services/9/status",
            "/api/v1/services/9/checks",
            "/api/v1/services/9/alerts",
            "/api/v1/services/9/uptime",
        ] {
            let (status, body) = get_json(&app.router, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert!(body["error"].is_string());
        }

        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_history_and_uptime() {
        let app = create_test_app(vec![Service::new(1, "http://a")]);
        record(&app.store, 1, true, 100).await;
        record(&app.store, 1, false, 300).await;
        record(&app.store, 1, true, 200).await;
        record(&app.store, 1, true, 200).await;

        let (_, checks) = get_json(&app.router, "/api/v1/services/1/checks?limit=2").await;
        assert_eq!(checks.as_array().unwrap().len(), 2);

        let (_, alerts) = get_json(&app.router, "/api/v1/services/1/alerts").await;
        let kinds: Vec<_> = alerts
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["RECOVERED", "DOWN", "RECOVERED"]);

        let (status, uptime) = get_json(&app.router, "/api/v1/services/1/uptime").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(uptime["total_checks"], 4);
        assert_eq!(uptime["up_checks"], 3);
        assert_eq!(uptime["uptime_percent"], 75.0);
        assert_eq!(uptime["avg_response_time"], 200.0);

        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_check_history_window_and_limit() {
        let app = create_test_app(vec![Service::new(1, "http://a")]);
        record(&app.store, 1, true, 100).await;
        record(&app.store, 1, false, 300).await;
        record(&app.store, 1, true, 200).await;

        let (status, checks) = get_json(
            &app.router,
            "/api/v1/services/1/checks?from=2999-01-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(checks.as_array().unwrap().is_empty());

        let (_, checks) = get_json(
            &app.router,
            "/api/v1/services/1/checks?to=2000-01-01T00:00:00Z",
        )
        .await;
        assert!(checks.as_array().unwrap().is_empty());

        let (_, checks) = get_json(
            &app.router,
            "/api/v1/services/1/checks?from=2000-01-01T00:00:00Z&to=2999-01-01T00:00:00Z",
        )
        .await;
        let checks = checks.as_array().unwrap();
        assert_eq!(checks.len(), 3);
        // Newest first
        assert_eq!(checks[0]["response_time_ms"], 200);
        assert_eq!(checks[2]["response_time_ms"], 100);

        let (status, checks) = get_json(&app.router, "/api/v1/services/1/checks?limit=0").await;
        assert_eq!(status, StatusCode::OK);
        assert!(checks.as_array().unwrap().is_empty());

        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_malformed_query_is_json_bad_request() {
        let app = create_test_app(vec![Service::new(1, "http://a")]);

        for uri in [
            "/api/v1/services/1/checks?limit=ten",
            "/api/v1/services/1/checks?from=yesterday",
            "/api/v1/services/1/alerts?limit=-1",
            "/api/v1/services/1/uptime?from=soon&to=later",
        ] {
            let (status, body) = get_json(&app.router, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["error"].is_string(), "{}", uri);
        }

        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_uptime_rejects_inverted_window() {
        let app = create_test_app(vec![Service::new(1, "http://a")]);
        let (status, _) = get_json(
            &app.router,
            "/api/v1/services/1/uptime?from=2024-02-01T00:00:00Z&to=2024-01-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        app.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_on_demand_check() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let app = create_test_app(vec![Service::new(1, server.uri())]);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/services/1/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["is_up"], false);
        assert_eq!(body["status_code"], 503);
        assert_eq!(body["recorded"], true);
        assert_eq!(body["alert"], "DOWN");

        assert_eq!(app.store.all_checks().len(), 1);
        assert!(!app.store.status(1).await.unwrap().unwrap().is_up);

        app.shutdown.cancel();
    }
}

//! Application startup and lifecycle management.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::handlers::{
    bills, catalog, clients, health_check, metrics_handler, notifications, payments,
    readiness_check, subscriptions,
};
use crate::services::metrics::init_metrics;
use crate::services::{
    RecordLocks, BillingDocumentService, CatalogService, Database, LedgerService, MemoryStore,
    Notifier, PlainTextRenderer, Repositories, ScheduledReconciliation, SubscriptionService,
    SweepScheduler,
};
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub repos: Repositories,
    pub clock: Arc<dyn Clock>,
    pub catalog: CatalogService,
    pub subscriptions: SubscriptionService,
    pub bills: BillingDocumentService,
    pub ledger: LedgerService,
    pub notifier: Notifier,
    pub locks: RecordLocks,
}

impl AppState {
    /// Wires every service over one repository bundle and clock. All
    /// services share one `RecordLocks` so bill, payment and subscription
    /// writes serialise across them.
    pub fn new(config: EngineConfig, repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        let locks = RecordLocks::new();
        let notifier = Notifier::new(repos.clone(), clock.clone());

        Self {
            catalog: CatalogService::new(repos.clone(), clock.clone()),
            subscriptions: SubscriptionService::new(
                repos.clone(),
                clock.clone(),
                locks.clone(),
                config.pricing.subscription_tax_percentage,
            ),
            bills: BillingDocumentService::new(
                repos.clone(),
                clock.clone(),
                locks.clone(),
                Arc::new(PlainTextRenderer),
                config.pricing.default_bill_tax_rate,
            ),
            ledger: LedgerService::new(repos.clone(), clock.clone(), locks.clone(), notifier.clone()),
            notifier,
            locks,
            config: Arc::new(config),
            repos,
            clock,
        }
    }

    pub fn sweeps(&self) -> ScheduledReconciliation {
        ScheduledReconciliation::new(
            self.repos.clone(),
            self.clock.clone(),
            self.locks.clone(),
            self.notifier.clone(),
        )
    }

    pub fn scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(
            self.config.scheduler.clone(),
            self.sweeps(),
            self.repos.sweep_runs.clone(),
            self.clock.clone(),
        )
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/services",
            get(catalog::list_services).post(catalog::create_service),
        )
        .route(
            "/services/:id",
            get(catalog::get_service).put(catalog::update_service),
        )
        .route("/services/:id/status", patch(catalog::set_service_status))
        .route("/plans", get(catalog::list_plans).post(catalog::create_plan))
        .route("/plans/comparison", get(catalog::compare_plans))
        .route("/plans/:id", get(catalog::get_plan).put(catalog::update_plan))
        .route("/plans/:id/status", patch(catalog::set_plan_status))
        .route("/plans/:id/services", post(catalog::add_plan_services))
        .route(
            "/plans/:id/services/:service_id",
            delete(catalog::remove_plan_service),
        )
        .route(
            "/plans/:id/services/:service_id/price",
            patch(catalog::update_plan_service_price),
        )
        .route(
            "/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::create_subscription),
        )
        .route("/subscriptions/:id", get(subscriptions::get_subscription))
        .route(
            "/subscriptions/:id/activate",
            post(subscriptions::activate_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route("/bills", get(bills::list_bills).post(bills::create_bill))
        .route("/bills/overdue", get(bills::list_overdue_bills))
        .route(
            "/bills/:id",
            get(bills::get_bill)
                .put(bills::update_bill)
                .delete(bills::delete_bill),
        )
        .route("/bills/:id/send", post(bills::send_bill))
        .route("/bills/:id/cancel", post(bills::cancel_bill))
        .route("/bills/:id/mark-paid", post(bills::mark_bill_paid))
        .route("/bills/:id/discount", patch(bills::apply_discount))
        .route("/bills/:id/pdf", get(bills::download_bill))
        .route(
            "/payments",
            get(payments::list_payments).post(payments::create_payment),
        )
        .route(
            "/payments/submit-verification",
            post(payments::submit_for_verification),
        )
        .route(
            "/payments/pending-verification",
            get(payments::pending_verification),
        )
        .route("/payments/stats", get(payments::payment_stats))
        .route("/payments/history", get(payments::payment_history))
        .route("/payments/overdue", get(payments::overdue_payments))
        .route(
            "/payments/:id",
            get(payments::get_payment)
                .put(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .route("/payments/:id/verify", post(payments::verify_payment))
        .route("/payments/:id/reject", post(payments::reject_payment))
        .route("/payments/:id/partial", post(payments::record_partial_payment))
        .route("/payments/:id/cancel", post(payments::cancel_payment))
        .route("/invoices", get(payments::list_invoices))
        .route("/invoices/:id", get(payments::get_invoice))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/:id/read",
            patch(notifications::mark_notification_read),
        )
        .route(
            "/clients/:id",
            get(clients::get_client).put(clients::upsert_client),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                    company_id = tracing::field::Empty,
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    scheduler: Option<SweepScheduler>,
    shutdown: CancellationToken,
}

impl Application {
    /// Builds against PostgreSQL when a database URL is configured, otherwise
    /// against the in-memory store.
    pub async fn build(config: EngineConfig) -> Result<Self, AppError> {
        init_metrics();

        let repos = match config.database.url.as_deref() {
            Some(url) => {
                let db = Database::new(
                    url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::from(e)
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    AppError::from(e)
                })?;

                Repositories::from_store(Arc::new(db))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using the in-memory store");
                Repositories::from_store(Arc::new(MemoryStore::new()))
            }
        };

        Self::build_with(config, repos, Arc::new(SystemClock)).await
    }

    /// Builds over caller-supplied storage and clock.
    pub async fn build_with(
        config: EngineConfig,
        repos: Repositories,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let scheduler_enabled = config.scheduler.enabled;
        let state = AppState::new(config, repos, clock);

        let (scheduler, shutdown) = if scheduler_enabled {
            let scheduler = state.scheduler();
            let token = scheduler.shutdown_token();
            (Some(scheduler), token)
        } else {
            (None, CancellationToken::new())
        };

        tracing::info!(port = port, scheduler = scheduler_enabled, "Billing engine listener bound");

        Ok(Self {
            port,
            listener,
            state,
            scheduler,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling this stops the scheduler and drains the HTTP server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        if let Some(scheduler) = self.scheduler {
            tokio::spawn(scheduler.start());
        }

        let app = router(self.state);
        let shutdown = self.shutdown.clone();

        tracing::info!(
            service = "billing-engine",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

//! Metrics module for billing-engine.
//! Provides Prometheus metrics for pricing, ledger and sweep operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store call duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_engine_db_query_duration_seconds",
            "Store call duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Catalog (service/plan) operations
pub static CATALOG_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription transitions
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Bill operations
pub static BILL_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment transitions
pub static PAYMENT_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Ledger folds over a bill's payments
pub static RECONCILE_FOLDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sweep executions by kind and outcome
pub static SWEEP_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notifications emitted (or deduplicated) by kind
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Received money by company
pub static PAYMENT_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CATALOG_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_catalog_operations_total",
                "Service and plan operations by company and operation"
            ),
            &["company_id", "operation"]
        )
        .expect("Failed to register CATALOG_OPERATIONS_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_subscription_operations_total",
                "Subscription operations by company and operation"
            ),
            &["company_id", "operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    BILL_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_bill_operations_total",
                "Bill operations by company and operation"
            ),
            &["company_id", "operation"]
        )
        .expect("Failed to register BILL_OPERATIONS_TOTAL")
    });

    PAYMENT_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_payment_operations_total",
                "Payment operations by company and operation"
            ),
            &["company_id", "operation"]
        )
        .expect("Failed to register PAYMENT_OPERATIONS_TOTAL")
    });

    RECONCILE_FOLDS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_reconcile_folds_total",
                "Payment folds into bills by resulting bill status"
            ),
            &["status"]
        )
        .expect("Failed to register RECONCILE_FOLDS_TOTAL")
    });

    SWEEP_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_engine_sweep_runs_total", "Sweep runs by kind and outcome"),
            &["kind", "outcome"]
        )
        .expect("Failed to register SWEEP_RUNS_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_engine_notifications_total",
                "Notifications by kind and outcome"
            ),
            &["kind", "outcome"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    PAYMENT_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "billing_engine_payment_amount_total",
                "Money recorded against payments by company"
            ),
            &["company_id"]
        )
        .expect("Failed to register PAYMENT_AMOUNT_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_catalog_operation(company_id: &str, operation: &str) {
    if let Some(counter) = CATALOG_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[company_id, operation]).inc();
    }
}

pub fn record_subscription_operation(company_id: &str, operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[company_id, operation]).inc();
    }
}

pub fn record_bill_operation(company_id: &str, operation: &str) {
    if let Some(counter) = BILL_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[company_id, operation]).inc();
    }
}

pub fn record_payment_operation(company_id: &str, operation: &str) {
    if let Some(counter) = PAYMENT_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[company_id, operation]).inc();
    }
}

pub fn record_reconcile_fold(status: &str) {
    if let Some(counter) = RECONCILE_FOLDS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_sweep_run(kind: &str, outcome: &str) {
    if let Some(counter) = SWEEP_RUNS_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

pub fn record_notification(kind: &str, outcome: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

/// Record money received against a payment.
pub fn record_payment_amount(company_id: &str, amount: f64) {
    if let Some(counter) = PAYMENT_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[company_id]).inc_by(amount.abs());
    }
}

pub mod billing_document;
pub mod catalog;
pub mod database;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod pricing;
pub mod render;
pub mod repository;
pub mod scheduler;
pub mod subscriptions;
pub mod sweeps;

pub use billing_document::BillingDocumentService;
pub use catalog::CatalogService;
pub use database::Database;
pub use ledger::LedgerService;
pub use locks::{RecordGuard, RecordLocks};
pub use memory::MemoryStore;
pub use notifier::Notifier;
pub use render::{BillRenderer, PlainTextRenderer};
pub use repository::Repositories;
pub use scheduler::SweepScheduler;
pub use subscriptions::SubscriptionService;
pub use sweeps::ScheduledReconciliation;

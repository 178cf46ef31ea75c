//! Domain models for billing-engine.

mod bill;
mod client;
mod invoice;
mod notification;
mod payment;
mod plan;
mod service;
mod subscription;
mod sweep;

pub use bill::{Bill, BillStatus, CreateBill, LineItem, ListBillsFilter, UpdateBill};
pub use client::Client;
pub use invoice::Invoice;
pub use notification::{NewNotification, Notification, NotificationKind, Priority};
pub use payment::{
    CreatePayment, ListPaymentsFilter, Payment, PaymentMethod, PaymentStats, PaymentStatus,
    StatusBucket, UpdatePayment,
};
pub use plan::{
    ComparedPlan, CreatePlan, Discount, DiscountType, FeatureRow, IncludedService, Plan,
    PlanComparison, UpdatePlan,
};
pub use service::{describe_cycles, BillingCycle, CreateService, Service, UpdateService};
pub use subscription::{
    AddOn, CreateSubscription, ListSubscriptionsFilter, PlanSnapshot, Subscription,
    SubscriptionStatus,
};
pub use sweep::{SweepKind, SweepReport, SweepRun, SweepRunStatus};

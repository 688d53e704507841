//! Business logic services for AgroVault

pub mod lifecycle;
pub mod notifier;
pub mod settlement;

pub use lifecycle::{OrderLifecycleService, TransitionOutcome};
pub use notifier::NotificationService;
pub use settlement::SettlementService;

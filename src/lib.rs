// Car Discounts - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod entities;
pub mod error;
pub mod requests;   // Validation + partial-update merge
pub mod scheduler;  // Discount reconciliation timer
pub mod service;    // Car lifecycle (CRUD + discount transitions)
pub mod store;      // Aggregate persistence (SQLite)
pub mod windows;    // Discount window arithmetic

// Re-export commonly used types
pub use config::Config;
pub use entities::{Car, Manufacturer, Owner, DISCOUNT_RATE};
pub use error::{CarError, CarResult, SchedulerError, StoreError, StoreResult};
pub use requests::{
    CreateCarRequest, CreateManufacturerRequest, CreateOwnerRequest,
    UpdateCarRequest, UpdateManufacturerRequest, UpdateOwnerRequest,
};
pub use scheduler::{
    reconcile, DiscountScheduler, SubJob, SubJobFailure, TickHandle, TickOutcome, TickReport,
    DEFAULT_TICK_INTERVAL,
};
pub use service::CarService;
pub use store::{AggregateStore, Removal, SqliteStore};
pub use windows::{DiscountWindows, RegistrationRange};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the fmt subscriber used by both binaries (RUST_LOG, default `info`)
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

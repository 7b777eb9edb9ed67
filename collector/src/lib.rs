//! Hourly snapshot collection: collector contract, registry, scheduler and the
//! portfolio / wallet / rate collectors.

pub mod contract;
pub mod error;
pub mod portfolio;
pub mod pricing;
pub mod rate;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod upstream;
pub mod wallet;

pub use contract::{CollectionResult, Collector, CollectorIdentity, ScheduledCollector};
pub use error::{RegistryError, SchedulerError, StoreError, UpstreamError, ValidationError};
pub use portfolio::PortfolioCollector;
pub use pricing::{FallbackPriceOracle, StaticPriceOracle};
pub use rate::{default_crypto_pairs, default_fiat_pairs, RateCollector};
pub use registry::{CollectorInfo, CollectorRegistry, FanOut};
pub use scheduler::{
    next_boundary, Clock, CollectorFactory, InitializeReport, Metric, RunStats, Scheduler,
    SchedulerConfig, SchedulerState, SchedulerStatus, SystemClock,
};
pub use store::{InMemorySnapshotStore, PortfolioDirectory, SnapshotStore};
pub use upstream::{CustodyApi, PortfolioApi, PriceOracle, RateSource};
pub use wallet::WalletCollector;

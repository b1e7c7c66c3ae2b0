//! Bounded-concurrency driver for fleet-wide BOSH service instance
//! operations.
//!
//! The [`iterator::Iterator`] walks every service instance known to the
//! platform, triggers a long-running operation against each (upgrade,
//! recreate), and tracks each to completion under partial failure, retry,
//! and quota pressure, through four narrow collaborator traits
//! ([`instance_lister::InstanceLister`], [`triggerer::Triggerer`],
//! [`state_checker::StateChecker`], [`listener::Listener`]) plus
//! [`sleeper::Sleeper`] for test determinism. Construct one via
//! [`builder::Builder`].

pub mod broker_services;
pub mod builder;
pub mod errors;
pub mod instance_lister;
pub mod iterator;
pub mod listener;
pub mod sleeper;
pub mod state;
pub mod state_checker;
pub mod tracing_listener;
pub mod triggerer;
pub mod types;

pub use builder::Builder;
pub use errors::{ConfigError, IterateError};
pub use iterator::Iterator;
pub use types::{Instance, OperationType};

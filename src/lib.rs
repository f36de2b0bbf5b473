#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Seeder - declarative collection, index and seed reconciliation for MongoDB
//!
//! A [`ReconciliationPlan`] lists the collections a database must have, the
//! indexes each one carries and the seed documents to load. [`reconcile`]
//! drops and rebuilds the planned collections, builds their indexes and
//! inserts the seeds, so running it again always lands on the same state.
//!
//! # Architecture
//!
//! - **[`schema`]**: collection and index declarations
//! - **[`seed`]**: seed records, typed values and the injectable clock
//! - **[`plan`]**: plan loading and validation
//! - **[`reconcile`]**: the drop / create / index / seed pass
//! - **[`verify`]**: read-only drift check against a live database
//! - **[`store`]**: the [`DatabaseHandle`] trait with MongoDB and in-memory handles
//! - **[`config`]**: layered configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use seeder::{ReconciliationPlan, Reconciler, MongoStore, SeederConfig};
//!
//! let config = SeederConfig::load(None)?;
//! let loaded = ReconciliationPlan::from_path(&config.plan)?;
//! let store = MongoStore::connect(&config, &config.database).await?;
//! let report = Reconciler::new(&store).run(&loaded.plan).await?;
//! println!("{}", report);
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod plan;
pub mod reconcile;
pub mod schema;
pub mod seed;
pub mod store;
pub mod telemetry;
pub mod verify;

pub use config::SeederConfig;
pub use plan::{LoadedPlan, PlanError, ReconciliationPlan, SeedBatch};
pub use reconcile::{reconcile, Phase, ReconcileError, ReconcileReport, Reconciler};
pub use schema::{CollectionSpec, IndexDirection, IndexSpec, KeyPattern};
pub use seed::{Clock, FixedClock, RejectKind, SeedInsertError, SeedRecord, SeedValue, SystemClock};
pub use store::{DatabaseHandle, MemoryStore, MongoStore, StoreError};
pub use verify::{verify, VerifyReport};

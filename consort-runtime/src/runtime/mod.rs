//! Service and client sessions.
//!
//! A [`crate::Service`] hosts capabilities behind its `request` channel and
//! broadcasts lifecycle, status, and event messages; a [`crate::Client`] is a
//! throwaway identity that sends requests and reacts to replies. Both share
//! the courier, which tracks external requests and pumps them to the brokers.
//!
//! Capabilities are assembled before the service exists:
//!
//! ```
//! use consort_runtime::{CapabilityBuilder, OperationConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct Increment {
//!     by: i64,
//! }
//!
//! #[derive(Serialize)]
//! struct Count {
//!     total: i64,
//! }
//!
//! let capability = CapabilityBuilder::new("Counter")
//!     .operation("increment", OperationConfig::default(), |req: Increment| {
//!         Ok(Count { total: req.by + 1 })
//!     })?
//!     .declare_event("threshold-crossed")
//!     .build();
//!
//! assert_eq!(capability.name(), "Counter");
//! # Ok::<(), consort_runtime::RegistrationError>(())
//! ```

pub(crate) mod capability;
pub(crate) mod client;
pub(crate) mod courier;
pub(crate) mod service;
pub(crate) mod worker;

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod traits;
pub use traits::{EngineApi, L1Chain, L1ChainError};

mod client;
pub use client::{EngineClient, ENGINE_CALL_TIMEOUT};

mod state;
pub use state::{EngineState, HeadsSnapshot, ResetTarget};

mod controller;
pub use controller::{EngineController, InsertOutcome, SyncMode};

mod errors;
pub use errors::{EngineClientError, EngineControllerError, EngineErrorSeverity};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod events;
pub use events::{Deriver, DrainHalt, Emitter, Event, EventSystem};

mod scheduler;
pub use scheduler::{
    StepSchedule, StepSchedulingDeriver, STEP_BACKOFF_BASE, STEP_BACKOFF_MAX,
};

mod conf;
pub use conf::{DriverConfig, ALT_SYNC_REQUEST_TIMEOUT, HALT_GRACE_PERIOD, L1_SIGNAL_TIMEOUT};

mod traits;
pub use traits::{
    AltSync, AltSyncError, AttributesBuilder, AttributesBuilderError, ELSyncClient, L1OriginSelector,
    L2Chain, L2ChainError, Network, NetworkError, NoopSequencerStateListener, OriginSelectorError,
    SequencerStateListener, SequencerStateListenerError,
};

mod status;
pub use status::StatusTracker;

mod clsync;
pub use clsync::{CLSyncDeriver, MAX_QUEUED_UNSAFE_PAYLOADS};

mod finality;
pub use finality::FinalityDeriver;

mod engine;
pub use engine::{EngineDeriver, EngineStateSnapshot};

mod derivation;
pub use derivation::{DerivationPipeline, PipelineStepError, StepOutcome, SyncDeriver};

mod sequencer;
pub use sequencer::{ConductorClient, ConductorError, SequencerDeriver, SequencerState};

mod safe_head;
pub use safe_head::{
    FileSafeHeadStore, NoopSafeHeadListener, SafeHeadListener, SafeHeadStoreError,
};

mod driver;
pub use driver::{
    Driver, DriverApiError, DriverBuilder, DriverError, DriverHandle, StateRequest,
};

mod rpc;
pub use rpc::{AdminRpc, RollupRpc};

mod metrics;
pub use metrics::Metrics;

pub use cp_engine::SyncMode;

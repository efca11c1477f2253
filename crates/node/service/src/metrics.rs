//! Metrics for the driver core.

/// Container for metric identifiers used by this crate.
#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of dispatched events, labeled by kind.
    pub const EVENTS: &str = "cp_node_events";

    /// Identifier for the counter of forced pipeline resets.
    pub const PIPELINE_RESETS: &str = "cp_node_pipeline_resets";

    /// Identifier for the counter of received unsafe payloads.
    pub const RECEIVED_UNSAFE_PAYLOADS: &str = "cp_node_received_unsafe_payloads";

    /// Identifier for the counter of derivation errors.
    pub const DERIVATION_ERRORS: &str = "cp_node_derivation_errors";

    /// Identifier for the counter of payload publishing errors.
    pub const PUBLISHING_ERRORS: &str = "cp_node_publishing_errors";

    /// Identifier for the gauge of queued unsafe payloads.
    pub const UNSAFE_PAYLOADS_QUEUED: &str = "cp_node_unsafe_payloads_queued";

    /// Identifier for the gauge flagging an idle derivation pipeline.
    pub const DERIVATION_IDLE: &str = "cp_node_derivation_idle";

    /// Identifier for the gauge flagging an active sequencer.
    pub const SEQUENCER_ACTIVE: &str = "cp_node_sequencer_active";

    /// Identifier for the gauge tracking the L1 head number.
    pub const L1_HEAD: &str = "cp_node_l1_head";

    /// Identifier for the gauge tracking the unsafe head number.
    pub const UNSAFE_HEAD: &str = "cp_node_unsafe_head";

    /// Identifier for the gauge tracking the safe head number.
    pub const SAFE_HEAD: &str = "cp_node_safe_head";

    /// Initializes metrics for the driver: describes them and zeroes the
    /// unlabeled ones so they can be queried immediately.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(Self::EVENTS, "Events dispatched by the driver event system");
        metrics::describe_counter!(Self::PIPELINE_RESETS, "Forced derivation pipeline resets");
        metrics::describe_counter!(
            Self::RECEIVED_UNSAFE_PAYLOADS,
            "Unsafe payloads received from gossip or alt-sync"
        );
        metrics::describe_counter!(Self::DERIVATION_ERRORS, "Derivation errors");
        metrics::describe_counter!(Self::PUBLISHING_ERRORS, "Payload publishing errors");
        metrics::describe_gauge!(Self::UNSAFE_PAYLOADS_QUEUED, "Queued unsafe payloads");
        metrics::describe_gauge!(Self::DERIVATION_IDLE, "Whether derivation is idle");
        metrics::describe_gauge!(Self::SEQUENCER_ACTIVE, "Whether the sequencer is active");
        metrics::describe_gauge!(Self::L1_HEAD, "L1 head block number");
        metrics::describe_gauge!(Self::UNSAFE_HEAD, "Unsafe L2 head block number");
        metrics::describe_gauge!(Self::SAFE_HEAD, "Safe L2 head block number");
    }

    fn zero() {
        metrics::counter!(Self::PIPELINE_RESETS).absolute(0);
        metrics::counter!(Self::RECEIVED_UNSAFE_PAYLOADS).absolute(0);
        metrics::counter!(Self::DERIVATION_ERRORS).absolute(0);
        metrics::counter!(Self::PUBLISHING_ERRORS).absolute(0);
        metrics::gauge!(Self::UNSAFE_PAYLOADS_QUEUED).set(0);
        metrics::gauge!(Self::DERIVATION_IDLE).set(0);
        metrics::gauge!(Self::SEQUENCER_ACTIVE).set(0);
        metrics::gauge!(Self::L1_HEAD).set(0);
        metrics::gauge!(Self::UNSAFE_HEAD).set(0);
        metrics::gauge!(Self::SAFE_HEAD).set(0);
    }
}

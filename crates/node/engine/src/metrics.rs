//! Metrics for engine interactions.

/// Container for metric identifiers used by this crate.
#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of applied forkchoice updates.
    pub const FORKCHOICE_UPDATES: &str = "cp_engine_forkchoice_updates";

    /// Identifier for the counter of inserted payloads.
    pub const PAYLOAD_INSERTS: &str = "cp_engine_payload_inserts";

    /// Identifier for the counter of engine resets.
    pub const ENGINE_RESETS: &str = "cp_engine_resets";

    /// Identifier for the gauge tracking the finalized head number.
    pub const FINALIZED_HEAD: &str = "cp_engine_finalized_head";

    /// Initializes metrics for the engine: describes them and zeroes them so
    /// they can be queried immediately.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::FORKCHOICE_UPDATES,
            "Forkchoice updates applied to the execution engine"
        );
        metrics::describe_counter!(
            Self::PAYLOAD_INSERTS,
            "Payloads inserted into the execution engine"
        );
        metrics::describe_counter!(Self::ENGINE_RESETS, "Engine heads-view resets");
        metrics::describe_gauge!(Self::FINALIZED_HEAD, "Finalized L2 head number");
    }

    fn zero() {
        metrics::counter!(Self::FORKCHOICE_UPDATES).absolute(0);
        metrics::counter!(Self::PAYLOAD_INSERTS).absolute(0);
        metrics::counter!(Self::ENGINE_RESETS).absolute(0);
        metrics::gauge!(Self::FINALIZED_HEAD).set(0);
    }
}

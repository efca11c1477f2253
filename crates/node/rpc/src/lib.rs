#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod admin;
pub use admin::{NodeClosedError, SequencerAdminError, SequencerAdminQuery};

mod jsonrpsee;
pub use jsonrpsee::{AdminApiServer, RollupNodeApiServer};

mod response;
pub use response::BlockRefWithStatusResponse;

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod block;
pub use block::{BlockId, BlockLabel, L1BlockRef, L2BlockRef};

mod genesis;
pub use genesis::{RollupConfig, RollupGenesis};

mod info;
pub use info::L1BlockInfo;

mod payload;
pub use payload::{BlockRefError, ExecutionPayloadEnvelope, DEPOSIT_TX_TYPE};

mod attributes;
pub use attributes::{AttributesWithParent, PayloadAttributes};

mod status;
pub use status::SyncStatus;

mod safe_head;
pub use safe_head::{SafeHeadCodecError, SafeHeadEntry, SAFE_HEAD_ENTRY_SIZE};

pub mod quantity;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

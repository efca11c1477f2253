//! Execution payload envelopes and conversion to local block references.

use crate::{BlockId, L1BlockInfo, L2BlockRef, RollupGenesis};
use alloy_primitives::{Bytes, B256};
use alloy_rlp::Header;
use alloy_rpc_types_engine::ExecutionPayloadV3;
use serde::{Deserialize, Serialize};

/// The EIP-2718 type byte of a deposit transaction.
pub const DEPOSIT_TX_TYPE: u8 = 0x7E;

/// An execution payload together with the sidecar data required to import it.
///
/// The driver treats the payload as opaque beyond its id, parent, timestamp,
/// and transaction count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadEnvelope {
    /// The parent beacon block root, required for payload insertion after the
    /// beacon-root upgrade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
    /// The inner execution payload.
    pub execution_payload: ExecutionPayloadV3,
}

impl ExecutionPayloadEnvelope {
    /// The hash of the payload's block.
    pub const fn block_hash(&self) -> B256 {
        self.execution_payload.payload_inner.payload_inner.block_hash
    }

    /// The number of the payload's block.
    pub const fn block_number(&self) -> u64 {
        self.execution_payload.payload_inner.payload_inner.block_number
    }

    /// The parent hash of the payload's block.
    pub const fn parent_hash(&self) -> B256 {
        self.execution_payload.payload_inner.payload_inner.parent_hash
    }

    /// The timestamp of the payload's block.
    pub const fn timestamp(&self) -> u64 {
        self.execution_payload.payload_inner.payload_inner.timestamp
    }

    /// The number of transactions carried by the payload.
    pub fn transaction_count(&self) -> usize {
        self.execution_payload.payload_inner.payload_inner.transactions.len()
    }

    /// The `(hash, number)` id of the payload's block.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.block_hash(), number: self.block_number() }
    }

    /// Derives the [`L2BlockRef`] of this payload.
    ///
    /// For the genesis block the origin is taken from the rollup genesis; any
    /// other block must open with an L1 info deposit transaction naming its
    /// origin.
    pub fn to_l2_block_ref(&self, genesis: &RollupGenesis) -> Result<L2BlockRef, BlockRefError> {
        let (l1_origin, sequence_number) = if self.block_number() == genesis.l2.number {
            if self.block_hash() != genesis.l2.hash {
                return Err(BlockRefError::GenesisHashMismatch {
                    got: self.block_hash(),
                    expected: genesis.l2.hash,
                });
            }
            (genesis.l1, 0)
        } else {
            let txs = &self.execution_payload.payload_inner.payload_inner.transactions;
            let first = txs.first().ok_or(BlockRefError::EmptyTransactions)?;
            let info = L1BlockInfo::from_calldata(&deposit_tx_input(first)?)?;
            (BlockId { hash: info.hash, number: info.number }, info.sequence_number)
        };

        Ok(L2BlockRef {
            hash: self.block_hash(),
            number: self.block_number(),
            parent_hash: self.parent_hash(),
            timestamp: self.timestamp(),
            l1_origin,
            sequence_number,
        })
    }
}

/// Extracts the calldata of a raw deposit transaction.
///
/// Deposit transactions are RLP lists of eight fields with the input last; the
/// leading seven are skipped without being interpreted.
fn deposit_tx_input(raw: &Bytes) -> Result<Bytes, BlockRefError> {
    let (&ty, mut buf) = raw.split_first().ok_or(BlockRefError::EmptyTransactions)?;
    if ty != DEPOSIT_TX_TYPE {
        return Err(BlockRefError::NotDepositTx { got: ty });
    }

    let header = Header::decode(&mut buf)?;
    if !header.list || buf.len() < header.payload_length {
        return Err(BlockRefError::Rlp(alloy_rlp::Error::UnexpectedString));
    }
    let mut fields = &buf[..header.payload_length];
    for _ in 0..7 {
        let field = Header::decode(&mut fields)?;
        if fields.len() < field.payload_length {
            return Err(BlockRefError::Rlp(alloy_rlp::Error::InputTooShort));
        }
        fields = &fields[field.payload_length..];
    }
    Ok(<Bytes as alloy_rlp::Decodable>::decode(&mut fields)?)
}

/// An error deriving a block reference from a payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockRefError {
    /// The payload carries no transactions, so no info deposit exists.
    #[error("payload has no transactions, missing L1 info deposit")]
    EmptyTransactions,
    /// The first transaction is not a deposit transaction.
    #[error("first payload transaction has type {got:#04x}, expected a deposit")]
    NotDepositTx {
        /// The transaction type byte found.
        got: u8,
    },
    /// The deposit transaction failed to decode.
    #[error("failed to decode deposit transaction: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The info calldata is shorter than a selector.
    #[error("L1 info calldata shorter than a selector")]
    InfoTooShort,
    /// The info calldata has an unexpected length for its selector.
    #[error("L1 info calldata has invalid length {got}")]
    InvalidInfoLength {
        /// The calldata length found.
        got: usize,
    },
    /// The info calldata selector is not a known layout.
    #[error("unknown L1 info selector {0:x?}")]
    UnknownInfoSelector([u8; 4]),
    /// A payload at the genesis height does not match the genesis hash.
    #[error("payload at genesis height has hash {got}, expected {expected}")]
    GenesisHashMismatch {
        /// The payload hash found.
        got: B256,
        /// The configured genesis hash.
        expected: B256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{envelope, envelope_with_origin, l1_info_deposit_tx};
    use alloy_primitives::b256;

    #[test]
    fn test_genesis_payload_takes_origin_from_config() {
        let genesis = RollupGenesis {
            l1: BlockId { hash: B256::repeat_byte(0x11), number: 900 },
            l2: BlockId { hash: B256::repeat_byte(0x22), number: 0 },
            l2_time: 1700000000,
        };
        let env = envelope(0, genesis.l2.hash, B256::ZERO, genesis.l2_time, vec![]);
        let r = env.to_l2_block_ref(&genesis).unwrap();
        assert_eq!(r.l1_origin, genesis.l1);
        assert_eq!(r.sequence_number, 0);
    }

    #[test]
    fn test_genesis_hash_mismatch_rejected() {
        let genesis = RollupGenesis {
            l1: BlockId::default(),
            l2: BlockId { hash: B256::repeat_byte(0x22), number: 0 },
            l2_time: 0,
        };
        let env = envelope(0, B256::repeat_byte(0x33), B256::ZERO, 0, vec![]);
        assert!(matches!(
            env.to_l2_block_ref(&genesis),
            Err(BlockRefError::GenesisHashMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_ref_decodes_info_deposit() {
        let origin_hash = b256!("00000000000000000000000000000000000000000000000000000000000003e3");
        let env = envelope_with_origin(
            101,
            B256::repeat_byte(0x65),
            B256::repeat_byte(0x64),
            1700000002,
            BlockId { hash: origin_hash, number: 995 },
            2,
        );
        let r = env.to_l2_block_ref(&RollupGenesis::default()).unwrap();
        assert_eq!(r.number, 101);
        assert_eq!(r.l1_origin, BlockId { hash: origin_hash, number: 995 });
        assert_eq!(r.sequence_number, 2);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let env = envelope(101, B256::repeat_byte(1), B256::ZERO, 0, vec![]);
        assert_eq!(
            env.to_l2_block_ref(&RollupGenesis::default()),
            Err(BlockRefError::EmptyTransactions)
        );
    }

    #[test]
    fn test_non_deposit_first_tx_rejected() {
        let env =
            envelope(101, B256::repeat_byte(1), B256::ZERO, 0, vec![Bytes::from(vec![0x02, 0xc0])]);
        assert_eq!(
            env.to_l2_block_ref(&RollupGenesis::default()),
            Err(BlockRefError::NotDepositTx { got: 0x02 })
        );
    }

    #[test]
    fn test_deposit_tx_input_round_trip() {
        let info = L1BlockInfo {
            number: 995,
            time: 1700000000,
            hash: B256::repeat_byte(0xaa),
            sequence_number: 7,
        };
        let tx = l1_info_deposit_tx(&info);
        let input = deposit_tx_input(&tx).unwrap();
        assert_eq!(L1BlockInfo::from_calldata(&input).unwrap(), info);
    }

    #[test]
    fn test_envelope_serde_camel_case() {
        let env = envelope(5, B256::repeat_byte(5), B256::repeat_byte(4), 10, vec![]);
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert!(v.get("executionPayload").is_some());
        assert!(v["executionPayload"].get("blockHash").is_some());
    }
}

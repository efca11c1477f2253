//! Builders for payloads and block references used across the workspace's
//! tests.

use crate::{
    BlockId, ExecutionPayloadEnvelope, L1BlockInfo, L1BlockRef, L2BlockRef, DEPOSIT_TX_TYPE,
};
use alloy_primitives::{Address, Bloom, Bytes, B256, U256};
use alloy_rlp::Encodable;
use alloy_rpc_types_engine::{ExecutionPayloadV1, ExecutionPayloadV2, ExecutionPayloadV3};

/// A deterministic block hash for the given number, distinct per `salt`.
pub fn block_hash(number: u64, salt: u8) -> B256 {
    let mut out = [0u8; 32];
    out[0] = salt;
    out[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(out)
}

/// An [`L1BlockRef`] with deterministic hashes and a 12 second block time.
pub fn l1_block_ref(number: u64) -> L1BlockRef {
    L1BlockRef {
        hash: block_hash(number, 0x10),
        number,
        parent_hash: block_hash(number.saturating_sub(1), 0x10),
        timestamp: 1_700_000_000 + number * 12,
    }
}

/// An [`L2BlockRef`] with deterministic hashes, a 2 second block time, and the
/// given origin number.
pub fn l2_block_ref(number: u64, origin_number: u64) -> L2BlockRef {
    L2BlockRef {
        hash: block_hash(number, 0x20),
        number,
        parent_hash: block_hash(number.saturating_sub(1), 0x20),
        timestamp: 1_700_000_000 + number * 2,
        l1_origin: BlockId { hash: block_hash(origin_number, 0x10), number: origin_number },
        sequence_number: 0,
    }
}

/// Encodes an L1 info deposit transaction carrying `info` in the packed
/// calldata layout.
pub fn l1_info_deposit_tx(info: &L1BlockInfo) -> Bytes {
    let input = Bytes::from(info.to_packed_calldata());

    let mut fields = Vec::new();
    B256::ZERO.encode(&mut fields); // source hash
    Address::ZERO.encode(&mut fields); // from
    Address::repeat_byte(0x15).encode(&mut fields); // to: the info predeploy
    U256::ZERO.encode(&mut fields); // mint
    U256::ZERO.encode(&mut fields); // value
    1_000_000u64.encode(&mut fields); // gas
    true.encode(&mut fields); // system tx
    input.encode(&mut fields);

    let mut out = vec![DEPOSIT_TX_TYPE];
    alloy_rlp::Header { list: true, payload_length: fields.len() }.encode(&mut out);
    out.extend_from_slice(&fields);
    Bytes::from(out)
}

/// Builds an [`ExecutionPayloadEnvelope`] with the given identity and raw
/// transactions.
pub fn envelope(
    number: u64,
    hash: B256,
    parent_hash: B256,
    timestamp: u64,
    transactions: Vec<Bytes>,
) -> ExecutionPayloadEnvelope {
    ExecutionPayloadEnvelope {
        parent_beacon_block_root: Some(B256::ZERO),
        execution_payload: ExecutionPayloadV3 {
            payload_inner: ExecutionPayloadV2 {
                payload_inner: ExecutionPayloadV1 {
                    parent_hash,
                    fee_recipient: Address::ZERO,
                    state_root: B256::ZERO,
                    receipts_root: B256::ZERO,
                    logs_bloom: Bloom::ZERO,
                    prev_randao: B256::ZERO,
                    block_number: number,
                    gas_limit: 30_000_000,
                    gas_used: 0,
                    timestamp,
                    extra_data: Bytes::new(),
                    base_fee_per_gas: U256::from(7u64),
                    block_hash: hash,
                    transactions,
                },
                withdrawals: Vec::new(),
            },
            blob_gas_used: 0,
            excess_blob_gas: 0,
        },
    }
}

/// Builds an envelope whose first transaction is an L1 info deposit naming
/// `origin` and `sequence_number`.
pub fn envelope_with_origin(
    number: u64,
    hash: B256,
    parent_hash: B256,
    timestamp: u64,
    origin: BlockId,
    sequence_number: u64,
) -> ExecutionPayloadEnvelope {
    let info = L1BlockInfo {
        number: origin.number,
        time: timestamp.saturating_sub(2),
        hash: origin.hash,
        sequence_number,
    };
    envelope(number, hash, parent_hash, timestamp, vec![l1_info_deposit_tx(&info)])
}

/// Builds the envelope matching [`l2_block_ref`] for the same inputs, so a
/// payload round-trips to the reference the rest of a test uses.
pub fn envelope_for_ref(r: &L2BlockRef) -> ExecutionPayloadEnvelope {
    envelope_with_origin(
        r.number,
        r.hash,
        r.parent_hash,
        r.timestamp,
        r.l1_origin,
        r.sequence_number,
    )
}

//! Decoding of the L1 attributes ("L1 info") system transaction calldata.
//!
//! Every non-genesis L2 block opens with a deposit transaction that records
//! which L1 block the L2 block belongs to. Two calldata layouts exist: the
//! legacy ABI-encoded layout and the packed layout introduced with the blob
//! fee upgrade. The driver only needs the origin id, timestamp, and sequence
//! number out of either.

use crate::BlockRefError;
use alloy_primitives::B256;

/// `setL1BlockValues(uint64,uint64,uint256,bytes32,uint64,bytes32,uint256,uint256)`
const L1_INFO_SELECTOR_LEGACY: [u8; 4] = [0x01, 0x5d, 0x8e, 0xb9];
/// `setL1BlockValuesEcotone()`
const L1_INFO_SELECTOR_PACKED: [u8; 4] = [0x44, 0x0a, 0x5e, 0x20];

/// Length of the legacy layout: selector + 8 ABI words.
const L1_INFO_LEGACY_LEN: usize = 4 + 8 * 32;
/// Length of the packed layout.
const L1_INFO_PACKED_LEN: usize = 164;

/// The L1 origin information carried by the info deposit of an L2 block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1BlockInfo {
    /// The L1 origin block number.
    pub number: u64,
    /// The L1 origin block timestamp.
    pub time: u64,
    /// The L1 origin block hash.
    pub hash: B256,
    /// The sequence number of the L2 block within its epoch.
    pub sequence_number: u64,
}

impl L1BlockInfo {
    /// Parses the info-transaction calldata, accepting both layouts.
    pub fn from_calldata(data: &[u8]) -> Result<Self, BlockRefError> {
        let selector: [u8; 4] =
            data.get(..4).and_then(|s| s.try_into().ok()).ok_or(BlockRefError::InfoTooShort)?;
        match selector {
            L1_INFO_SELECTOR_LEGACY => Self::from_legacy_calldata(data),
            L1_INFO_SELECTOR_PACKED => Self::from_packed_calldata(data),
            other => Err(BlockRefError::UnknownInfoSelector(other)),
        }
    }

    /// Legacy layout: eight 32-byte ABI words after the selector. Word 0 holds
    /// the number, word 1 the timestamp, word 3 the hash, word 4 the sequence
    /// number.
    fn from_legacy_calldata(data: &[u8]) -> Result<Self, BlockRefError> {
        if data.len() != L1_INFO_LEGACY_LEN {
            return Err(BlockRefError::InvalidInfoLength { got: data.len() });
        }
        Ok(Self {
            number: be_u64(&data[28..36]),
            time: be_u64(&data[60..68]),
            hash: B256::from_slice(&data[100..132]),
            sequence_number: be_u64(&data[156..164]),
        })
    }

    /// Encodes this info in the packed calldata layout.
    pub fn to_packed_calldata(&self) -> Vec<u8> {
        let mut data = vec![0u8; L1_INFO_PACKED_LEN];
        data[..4].copy_from_slice(&L1_INFO_SELECTOR_PACKED);
        data[12..20].copy_from_slice(&self.sequence_number.to_be_bytes());
        data[20..28].copy_from_slice(&self.time.to_be_bytes());
        data[28..36].copy_from_slice(&self.number.to_be_bytes());
        data[100..132].copy_from_slice(self.hash.as_slice());
        data
    }

    /// Packed layout: selector, two fee scalars (4 bytes each), then sequence
    /// number, timestamp, and number as 8-byte integers, two 32-byte fee
    /// values, and the origin hash.
    fn from_packed_calldata(data: &[u8]) -> Result<Self, BlockRefError> {
        if data.len() != L1_INFO_PACKED_LEN {
            return Err(BlockRefError::InvalidInfoLength { got: data.len() });
        }
        Ok(Self {
            sequence_number: be_u64(&data[12..20]),
            time: be_u64(&data[20..28]),
            number: be_u64(&data[28..36]),
            hash: B256::from_slice(&data[100..132]),
        })
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().expect("8-byte slice"))
}

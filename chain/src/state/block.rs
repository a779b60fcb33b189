use alloy_primitives::{B256, keccak256};
use rkyv::{Archive, Deserialize, Serialize};

#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: [u8; 32],
    pub state_root: [u8; 32],
    pub timestamp: u64,
}

#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: [u8; 32],
}

impl Block {
    pub fn new(number: u64, parent_hash: B256, state_root: B256, timestamp: u64) -> Self {
        let header = BlockHeader {
            number,
            parent_hash: parent_hash.0,
            state_root: state_root.0,
            timestamp,
        };
        let hash = compute_hash(&header).0;
        Self { header, hash }
    }

    pub fn hash(&self) -> B256 {
        B256::from(self.hash)
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        B256::from(self.header.parent_hash)
    }

    pub fn state_root(&self) -> B256 {
        B256::from(self.header.state_root)
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Returns `true` if the stored hash matches the header contents.
    pub fn is_sealed(&self) -> bool {
        compute_hash(&self.header).0 == self.hash
    }
}

fn compute_hash(header: &BlockHeader) -> B256 {
    let mut buf = [0u8; 80];
    buf[..8].copy_from_slice(&header.number.to_be_bytes());
    buf[8..40].copy_from_slice(&header.parent_hash);
    buf[40..72].copy_from_slice(&header.state_root);
    buf[72..].copy_from_slice(&header.timestamp.to_be_bytes());
    keccak256(buf)
}

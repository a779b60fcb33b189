use anyhow::Result;
use rkyv::{
    Archive,
    api::high::{HighDeserializer, HighSerializer, HighValidator, to_bytes_with_alloc},
    bytecheck::CheckBytes,
    rancor,
    ser::allocator::{Arena, ArenaHandle},
    util::AlignedVec,
};

use crate::state::{Account, Block};

/// Serializes a value for storage in the redb database using rkyv.
///
/// # Errors
///
/// Returns an error if the serialization fails.
pub fn serialize_for_db<T>(value: &T) -> Result<AlignedVec>
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    let mut arena = Arena::new();
    to_bytes_with_alloc::<_, rancor::Error>(value, arena.acquire())
        .map_err(|e| anyhow::anyhow!("Serialization failed: {e}"))
}

/// Deserializes a value read from the database.
///
/// redb hands out unaligned slices, so the bytes are copied into an
/// [`AlignedVec`] and validated before deserialization.
pub fn deserialize_from_db<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + rkyv::Deserialize<T, HighDeserializer<rancor::Error>>,
{
    let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, rancor::Error>(&aligned)
        .map_err(|e| anyhow::anyhow!("Deserialization failed: {e}"))
}

/// Trait for types that can be stored in the redb database.
pub trait Storable {
    type Key: AsRef<[u8]>;
    type Value: AsRef<[u8]>;

    /// Returns the key for the value
    fn key(&self) -> Self::Key;

    /// Returns the value for the key
    fn value(&self) -> Result<Self::Value>;
}

impl Storable for Block {
    type Key = [u8; 8];
    type Value = AlignedVec;

    fn key(&self) -> Self::Key {
        self.number().to_be_bytes()
    }

    fn value(&self) -> Result<Self::Value> {
        serialize_for_db(self)
    }
}

impl Storable for Account {
    type Key = [u8; 20];
    type Value = AlignedVec;

    fn key(&self) -> Self::Key {
        self.address
    }

    fn value(&self) -> Result<Self::Value> {
        serialize_for_db(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};

    #[test]
    fn block_survives_storage_encoding() {
        let block = Block::new(7, B256::repeat_byte(1), B256::repeat_byte(2), 99);
        let bytes = block.value().unwrap();
        let decoded: Block = deserialize_from_db(bytes.as_ref()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(block.key(), 7u64.to_be_bytes());
    }

    #[test]
    fn account_key_is_address() {
        let address = Address::repeat_byte(0xab);
        let account = Account::new(address, U256::from(5u64), 1);
        assert_eq!(account.key(), address.0.0);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let block = Block::new(1, B256::ZERO, B256::ZERO, 0);
        let bytes = block.value().unwrap();
        let truncated = &bytes.as_ref()[..bytes.len() / 2];
        assert!(deserialize_from_db::<Block>(truncated).is_err());
    }
}

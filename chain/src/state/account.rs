use alloy_primitives::{Address, U256};
use rkyv::{Archive, Deserialize, Serialize};

/// [`Account`] represents an externally owned account in the L2 state.
///
/// The balance is kept as big-endian bytes so the archived form has a fixed
/// layout independent of the integer type used in memory.
#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// The account's address
    pub address: [u8; 20],
    /// The account's balance in base units (big-endian)
    pub balance: [u8; 32],
    /// The account's current nonce
    pub nonce: u64,
}

impl Account {
    pub fn new(address: Address, balance: U256, nonce: u64) -> Self {
        Self {
            address: address.0.0,
            balance: balance.to_be_bytes(),
            nonce,
        }
    }

    pub fn address(&self) -> Address {
        Address::from(self.address)
    }

    pub fn balance(&self) -> U256 {
        U256::from_be_bytes(self.balance)
    }
}

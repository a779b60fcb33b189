pub mod account;
pub mod block;
pub mod system;

use alloy_primitives::{B256, keccak256};

pub use account::Account;
pub use block::{Block, BlockHeader};
pub use system::{SystemState, WriteProtection};

/// Commitment over the account set and the chain id.
///
/// Accounts are committed in address order so the result does not depend on
/// the order the initialization data lists them in.
pub fn state_root(accounts: &[Account], chain_id: u64) -> B256 {
    let mut sorted: Vec<&Account> = accounts.iter().collect();
    sorted.sort_by_key(|account| account.address);

    let mut buf = Vec::with_capacity(8 + sorted.len() * 60);
    buf.extend_from_slice(&chain_id.to_be_bytes());
    for account in sorted {
        buf.extend_from_slice(&account.address);
        buf.extend_from_slice(&account.balance);
        buf.extend_from_slice(&account.nonce.to_be_bytes());
    }
    keccak256(&buf)
}

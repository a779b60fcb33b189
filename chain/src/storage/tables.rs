use redb::TableDefinition;

/// Frozen block history, keyed by big-endian block number.
pub const ANCIENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ancients");
pub const ACCOUNTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("accounts");
pub const SYSTEM: TableDefinition<&[u8], &[u8]> = TableDefinition::new("system");

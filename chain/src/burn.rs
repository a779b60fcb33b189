//! Resource accounting for system-level state access.
//!
//! A [`Burner`] is handed to code that touches system state so the cost of
//! each access can be metered, and so writes can be refused when the caller
//! holds a read-only view.

use anyhow::Result;
use slog::Logger;

/// Capability injected into state-access layers.
pub trait Burner {
    /// Charges `amount` against the running total.
    ///
    /// Budget-limited implementations fail once the budget is exhausted.
    fn burn(&mut self, amount: u64) -> Result<()>;

    /// Records an error raised while mutation should have been disallowed.
    ///
    /// Never fails itself.
    fn restrict(&self, err: &anyhow::Error);

    /// Whether the caller is barred from mutating state.
    fn read_only(&self) -> bool;
}

/// Unmetered burner used by the node itself.
///
/// Accumulates everything it is charged and never runs out.
pub struct SystemBurner {
    gas_burnt: u64,
    read_only: bool,
    logger: Logger,
}

impl SystemBurner {
    pub fn new(read_only: bool, logger: Logger) -> Self {
        Self {
            gas_burnt: 0,
            read_only,
            logger,
        }
    }

    /// Total charged so far.
    pub fn burned(&self) -> u64 {
        self.gas_burnt
    }
}

impl Burner for SystemBurner {
    fn burn(&mut self, amount: u64) -> Result<()> {
        self.gas_burnt = self.gas_burnt.saturating_add(amount);
        Ok(())
    }

    fn restrict(&self, err: &anyhow::Error) {
        slog::error!(self.logger, "Restrict() received an error"; "error" => %err);
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

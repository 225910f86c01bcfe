/*!
Process-wide exclusion between backup and restore operations.

The gate is a single slot: idle, held by a backup, or held by a restore.
Acquisition never blocks; a caller that finds the slot taken gets
`BackupInProgress` or `RestoreInProgress` (naming the operation currently
holding it) and owns its own retry policy. The returned lease frees the slot
when dropped, on every exit path.
*/

use std::sync::atomic::{AtomicU8, Ordering};

use crate::{ArchivistError, Result};

const IDLE: u8 = 0;
const BACKUP: u8 = 1;
const RESTORE: u8 = 2;

/// Which operation currently holds the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Backup,
    Restore,
}

/// Single-slot lease shared by the backup and restore orchestrators
#[derive(Debug, Default)]
pub struct OperationGate {
    slot: AtomicU8,
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the slot for a backup
    pub fn try_backup(&self) -> Result<OperationLease<'_>> {
        self.acquire(BACKUP)
    }

    /// Acquire the slot for a restore
    pub fn try_restore(&self) -> Result<OperationLease<'_>> {
        self.acquire(RESTORE)
    }

    pub fn state(&self) -> GateState {
        match self.slot.load(Ordering::Acquire) {
            BACKUP => GateState::Backup,
            RESTORE => GateState::Restore,
            _ => GateState::Idle,
        }
    }

    fn acquire(&self, operation: u8) -> Result<OperationLease<'_>> {
        match self
            .slot
            .compare_exchange(IDLE, operation, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(OperationLease { gate: self }),
            Err(RESTORE) => Err(ArchivistError::RestoreInProgress),
            Err(_) => Err(ArchivistError::BackupInProgress),
        }
    }
}

/// Held while an operation runs; releases the gate on drop
#[derive(Debug)]
#[must_use = "the gate is released as soon as the lease is dropped"]
pub struct OperationLease<'a> {
    gate: &'a OperationGate,
}

impl Drop for OperationLease<'_> {
    fn drop(&mut self) {
        self.gate.slot.store(IDLE, Ordering::Release);
    }
}

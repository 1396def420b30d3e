//! Register and coil storage
//!
//! Holding and input registers share one address space: FC03 and FC04 read
//! the same map. Addresses that were never written read as zero.
//!
//! The bank also records which addresses a client wrote since the last
//! reconciliation pass (the dirty set). The set is ordered so reconciliation
//! walks it deterministically, lowest address first.

use std::collections::{BTreeSet, HashMap};

/// Registers, coils and the dirty set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterBank {
    registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    dirty: BTreeSet<u16>,
}

impl RegisterBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one register, 0 when unset
    #[inline]
    pub fn get_register(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    /// Write one register without marking it dirty
    #[inline]
    pub fn set_register(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    /// Read `count` consecutive registers; addresses wrap at 0xFFFF
    pub fn read_registers(&self, start: u16, count: u16) -> Vec<u16> {
        (0..count)
            .map(|offset| self.get_register(start.wrapping_add(offset)))
            .collect()
    }

    /// Read one coil, off when unset
    #[inline]
    pub fn get_coil(&self, address: u16) -> bool {
        self.coils.get(&address).copied().unwrap_or(false)
    }

    /// Write one coil
    #[inline]
    pub fn set_coil(&mut self, address: u16, value: bool) {
        self.coils.insert(address, value);
    }

    /// Read `count` consecutive coils; addresses wrap at 0xFFFF
    pub fn read_coils(&self, start: u16, count: u16) -> Vec<bool> {
        (0..count)
            .map(|offset| self.get_coil(start.wrapping_add(offset)))
            .collect()
    }

    /// Record a client write awaiting reconciliation
    #[inline]
    pub fn mark_dirty(&mut self, address: u16) {
        self.dirty.insert(address);
    }

    /// Whether a client write to `address` is still unreconciled
    #[inline]
    pub fn is_dirty(&self, address: u16) -> bool {
        self.dirty.contains(&address)
    }

    /// Whether any client write is awaiting reconciliation
    #[inline]
    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Pending dirty addresses, ascending
    pub fn dirty_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.dirty.iter().copied()
    }

    /// Take every dirty address, ascending, leaving the set empty
    pub fn drain_dirty(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }
}

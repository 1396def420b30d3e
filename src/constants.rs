//! Modbus protocol constants used by the responder
//!
//! - Maximum PDU size: 253 bytes
//! - Register/coil read limits are sized so a response fits in one PDU

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length including the unit identifier
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size
/// Serial ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Initial capacity of a session receive buffer
///
/// A full frame is at most 6 + 254 = 260 bytes; 512 leaves room for a
/// second pipelined request.
pub const RECEIVE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers returned for FC03/FC04
///
/// Response PDU: FC(1) + Byte Count(1) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of coils returned for FC01
///
/// Response PDU: FC(1) + Byte Count(1) + ceil(N / 8) ≤ 253, rounded to 2000
pub const MAX_READ_COILS: usize = 2000;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Coil Values
// ============================================================================

/// FC05 value that switches a coil on
pub const COIL_ON: u16 = 0xFF00;

/// FC05 value that switches a coil off
pub const COIL_OFF: u16 = 0x0000;

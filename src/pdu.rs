//! Modbus response PDU
//!
//! Responses are assembled in a fixed-size stack array to avoid heap
//! allocation on the request path.

use tracing::debug;

use crate::codec;
use crate::constants::{
    FC_READ_COILS, FC_WRITE_MULTIPLE_REGISTERS, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// PDU backed by a fixed stack array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Bytes following the function code
    #[inline]
    pub fn payload(&self) -> &[u8] {
        if self.len > 0 {
            &self.data[1..self.len]
        } else {
            &[]
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            0x17 => "Read/Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    /// Set function code
    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    /// Add address
    #[inline]
    pub fn address(mut self, addr: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    /// Add quantity or a single register value
    #[inline]
    pub fn quantity(mut self, qty: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Add data
    #[inline]
    pub fn data(mut self, data: &[u8]) -> ModbusResult<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    /// Build the PDU
    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Build a FC03/FC04 response: byte count followed by big-endian values
    ///
    /// At most [`MAX_READ_REGISTERS`] values are encoded; the rest are ignored.
    pub fn build_read_registers_response(fc: u8, values: &[u16]) -> ModbusResult<ModbusPdu> {
        let values = &values[..values.len().min(MAX_READ_REGISTERS)];
        let mut builder = PduBuilder::new()
            .function_code(fc)?
            .byte((values.len() * 2) as u8)?;
        for &value in values {
            builder = builder.quantity(value)?;
        }
        Ok(builder.build())
    }

    /// Build a FC01 response: byte count followed by LSB-first packed coils
    pub fn build_read_coils_response(coils: &[bool]) -> ModbusResult<ModbusPdu> {
        let coils = &coils[..coils.len().min(MAX_READ_COILS)];
        let packed = codec::pack_coils(coils);
        Ok(PduBuilder::new()
            .function_code(FC_READ_COILS)?
            .byte(packed.len() as u8)?
            .data(&packed)?
            .build())
    }

    /// Build a FC05/FC06 response, which echoes address and value
    pub fn build_echo_response(fc: u8, address: u16, value: u16) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(fc)?
            .address(address)?
            .quantity(value)?
            .build())
    }

    /// Build a FC16 response: start address and quantity written
    pub fn build_write_multiple_response(address: u16, quantity: u16) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(address)?
            .quantity(quantity)?
            .build())
    }
}

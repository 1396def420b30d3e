//! Modbus request decoding
//!
//! Only the function codes a heat-recovery unit is polled with are decoded.
//! Anything else surfaces as [`ModbusError::InvalidFunction`], which the
//! responder answers with silence rather than an exception frame.

use std::fmt;

use crate::codec::{decode_registers, read_u16_be};
use crate::constants::{
    FC_READ_COILS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// FC01
    ReadCoils,
    /// FC03
    ReadHoldingRegisters,
    /// FC04
    ReadInputRegisters,
    /// FC05
    WriteSingleCoil,
    /// FC06
    WriteSingleRegister,
    /// FC16
    WriteMultipleRegisters,
}

impl ModbusFunction {
    /// Map a wire function code, `None` when unsupported
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            FC_READ_COILS => Some(Self::ReadCoils),
            FC_READ_HOLDING_REGISTERS => Some(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_REGISTERS => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Wire function code
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadCoils => FC_READ_COILS,
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FC{:02} ({})",
            self.to_u8(),
            ModbusPdu::function_code_description(self.to_u8())
        )
    }
}

/// Decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    /// FC01
    ReadCoils { address: u16, quantity: u16 },
    /// FC03
    ReadHoldingRegisters { address: u16, quantity: u16 },
    /// FC04
    ReadInputRegisters { address: u16, quantity: u16 },
    /// FC05; `value` is kept raw so the response can echo it
    WriteSingleCoil { address: u16, value: u16 },
    /// FC06
    WriteSingleRegister { address: u16, value: u16 },
    /// FC16
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl ModbusRequest {
    /// Decode a request PDU (function code + payload).
    pub fn decode(pdu: &ModbusPdu) -> ModbusResult<Self> {
        let fc = pdu
            .function_code()
            .ok_or_else(|| ModbusError::protocol("Empty PDU"))?;
        let function = ModbusFunction::from_u8(fc).ok_or_else(|| ModbusError::invalid_function(fc))?;
        let payload = pdu.payload();

        let word = |offset: usize| {
            read_u16_be(payload, offset).ok_or_else(|| {
                ModbusError::invalid_data(format!(
                    "{} payload too short: {} bytes",
                    function,
                    payload.len()
                ))
            })
        };

        let request = match function {
            ModbusFunction::ReadCoils => Self::ReadCoils {
                address: word(0)?,
                quantity: word(2)?,
            },
            ModbusFunction::ReadHoldingRegisters => Self::ReadHoldingRegisters {
                address: word(0)?,
                quantity: word(2)?,
            },
            ModbusFunction::ReadInputRegisters => Self::ReadInputRegisters {
                address: word(0)?,
                quantity: word(2)?,
            },
            ModbusFunction::WriteSingleCoil => Self::WriteSingleCoil {
                address: word(0)?,
                value: word(2)?,
            },
            ModbusFunction::WriteSingleRegister => Self::WriteSingleRegister {
                address: word(0)?,
                value: word(2)?,
            },
            ModbusFunction::WriteMultipleRegisters => {
                let address = word(0)?;
                let quantity = word(2)? as usize;
                // the byte count at offset 4 is not trusted; quantity decides
                let data = payload.get(5..5 + quantity * 2).ok_or_else(|| {
                    ModbusError::invalid_data(format!(
                        "{} expects {} values, payload has {} bytes",
                        function,
                        quantity,
                        payload.len()
                    ))
                })?;
                Self::WriteMultipleRegisters {
                    address,
                    values: decode_registers(data),
                }
            }
        };

        Ok(request)
    }

    /// Function code of the request
    pub fn function(&self) -> ModbusFunction {
        match self {
            Self::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Self::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Self::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> ModbusResult<ModbusRequest> {
        ModbusRequest::decode(&ModbusPdu::from_slice(bytes).unwrap())
    }

    #[test]
    fn test_function_code_mapping() {
        for code in [0x01, 0x03, 0x04, 0x05, 0x06, 0x10] {
            assert_eq!(ModbusFunction::from_u8(code).unwrap().to_u8(), code);
        }
        assert_eq!(ModbusFunction::from_u8(0x02), None);
        assert_eq!(ModbusFunction::from_u8(0x0F), None);
    }

    #[test]
    fn test_decode_reads() {
        assert_eq!(
            decode(&[0x03, 0x29, 0xD0, 0x00, 0x02]).unwrap(),
            ModbusRequest::ReadHoldingRegisters {
                address: 10704,
                quantity: 2
            }
        );
        assert_eq!(
            decode(&[0x01, 0x00, 0x1F, 0x00, 0x0A]).unwrap(),
            ModbusRequest::ReadCoils {
                address: 31,
                quantity: 10
            }
        );
    }

    #[test]
    fn test_decode_write_multiple() {
        let request = decode(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]).unwrap();
        assert_eq!(
            request,
            ModbusRequest::WriteMultipleRegisters {
                address: 1,
                values: vec![0x000A, 0x0102]
            }
        );
    }

    #[test]
    fn test_short_payloads_are_invalid_data() {
        assert!(matches!(
            decode(&[0x06, 0x00, 0x01]),
            Err(ModbusError::InvalidData { .. })
        ));
        assert!(matches!(
            decode(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A]),
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            decode(&[0x2B, 0x0E, 0x01, 0x00]),
            Err(ModbusError::InvalidFunction { code: 0x2B })
        ));
    }
}

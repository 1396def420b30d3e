//! # Modbus Codec
//!
//! Conversions between wire payloads and register/coil values, plus the
//! numeric coercions the simulator applies when a floating-point quantity is
//! stored into a 16-bit register.
//!
//! | Conversion | Rule |
//! |------------|------|
//! | coils → bytes | LSB-first within each byte, `ceil(n / 8)` bytes |
//! | bytes → registers | big-endian pairs, trailing odd byte ignored |
//! | `f64` → register | truncate (or round) to integer, wrap to 16 bits |

/// Pack coil states into bytes, first coil in bit 0 of the first byte.
pub fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(coils.len().div_ceil(8));
    let mut current_byte = 0u8;
    let mut bit_index = 0;

    for &value in coils {
        if value {
            current_byte |= 1 << bit_index;
        }
        bit_index += 1;

        if bit_index == 8 {
            packed.push(current_byte);
            current_byte = 0;
            bit_index = 0;
        }
    }

    if bit_index > 0 {
        packed.push(current_byte);
    }

    packed
}

/// Read a big-endian u16 at `offset`, if the slice is long enough.
#[inline]
pub fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decode big-endian register values from a byte slice.
pub fn decode_registers(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Wrap an integer into 16 bits (two's complement for negatives).
#[inline]
pub fn wrap_to_register(value: i64) -> u16 {
    value as u16
}

/// Truncate toward zero, then wrap into 16 bits. NaN stores as 0.
#[inline]
pub fn truncate_to_register(value: f64) -> u16 {
    wrap_to_register(value as i64)
}

/// Round to the nearest integer, then wrap into 16 bits. NaN stores as 0.
#[inline]
pub fn round_to_register(value: f64) -> u16 {
    wrap_to_register(value.round() as i64)
}

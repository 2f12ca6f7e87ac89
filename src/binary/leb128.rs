//! Bounded LEB128 integers. Reading rejects encodings whose final byte's
//! unused bits do not match the sign extension of the most significant used
//! bit, and values outside the bit-width bound. Writing always emits the
//! shortest form.

use super::stream::{Reader, Writer};
use crate::errors::SerializationError;

impl Reader<'_> {
    /// Reads an unsigned LEB128 bounded to `max_bits`.
    pub fn read_var_u(&mut self, max_bits: u32) -> Result<u64, SerializationError> {
        debug_assert!(max_bits <= 64);
        let max_bytes = (max_bits as usize + 6) / 7;
        let mut result: u64 = 0;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let shift = 7 * u32::try_from(i).unwrap();
            let bits_remaining = max_bits - shift;
            if bits_remaining < 7 {
                let unused_mask = 0x7Fu8 << bits_remaining & 0x7F;
                if byte & unused_mask != 0 {
                    return Err(self.malformed("integer too large"));
                }
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(self.malformed("integer representation too long"))
    }

    /// Reads a signed LEB128 bounded to `max_bits`.
    pub fn read_var_s(&mut self, max_bits: u32) -> Result<i64, SerializationError> {
        debug_assert!(max_bits <= 64);
        let max_bytes = (max_bits as usize + 6) / 7;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        for _ in 0..max_bytes {
            let byte = self.read_u8()?;
            let bits_remaining = max_bits - shift;
            if bits_remaining < 7 {
                // The unused bits of the final byte must sign-extend the most
                // significant used bit.
                let sign_bit = 1u8 << (bits_remaining - 1);
                let unused_mask = 0x7Fu8 << bits_remaining & 0x7F;
                let expected = if byte & sign_bit != 0 { unused_mask } else { 0 };
                if byte & unused_mask != expected {
                    return Err(self.malformed("integer too large"));
                }
            }
            result |= u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                let used = shift.min(64);
                #[allow(clippy::cast_possible_wrap)]
                let value = if used < 64 {
                    (result << (64 - used)) as i64 >> (64 - used)
                } else {
                    result as i64
                };
                return Ok(value);
            }
        }
        Err(self.malformed("integer representation too long"))
    }

    pub fn read_var_u32(&mut self) -> Result<u32, SerializationError> {
        Ok(u32::try_from(self.read_var_u(32)?).unwrap())
    }

    pub fn read_var_u64(&mut self) -> Result<u64, SerializationError> {
        self.read_var_u(64)
    }

    pub fn read_var_s32(&mut self) -> Result<i32, SerializationError> {
        Ok(i32::try_from(self.read_var_s(32)?).unwrap())
    }

    pub fn read_var_s33(&mut self) -> Result<i64, SerializationError> {
        self.read_var_s(33)
    }

    pub fn read_var_s64(&mut self) -> Result<i64, SerializationError> {
        self.read_var_s(64)
    }

    /// Reads a single LEB128 byte that must be exactly 0 or 1.
    pub fn read_var_u1(&mut self) -> Result<bool, SerializationError> {
        Ok(self.read_var_u(1)? != 0)
    }
}

impl Writer {
    /// Writes an unsigned LEB128 in its shortest form.
    pub fn write_var_u64(&mut self, mut value: u64) {
        loop {
            let byte = u8::try_from(value & 0x7F).unwrap();
            value >>= 7;
            if value == 0 {
                self.write_u8(byte);
                return;
            }
            self.write_u8(byte | 0x80);
        }
    }

    pub fn write_var_u32(&mut self, value: u32) {
        self.write_var_u64(u64::from(value));
    }

    /// Writes a signed LEB128 in its shortest form: emission stops once the
    /// remaining value equals the sign extension of the last emitted byte's
    /// high bit.
    pub fn write_var_s64(&mut self, mut value: i64) {
        loop {
            let byte = u8::try_from(value & 0x7F).unwrap();
            value >>= 7;
            let sign_extended = if byte & 0x40 != 0 { -1 } else { 0 };
            if value == sign_extended {
                self.write_u8(byte);
                return;
            }
            self.write_u8(byte | 0x80);
        }
    }

    pub fn write_var_s32(&mut self, value: i32) {
        self.write_var_s64(i64::from(value));
    }

    pub fn write_var_s33(&mut self, value: i64) {
        self.write_var_s64(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_u(value: u64, max_bits: u32) {
        let mut writer = Writer::new();
        writer.write_var_u64(value);
        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_var_u(max_bits).unwrap(), value);
        assert!(reader.is_at_end());
    }

    fn round_trip_s(value: i64, max_bits: u32) {
        let mut writer = Writer::new();
        writer.write_var_s64(value);
        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_var_s(max_bits).unwrap(), value);
        assert!(reader.is_at_end());
    }

    #[test]
    fn unsigned_round_trips() {
        for value in [0, 1, 127, 128, 0xFFFF_FFFF] {
            round_trip_u(value, 32);
        }
        round_trip_u(u64::MAX, 64);
    }

    #[test]
    fn signed_round_trips() {
        for value in [0, 1, -1, 63, 64, -64, -65, i64::from(i32::MAX), i64::from(i32::MIN)] {
            round_trip_s(value, 32);
        }
        round_trip_s(i64::MAX, 64);
        round_trip_s(i64::MIN, 64);
    }

    #[test]
    fn padded_zero_is_accepted_within_bound() {
        // 0 encoded in two bytes: allowed as long as the byte count fits.
        let bytes = [0x80, 0x00];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_var_u(32).unwrap(), 0);
    }

    #[test]
    fn overlong_is_rejected() {
        // 6 bytes for a u32.
        let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        let mut reader = Reader::new(&bytes);
        assert!(reader.read_var_u(32).is_err());
    }

    #[test]
    fn unused_bits_are_checked() {
        // Fifth byte of a u32 may only use 4 bits.
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x70];
        let mut reader = Reader::new(&bytes);
        assert!(reader.read_var_u(32).is_err());

        let ok = [0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        let mut reader = Reader::new(&ok);
        assert_eq!(reader.read_var_u(32).unwrap(), 0xFFFF_FFFF);

        // Signed: the unused bits must match the sign.
        let neg_one = [0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut reader = Reader::new(&neg_one);
        assert_eq!(reader.read_var_s(32).unwrap(), -1);

        let bad_sign = [0xFF, 0xFF, 0xFF, 0xFF, 0x4F];
        let mut reader = Reader::new(&bad_sign);
        assert!(reader.read_var_s(32).is_err());
    }
}

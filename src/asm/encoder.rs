//! Byte container for module emission.
//!
//! An append-only list of labeled pieces. Sections whose payload length is
//! only known after the payload is written reserve a size slot up front;
//! patching encodes the accumulated byte count as a varint and accounts for
//! the spliced bytes, so enclosing reservations see them too. Finalization
//! resolves every piece into one contiguous byte array.

use super::wasm::Opcode;
use crate::errors::{CompileError, ErrorKind};

#[derive(Debug)]
enum Piece {
    Bytes {
        label: &'static str,
        bytes: Vec<u8>,
    },
    Size {
        encoded: Option<Vec<u8>>,
    },
}

/// Handle for a reserved size prefix.
#[derive(Debug)]
pub struct SizeReservation {
    piece: usize,
    size_at: usize,
}

#[derive(Debug, Default)]
pub struct Encoder {
    pieces: Vec<Piece>,
    size: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes emitted so far, patched size prefixes included.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn push(&mut self, label: &'static str, bytes: Vec<u8>) {
        self.size += bytes.len();
        self.pieces.push(Piece::Bytes { label, bytes });
    }

    pub fn op(&mut self, opcode: Opcode) {
        self.push("opcode", vec![opcode.byte()]);
    }

    pub fn byte(&mut self, label: &'static str, value: u8) {
        self.push(label, vec![value]);
    }

    pub fn bytes(&mut self, label: &'static str, bytes: &[u8]) {
        self.push(label, bytes.to_vec());
    }

    /// Unsigned LEB128 bounded to 32 bits.
    pub fn uint(&mut self, label: &'static str, value: u64) -> Result<(), CompileError> {
        self.uint_with_bound(label, value, 32)
    }

    /// Unsigned LEB128 with an explicit bit bound; out-of-range values are a
    /// fatal emission error.
    pub fn uint_with_bound(
        &mut self,
        label: &'static str,
        value: u64,
        bits: u32,
    ) -> Result<(), CompileError> {
        if bits < 64 && value >> bits != 0 {
            return Err(CompileError::new(ErrorKind::CodegenIntegerOutOfRange));
        }
        self.push(label, encode_unsigned(value));
        Ok(())
    }

    /// Signed LEB128.
    pub fn sint(&mut self, label: &'static str, value: i64) {
        self.push(label, encode_signed(value));
    }

    /// Length-prefixed UTF-8 string.
    pub fn string(&mut self, label: &'static str, value: &str) -> Result<(), CompileError> {
        self.uint(label, value.len() as u64)?;
        self.push(label, value.as_bytes().to_vec());
        Ok(())
    }

    /// IEEE 754, little-endian.
    pub fn float32(&mut self, label: &'static str, value: f32) {
        self.push(label, value.to_le_bytes().to_vec());
    }

    pub fn float64(&mut self, label: &'static str, value: f64) {
        self.push(label, value.to_le_bytes().to_vec());
    }

    /// Reserves a size prefix whose value becomes the number of bytes
    /// emitted between this call and the matching `patch_size`.
    pub fn reserve_size(&mut self) -> SizeReservation {
        let piece = self.pieces.len();
        self.pieces.push(Piece::Size { encoded: None });
        SizeReservation {
            piece,
            size_at: self.size,
        }
    }

    pub fn patch_size(&mut self, reservation: SizeReservation) {
        let payload = self.size - reservation.size_at;
        let encoded = encode_unsigned(payload as u64);
        self.size += encoded.len();
        self.pieces[reservation.piece] = Piece::Size {
            encoded: Some(encoded),
        };
    }

    /// Resolves every piece into a contiguous byte array.
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size);
        for piece in self.pieces {
            match piece {
                Piece::Bytes { bytes: b, .. } => bytes.extend_from_slice(&b),
                Piece::Size { encoded: Some(b) } => bytes.extend_from_slice(&b),
                Piece::Size { encoded: None } => panic!("unpatched size reservation"),
            }
        }
        bytes
    }

    /// Labeled writes for external annotation tooling.
    pub fn annotations(&self) -> impl Iterator<Item = (&'static str, &[u8])> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Bytes { label, bytes } => Some((*label, bytes.as_slice())),
            Piece::Size { .. } => None,
        })
    }
}

pub fn encode_unsigned(mut value: u64) -> Vec<u8> {
    let mut bytes = vec![];
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        bytes.push(byte);
        if value == 0 {
            return bytes;
        }
    }
}

pub fn encode_signed(mut value: i64) -> Vec<u8> {
    let mut bytes = vec![];
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        bytes.push(if done { byte } else { byte | 0x80 });
        if done {
            return bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_unsigned(bytes: &[u8]) -> u64 {
        let mut value = 0u64;
        for (i, &byte) in bytes.iter().enumerate() {
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                break;
            }
        }
        value
    }

    fn decode_signed(bytes: &[u8]) -> i64 {
        let mut value = 0i64;
        let mut shift = 0;
        for &byte in bytes {
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                break;
            }
        }
        value
    }

    #[test]
    fn unsigned_vectors() {
        assert_eq!(encode_unsigned(0), [0x00]);
        assert_eq!(encode_unsigned(127), [0x7f]);
        assert_eq!(encode_unsigned(128), [0x80, 0x01]);
        assert_eq!(encode_unsigned(624485), [0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn signed_vectors() {
        assert_eq!(encode_signed(0), [0x00]);
        assert_eq!(encode_signed(-1), [0x7f]);
        assert_eq!(encode_signed(63), [0x3f]);
        assert_eq!(encode_signed(-64), [0x40]);
        assert_eq!(encode_signed(64), [0xc0, 0x00]);
        assert_eq!(encode_signed(-123456), [0xc0, 0xbb, 0x78]);
    }

    #[test]
    fn leb128_round_trip() {
        for value in [0u64, 1, 127, 128, 255, 624485, u32::MAX as u64, u64::MAX] {
            assert_eq!(decode_unsigned(&encode_unsigned(value)), value);
        }
        for value in [0i64, 1, -1, 63, -64, 64, 624485, -624485, i64::MIN, i64::MAX] {
            assert_eq!(decode_signed(&encode_signed(value)), value);
        }
    }

    #[test]
    fn uint_bound_is_fatal() {
        let mut enc = Encoder::new();
        assert!(enc.uint("ok", u32::MAX as u64).is_ok());
        assert!(enc.uint("too big", u32::MAX as u64 + 1).is_err());
        assert!(enc
            .uint_with_bound("wide", u32::MAX as u64 + 1, 64)
            .is_ok());
        assert!(enc.uint_with_bound("one bit", 2, 1).is_err());
    }

    #[test]
    fn size_patching() {
        let mut enc = Encoder::new();
        enc.byte("id", 0x01);
        let size = enc.reserve_size();
        enc.bytes("payload", &[1, 2, 3, 4]);
        enc.patch_size(size);

        assert_eq!(enc.finish(), vec![0x01, 0x04, 1, 2, 3, 4]);
    }

    #[test]
    fn nested_size_patching_accounts_for_spliced_bytes() {
        // The outer payload includes the inner size prefix.
        let mut enc = Encoder::new();
        let outer = enc.reserve_size();
        let inner = enc.reserve_size();
        enc.bytes("payload", &[0xaa; 130]);
        enc.patch_size(inner);
        enc.patch_size(outer);

        let bytes = enc.finish();
        // Inner: 130 => [0x82, 0x01]; outer: 130 + 2 = 132 => [0x84, 0x01].
        assert_eq!(&bytes[..4], &[0x84, 0x01, 0x82, 0x01]);
        assert_eq!(bytes.len(), 134);
    }

    #[test]
    fn strings_and_floats() {
        let mut enc = Encoder::new();
        enc.string("name", "plus").unwrap();
        enc.float32("f", 1.0);
        enc.float64("g", 1.0);

        assert_eq!(
            enc.finish(),
            vec![
                0x04, b'p', b'l', b'u', b's', // "plus"
                0x00, 0x00, 0x80, 0x3f, // 1.0f32
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f, // 1.0f64
            ]
        );
    }

    #[test]
    fn opcode_labels_are_annotated() {
        let mut enc = Encoder::new();
        enc.op(Opcode::I32Add);
        enc.byte("count", 1);

        let annotations: Vec<_> = enc.annotations().collect();
        assert_eq!(annotations[0], ("opcode", &[0x6a][..]));
        assert_eq!(annotations[1], ("count", &[0x01][..]));
    }
}

//! Message Framer
//!
//! Layout (little-endian):
//! ┌──────────────────────────────────────────────────────┐
//! │ object id (u32) │ opcode (u16) │ size (u16)          │
//! ├──────────────────────────────────────────────────────┤
//! │ payload, size - 8 bytes, kelipatan 4                 │
//! └──────────────────────────────────────────────────────┘
//!
//! `size` sudah termasuk header. Stream boleh dipotong di byte mana pun;
//! framer menahan sisa potongan sampai frame lengkap.

use crate::error::FramingError;

pub const HEADER_SIZE: usize = 8;

/// Largest size representable in the 16-bit field while staying 4-aligned.
pub const MAX_MESSAGE_SIZE: usize = 0xfffc;

/// Message header, dibaca per field (tanpa cast pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object: u32,
    pub opcode: u16,
    /// Total size including the header.
    pub size: u16,
}

impl MessageHeader {
    #[inline(always)]
    pub fn new(object: u32, opcode: u16, size: u16) -> Self {
        Self {
            object,
            opcode,
            size,
        }
    }

    #[inline(always)]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..HEADER_SIZE)?;
        Some(Self {
            object: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            opcode: u16::from_le_bytes([b[4], b[5]]),
            size: u16::from_le_bytes([b[6], b[7]]),
        })
    }

    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.object.to_le_bytes());
        out[4..6].copy_from_slice(&self.opcode.to_le_bytes());
        out[6..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Validasi size terhadap aturan wire dan limit lokal.
    #[inline(always)]
    pub fn validate(&self, max_size: usize) -> Result<(), FramingError> {
        let size = self.size;
        if (size as usize) < HEADER_SIZE {
            return Err(FramingError::SizeTooSmall { size });
        }
        if size % 4 != 0 {
            return Err(FramingError::Misaligned { size });
        }
        if size as usize > max_size {
            return Err(FramingError::TooLarge {
                size: size as usize,
                max: max_size,
            });
        }
        Ok(())
    }

    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}

/// One complete frame, borrowed from the framer's buffer.
#[derive(Debug)]
pub struct Frame<'a> {
    pub header: MessageHeader,
    /// Byte offset of the header in the inbound stream.
    pub offset: u64,
    pub payload: &'a [u8],
}

/// Reassembles frames from arbitrarily chunked input.
pub struct Framer {
    buffer: Vec<u8>,
    read_pos: usize,
    // Total byte yang sudah di-frame sejak awal stream
    consumed: u64,
    max_message_size: usize,
}

impl Framer {
    pub fn new(capacity: usize, max_message_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            read_pos: 0,
            consumed: 0,
            max_message_size: max_message_size.min(MAX_MESSAGE_SIZE),
        }
    }

    /// Append raw input.
    pub fn push(&mut self, data: &[u8]) {
        // Compact: geser sisa data ke awal buffer
        if self.read_pos > 0 && self.read_pos >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Next complete frame, `Ok(None)` if more input is needed.
    ///
    /// Header divalidasi begitu 8 byte tersedia, tanpa menunggu payload.
    #[inline(always)]
    pub fn next_frame(&mut self) -> Result<Option<Frame<'_>>, FramingError> {
        let available = &self.buffer[self.read_pos..];
        let Some(header) = MessageHeader::from_bytes(available) else {
            return Ok(None);
        };
        header.validate(self.max_message_size)?;

        let size = header.size as usize;
        if available.len() < size {
            return Ok(None);
        }

        let start = self.read_pos;
        let offset = self.consumed;
        self.read_pos += size;
        self.consumed += size as u64;

        Ok(Some(Frame {
            header,
            offset,
            payload: &self.buffer[start + HEADER_SIZE..start + size],
        }))
    }

    /// Header of the next frame, once its 8 bytes have arrived.
    #[inline(always)]
    pub fn peek_header(&self) -> Option<MessageHeader> {
        MessageHeader::from_bytes(&self.buffer[self.read_pos..])
    }

    /// Stream offset of the next (possibly incomplete) frame.
    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.consumed
    }

    /// Buffered bytes not yet returned as frames.
    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// Outbound frame buffer.
///
/// Frame ditulis ke buffer internal; transport mengambil byte dari depan
/// (`as_bytes` + `consume`) tanpa alokasi per pesan.
pub struct Encoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Encoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Append one frame. `payload` must already be 4-byte aligned.
    ///
    /// Returns slice ke frame yang baru ditulis.
    #[inline(always)]
    pub fn encode(
        &mut self,
        object: u32,
        opcode: u16,
        payload: &[u8],
    ) -> Result<&[u8], FramingError> {
        let total = HEADER_SIZE + payload.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(FramingError::TooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let size = total as u16;
        if size % 4 != 0 {
            return Err(FramingError::Misaligned { size });
        }

        let start = self.buffer.len();
        self.buffer
            .extend_from_slice(&MessageHeader::new(object, opcode, size).to_bytes());
        self.buffer.extend_from_slice(payload);
        Ok(&self.buffer[start..])
    }

    /// Bytes waiting to be written.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.read_pos..]
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `n` bytes as written.
    pub fn consume(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.buffer.len());
        if self.read_pos == self.buffer.len() {
            self.reset();
        }
    }

    /// Take every pending byte.
    pub fn take(&mut self) -> Vec<u8> {
        let out = self.as_bytes().to_vec();
        self.reset();
        out
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = MessageHeader::new(5, 2, 12);
        assert_eq!(header.to_bytes(), [5, 0, 0, 0, 2, 0, 12, 0]);
        assert_eq!(MessageHeader::from_bytes(&header.to_bytes()), Some(header));
        assert_eq!(MessageHeader::from_bytes(&[0; 7]), None);
    }

    #[test]
    fn test_encode_decode_single() {
        let mut encoder = Encoder::new(64);
        encoder.encode(7, 1, &[1, 2, 3, 4]).unwrap();

        let mut framer = Framer::new(64, MAX_MESSAGE_SIZE);
        framer.push(encoder.as_bytes());
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.header, MessageHeader::new(7, 1, 12));
        assert_eq!(frame.payload, &[1, 2, 3, 4]);
        assert_eq!(frame.offset, 0);
        assert!(framer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut encoder = Encoder::new(64);
        encoder.encode(1, 0, &[]).unwrap();
        encoder.encode(2, 3, &[9; 8]).unwrap();
        let bytes = encoder.take();
        assert!(encoder.is_empty());

        let mut framer = Framer::new(4, MAX_MESSAGE_SIZE);
        let mut seen = Vec::new();
        for b in &bytes {
            framer.push(std::slice::from_ref(b));
            while let Some(frame) = framer.next_frame().unwrap() {
                seen.push((frame.header.object, frame.offset, frame.payload.len()));
            }
        }
        assert_eq!(seen, vec![(1, 0, 0), (2, 8, 8)]);
        assert_eq!(framer.offset(), 24);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_bad_sizes() {
        let mut framer = Framer::new(16, MAX_MESSAGE_SIZE);
        framer.push(&MessageHeader::new(1, 0, 0).to_bytes());
        assert_eq!(framer.next_frame().unwrap_err(), FramingError::SizeTooSmall { size: 0 });

        let mut framer = Framer::new(16, MAX_MESSAGE_SIZE);
        framer.push(&MessageHeader::new(1, 0, 10).to_bytes());
        assert_eq!(framer.next_frame().unwrap_err(), FramingError::Misaligned { size: 10 });

        let mut framer = Framer::new(16, 64);
        framer.push(&MessageHeader::new(1, 0, 128).to_bytes());
        assert!(matches!(framer.next_frame(), Err(FramingError::TooLarge { size: 128, max: 64 })));
    }

    #[test]
    fn test_encoder_rejects_unaligned_payload() {
        let mut encoder = Encoder::new(16);
        assert_eq!(
            encoder.encode(1, 0, &[1, 2, 3]).unwrap_err(),
            FramingError::Misaligned { size: 11 }
        );
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_partial_consume() {
        let mut encoder = Encoder::new(16);
        encoder.encode(1, 0, &[]).unwrap();
        encoder.consume(3);
        assert_eq!(encoder.len(), 5);
        assert_eq!(encoder.as_bytes(), &[0, 0, 0, 8, 0][..]);
        encoder.consume(5);
        assert!(encoder.is_empty());
    }
}

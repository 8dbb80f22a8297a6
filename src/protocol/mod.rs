//! Protocol Layer: framing + argument codec
//!
//! Prinsip desain:
//! - Fixed 8-byte header, payload 4-byte aligned
//! - Decode divalidasi penuh sebelum object table disentuh
//! - Encode ke buffer yang di-reuse, bukan alokasi per pesan

mod codec;
mod message;

pub use codec::{
    decode_args, encode_args, new_id_versions, register_new_ids, Arg, CallDisplay, Fixed,
};
pub use message::{Encoder, Frame, Framer, MessageHeader, HEADER_SIZE, MAX_MESSAGE_SIZE};

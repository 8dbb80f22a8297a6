//! Type Codec: field values <-> 32-bit aligned words
//!
//! Aturan wire (little-endian):
//! - i32/u32/enum: 1 word
//! - fixed: 1 word, value = raw / 2^frac_bits
//! - pod(u64)/pod(f64): 2 word, low word dulu, tanpa konversi
//! - str: length (termasuk NUL, 0 = null) + bytes + NUL + padding
//! - array: length + bytes + padding
//! - object / new id: 1 word id (0 = null)

use std::collections::HashSet;
use std::fmt;

use crate::core::{ObjectId, ObjectTable, Target};
use crate::error::{CodecError, ErrorKind, ObjectError, SendError};
use crate::schema::{
    Field, FieldType, InterfaceId, MessageDef, NewIdVersion, ObjectType, PodKind, Schema,
};

/// Signed fixed-point number with a per-field fractional bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed {
    raw: i32,
    frac_bits: u8,
}

impl Fixed {
    /// 24.8, the default wire precision.
    pub const fn from_raw(raw: i32) -> Self {
        Self { raw, frac_bits: 8 }
    }

    pub const fn from_raw_bits(raw: i32, frac_bits: u8) -> Self {
        Self { raw, frac_bits }
    }

    /// Saturates outside the 24.8 range (|v| >= 2^23).
    pub fn from_int(v: i32) -> Self {
        let raw = (v as i64) << 8;
        Self::from_raw(raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    pub fn from_f64(v: f64) -> Self {
        Self::from_f64_bits(v, 8)
    }

    /// Rounds to the nearest representable value, saturating at the i32 range.
    pub fn from_f64_bits(v: f64, frac_bits: u8) -> Self {
        let scaled = (v * (1u64 << frac_bits) as f64).round();
        Self {
            raw: scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            frac_bits,
        }
    }

    #[inline(always)]
    pub fn raw(self) -> i32 {
        self.raw
    }

    #[inline(always)]
    pub fn frac_bits(self) -> u8 {
        self.frac_bits
    }

    pub fn to_f64(self) -> f64 {
        self.raw as f64 / (1u64 << self.frac_bits) as f64
    }

    /// Same value at a different precision.
    pub fn rescale(self, frac_bits: u8) -> Self {
        if frac_bits == self.frac_bits {
            return self;
        }
        let raw = if frac_bits > self.frac_bits {
            (self.raw as i64) << (frac_bits - self.frac_bits)
        } else {
            (self.raw as i64) >> (self.frac_bits - frac_bits)
        };
        Self {
            raw: raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            frac_bits,
        }
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// One decoded (or to-be-encoded) argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    U64(u64),
    F64(f64),
    Str(Option<String>),
    Array(Vec<u8>),
    Object(Option<ObjectId>),
    NewId(ObjectId),
}

impl Arg {
    pub fn str(s: impl Into<String>) -> Self {
        Arg::Str(Some(s.into()))
    }

    pub fn object(id: ObjectId) -> Self {
        Arg::Object(Some(id))
    }

    /// Array of native u32 words, the most common element interpretation.
    pub fn words(words: &[u32]) -> Self {
        Arg::Array(words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Arg::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<Fixed> {
        match self {
            Arg::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[u8]> {
        match self {
            Arg::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Array reinterpreted as little-endian u32 words (trailing bytes ignored).
    pub fn as_words(&self) -> Option<Vec<u32>> {
        self.as_array().map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
    }

    /// Object reference or new id.
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Arg::Object(id) => *id,
            Arg::NewId(id) => Some(*id),
            _ => None,
        }
    }
}

#[inline(always)]
fn padded(len: usize) -> usize {
    (len + 3) & !3
}

#[inline(always)]
fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes_padded(out: &mut Vec<u8>, len_word: u32, bytes: &[u8], nul: bool) {
    put_u32(out, len_word);
    out.extend_from_slice(bytes);
    if nul {
        out.push(0);
    }
    let written = bytes.len() + nul as usize;
    out.resize(out.len() + (padded(written) - written), 0);
}

fn mismatch(field: &Field) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected: field.ty.describe(),
    }
}

/// Encode `args` against `def` into `out`.
///
/// Semua argumen divalidasi (tipe, referensi object, new id milik sisi lokal)
/// sebelum return; kalau gagal, isi `out` tidak boleh dipakai.
pub fn encode_args(
    schema: &Schema,
    def: &MessageDef,
    args: &[Arg],
    objects: &ObjectTable,
    out: &mut Vec<u8>,
) -> Result<(), SendError> {
    if args.len() != def.fields.len() {
        return Err(CodecError::ArgCount {
            expected: def.fields.len(),
            found: args.len(),
        }
        .into());
    }

    let mut new_ids = HashSet::new();
    for (field, arg) in def.fields.iter().zip(args) {
        match (&field.ty, arg) {
            (FieldType::Int, Arg::Int(v)) => put_u32(out, *v as u32),
            (FieldType::Uint, Arg::Uint(v)) => put_u32(out, *v),
            (FieldType::Fixed { frac_bits }, Arg::Fixed(v)) => {
                put_u32(out, v.rescale(*frac_bits).raw() as u32)
            }
            (FieldType::Pod(PodKind::U64), Arg::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (FieldType::Pod(PodKind::F64), Arg::F64(v)) => {
                out.extend_from_slice(&v.to_bits().to_le_bytes())
            }
            (FieldType::Str { nullable }, Arg::Str(s)) => match s {
                None if *nullable => put_u32(out, 0),
                None => {
                    return Err(CodecError::UnexpectedNull {
                        field: field.name.clone(),
                    }
                    .into())
                }
                Some(s) => {
                    if s.as_bytes().contains(&0) {
                        return Err(CodecError::InteriorNul {
                            field: field.name.clone(),
                        }
                        .into());
                    }
                    put_bytes_padded(out, (s.len() + 1) as u32, s.as_bytes(), true);
                }
            },
            (FieldType::Array { .. }, Arg::Array(bytes)) => {
                put_bytes_padded(out, bytes.len() as u32, bytes, false)
            }
            (FieldType::Object { target, nullable }, Arg::Object(id)) => match id {
                None if *nullable => put_u32(out, 0),
                None => {
                    return Err(CodecError::UnexpectedNull {
                        field: field.name.clone(),
                    }
                    .into())
                }
                Some(id) => {
                    // Referensi untyped bersifat opaque di sisi pengirim
                    if let ObjectType::Named(expected) = target {
                        let obj = objects.lookup(*id).map_err(|_| CodecError::UnknownObject {
                            field: field.name.clone(),
                            id: *id,
                        })?;
                        check_interface(schema, field, *id, expected, obj.interface)?;
                    }
                    put_u32(out, id.raw());
                }
            },
            (FieldType::NewId { .. }, Arg::NewId(id)) => {
                if id.owner() != objects.role() {
                    return Err(ObjectError::OutOfRange(*id).into());
                }
                objects.check_free(*id)?;
                if !new_ids.insert(*id) {
                    return Err(ObjectError::AlreadyLive(*id).into());
                }
                put_u32(out, id.raw());
            }
            _ => return Err(mismatch(field).into()),
        }
    }
    Ok(())
}

fn check_interface(
    schema: &Schema,
    field: &Field,
    id: ObjectId,
    expected: &str,
    found: InterfaceId,
) -> Result<(), CodecError> {
    let found = &schema.interface(found).name;
    if found != expected {
        return Err(CodecError::WrongInterface {
            field: field.name.clone(),
            id,
            expected: expected.to_string(),
            found: found.clone(),
        });
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline(always)]
    fn take(&mut self, field: &Field, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(CodecError::Truncated {
                field: field.name.clone(),
                needed: n,
                available,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    #[inline(always)]
    fn u32(&mut self, field: &Field) -> Result<u32, CodecError> {
        let b = self.take(field, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline(always)]
    fn u64(&mut self, field: &Field) -> Result<u64, CodecError> {
        let lo = self.u32(field)? as u64;
        let hi = self.u32(field)? as u64;
        Ok(lo | (hi << 32))
    }

    /// Length-prefixed blob; returns the unpadded bytes.
    fn blob(&mut self, field: &Field) -> Result<&'a [u8], CodecError> {
        let len = self.u32(field)? as usize;
        let body = self.take(field, padded(len))?;
        Ok(&body[..len])
    }
}

/// Decode an inbound payload against `def`.
///
/// Object references are checked against `objects` (live or zombie, with the
/// declared interface); new ids must lie in the peer's range and be free.
/// Nothing is registered here; see [`register_new_ids`].
pub fn decode_args(
    schema: &Schema,
    def: &MessageDef,
    payload: &[u8],
    objects: &ObjectTable,
) -> Result<Vec<Arg>, ErrorKind> {
    let mut reader = Reader { buf: payload, pos: 0 };
    let mut args = Vec::with_capacity(def.fields.len());
    let mut new_ids = HashSet::new();

    for field in &def.fields {
        let arg = match &field.ty {
            FieldType::Int => Arg::Int(reader.u32(field)? as i32),
            FieldType::Uint => Arg::Uint(reader.u32(field)?),
            FieldType::Fixed { frac_bits } => {
                Arg::Fixed(Fixed::from_raw_bits(reader.u32(field)? as i32, *frac_bits))
            }
            FieldType::Pod(PodKind::U64) => Arg::U64(reader.u64(field)?),
            FieldType::Pod(PodKind::F64) => Arg::F64(f64::from_bits(reader.u64(field)?)),
            FieldType::Str { nullable } => {
                let bytes = reader.blob(field)?;
                match bytes.split_last() {
                    None if *nullable => Arg::Str(None),
                    None => {
                        return Err(CodecError::UnexpectedNull {
                            field: field.name.clone(),
                        }
                        .into())
                    }
                    Some((&last, body)) => {
                        if last != 0 {
                            return Err(CodecError::MissingNul {
                                field: field.name.clone(),
                            }
                            .into());
                        }
                        if body.contains(&0) {
                            return Err(CodecError::InteriorNul {
                                field: field.name.clone(),
                            }
                            .into());
                        }
                        let s = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8 {
                            field: field.name.clone(),
                        })?;
                        Arg::Str(Some(s.to_owned()))
                    }
                }
            }
            FieldType::Array { .. } => Arg::Array(reader.blob(field)?.to_vec()),
            FieldType::Object { target, nullable } => {
                let raw = reader.u32(field)?;
                match ObjectId::new(raw) {
                    None if *nullable => Arg::Object(None),
                    None => {
                        return Err(CodecError::UnexpectedNull {
                            field: field.name.clone(),
                        }
                        .into())
                    }
                    // Referensi untyped opaque, sama seperti di encode: error
                    // report boleh menyebut id yang tidak dikenal penerima
                    Some(id) => {
                        if let ObjectType::Named(expected) = target {
                            let obj = match objects.resolve(id) {
                                Ok(Target::Live(obj)) | Ok(Target::Zombie(obj)) => obj,
                                Err(_) => {
                                    return Err(CodecError::UnknownObject {
                                        field: field.name.clone(),
                                        id,
                                    }
                                    .into())
                                }
                            };
                            check_interface(schema, field, id, expected, obj.interface)?;
                        }
                        Arg::Object(Some(id))
                    }
                }
            }
            FieldType::NewId { .. } => {
                let raw = reader.u32(field)?;
                let id = ObjectId::new(raw).ok_or_else(|| CodecError::UnexpectedNull {
                    field: field.name.clone(),
                })?;
                if id.owner() != objects.role().peer() {
                    return Err(ObjectError::OutOfRange(id).into());
                }
                objects.check_free(id)?;
                if !new_ids.insert(id) {
                    return Err(ObjectError::AlreadyLive(id).into());
                }
                Arg::NewId(id)
            }
        };
        args.push(arg);
    }

    if reader.pos != payload.len() {
        return Err(CodecError::TrailingBytes {
            count: payload.len() - reader.pos,
        }
        .into());
    }
    Ok(args)
}

/// Compute the negotiated version of every new id in `args`, checking
/// `version = field` sources against the target interface.
pub fn new_id_versions(
    schema: &Schema,
    def: &MessageDef,
    args: &[Arg],
    parent_version: u32,
) -> Result<Vec<(ObjectId, InterfaceId, u32)>, CodecError> {
    let mut out = Vec::new();
    for (field, arg) in def.fields.iter().zip(args) {
        let (FieldType::NewId { target, version }, Arg::NewId(id)) = (&field.ty, arg) else {
            continue;
        };
        // Schema::new sudah menjamin target terdaftar
        let Some(iface_id) = schema.interface_id(target) else {
            continue;
        };
        let iface = schema.interface(iface_id);
        let v = match version {
            NewIdVersion::Inherit => parent_version.min(iface.version),
            NewIdVersion::FromField(source) => {
                let requested = def
                    .field_index(source)
                    .and_then(|i| args.get(i))
                    .and_then(Arg::as_uint)
                    .unwrap_or(0);
                if requested == 0 || requested > iface.version {
                    return Err(CodecError::BadNewIdVersion {
                        field: field.name.clone(),
                        interface: iface.name.clone(),
                        requested,
                        max: iface.version,
                    });
                }
                requested
            }
        };
        out.push((*id, iface_id, v));
    }
    Ok(out)
}

/// Register the new ids carried by a message. Call only after
/// [`decode_args`] / [`encode_args`] accepted the argument set.
pub fn register_new_ids(
    objects: &mut ObjectTable,
    new_ids: &[(ObjectId, InterfaceId, u32)],
) -> Result<(), ObjectError> {
    for &(id, iface, version) in new_ids {
        objects.allocate(iface, version, Some(id))?;
    }
    Ok(())
}

/// `toplevel#5.set_fullscreen(output#7)`, untuk message tracing.
pub struct CallDisplay<'a> {
    pub interface: &'a str,
    pub object: ObjectId,
    pub def: &'a MessageDef,
    pub args: &'a [Arg],
}

impl fmt::Display for CallDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}.{}(", self.interface, self.object, self.def.name)?;
        for (i, (field, arg)) in self.def.fields.iter().zip(self.args).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match (arg, &field.ty) {
                (Arg::Int(v), _) => write!(f, "{}", v)?,
                (Arg::Uint(v), _) => write!(f, "{}", v)?,
                (Arg::Fixed(v), _) => write!(f, "{}", v)?,
                (Arg::U64(v), _) => write!(f, "{}", v)?,
                (Arg::F64(v), _) => write!(f, "{}", v)?,
                (Arg::Str(Some(s)), _) => write!(f, "{:?}", s)?,
                (Arg::Array(bytes), _) => write!(f, "array[{}]", bytes.len())?,
                (Arg::Str(None), _) | (Arg::Object(None), _) => write!(f, "null")?,
                (Arg::Object(Some(id)), FieldType::Object { target: ObjectType::Named(t), .. }) => {
                    write!(f, "{}#{}", t, id)?
                }
                (Arg::Object(Some(id)), _) => write!(f, "object#{}", id)?,
                (Arg::NewId(id), FieldType::NewId { target, .. }) => {
                    write!(f, "new {}#{}", target, id)?
                }
                (Arg::NewId(id), _) => write!(f, "new #{}", id)?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::schema::Direction;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const SRC: &str = r#"
        interface output { }
        interface toplevel (version = 3) {
            request set_fullscreen (since = 2) { output: id(output) }
            request set_title { title: str, subtitle: str (nullable) }
            request misc {
                x: i32, y: u32, scale: fixed, fine: fixed(16),
                serial: pod(u64), ratio: pod(f64), states: array(u32),
            }
            request get_child { id: id(toplevel) (new) }
        }
    "#;

    fn setup(role: Role) -> (Schema, ObjectTable) {
        let schema = Schema::from_source(SRC).unwrap();
        (schema, ObjectTable::new(role))
    }

    fn def<'a>(schema: &'a Schema, name: &str) -> &'a MessageDef {
        schema
            .find_interface("toplevel")
            .unwrap()
            .find(crate::schema::Direction::Request, name)
            .unwrap()
    }

    #[test]
    fn test_string_layout_and_padding() {
        let (schema, objects) = setup(Role::Client);
        let mut out = Vec::new();
        let args = [Arg::str("abc"), Arg::Str(None)];
        encode_args(&schema, def(&schema, "set_title"), &args, &objects, &mut out).unwrap();

        // "abc\0" pas 4 byte, null string cuma length word
        assert_eq!(out, [4, 0, 0, 0, b'a', b'b', b'c', 0, 0, 0, 0, 0]);

        let mut out = Vec::new();
        let args = [Arg::str("abcd"), Arg::str("")];
        encode_args(&schema, def(&schema, "set_title"), &args, &objects, &mut out).unwrap();
        assert_eq!(out.len(), 4 + 8 + 4 + 4);
        assert_eq!(&out[0..4], &5u32.to_le_bytes());
        assert_eq!(&out[12..16], &1u32.to_le_bytes());
    }

    #[test]
    fn test_misc_roundtrip() {
        let (schema, objects) = setup(Role::Client);
        let d = def(&schema, "misc");
        let args = vec![
            Arg::Int(-7),
            Arg::Uint(u32::MAX),
            Arg::Fixed(Fixed::from_f64(1.5)),
            Arg::Fixed(Fixed::from_f64_bits(-0.25, 16)),
            Arg::U64(0x1122_3344_5566_7788),
            Arg::F64(3.25),
            Arg::words(&[1, 2, 3]),
        ];
        let mut out = Vec::new();
        encode_args(&schema, d, &args, &objects, &mut out).unwrap();
        assert_eq!(out.len() % 4, 0);

        // pod(u64): low word dulu
        assert_eq!(&out[16..20], &0x5566_7788u32.to_le_bytes());
        assert_eq!(&out[20..24], &0x1122_3344u32.to_le_bytes());

        let decoded = decode_args(&schema, d, &out, &ObjectTable::new(Role::Server)).unwrap();
        assert_eq!(decoded, args);
        assert_eq!(decoded[6].as_words(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_fixed_rescaled_to_field_precision() {
        let (schema, objects) = setup(Role::Client);
        let d = def(&schema, "misc");
        let args = vec![
            Arg::Int(0),
            Arg::Uint(0),
            Arg::Fixed(Fixed::from_f64_bits(2.0, 16)),
            Arg::Fixed(Fixed::from_f64(0.5)),
            Arg::U64(0),
            Arg::F64(0.0),
            Arg::Array(vec![]),
        ];
        let mut out = Vec::new();
        encode_args(&schema, d, &args, &objects, &mut out).unwrap();
        assert_eq!(&out[8..12], &512i32.to_le_bytes());
        assert_eq!(&out[12..16], &32768i32.to_le_bytes());
    }

    #[test]
    fn test_fixed_from_int_saturates() {
        assert_eq!(Fixed::from_int(3).raw(), 768);
        assert_eq!(Fixed::from_int(-3).to_f64(), -3.0);
        assert_eq!(Fixed::from_int(1 << 23).raw(), i32::MAX);
        assert_eq!(Fixed::from_int(i32::MAX).raw(), i32::MAX);
        assert_eq!(Fixed::from_int(i32::MIN).raw(), i32::MIN);
    }

    #[test]
    fn test_truncated_string_length() {
        let (schema, objects) = setup(Role::Server);
        let mut payload = Vec::new();
        put_u32(&mut payload, 100);
        payload.extend_from_slice(b"abc\0");
        let err = decode_args(&schema, def(&schema, "set_title"), &payload, &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_utf8_and_missing_nul() {
        let (schema, objects) = setup(Role::Server);
        let d = def(&schema, "set_title");

        let mut payload = Vec::new();
        put_bytes_padded(&mut payload, 3, &[0xff, 0xfe], true);
        put_u32(&mut payload, 0);
        let err = decode_args(&schema, d, &payload, &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::InvalidUtf8 { .. })));

        let mut payload = Vec::new();
        put_bytes_padded(&mut payload, 4, b"abcd", false);
        put_u32(&mut payload, 0);
        let err = decode_args(&schema, d, &payload, &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::MissingNul { .. })));
    }

    #[test]
    fn test_null_for_non_nullable_string() {
        let (schema, objects) = setup(Role::Server);
        let payload = [0u8; 8];
        let err = decode_args(&schema, def(&schema, "set_title"), &payload, &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::UnexpectedNull { .. })));
    }

    #[test]
    fn test_object_reference_checks() {
        let (schema, mut objects) = setup(Role::Server);
        let output = schema.interface_id("output").unwrap();
        let toplevel = schema.interface_id("toplevel").unwrap();
        let out_id = objects.allocate(output, 1, ObjectId::new(7)).unwrap();
        let top_id = objects.allocate(toplevel, 1, ObjectId::new(8)).unwrap();
        let d = def(&schema, "set_fullscreen");

        let args = decode_args(&schema, d, &out_id.raw().to_le_bytes(), &objects).unwrap();
        assert_eq!(args, vec![Arg::object(out_id)]);

        let err = decode_args(&schema, d, &top_id.raw().to_le_bytes(), &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::WrongInterface { .. })));

        let err = decode_args(&schema, d, &99u32.to_le_bytes(), &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::UnknownObject { .. })));

        let err = decode_args(&schema, d, &0u32.to_le_bytes(), &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Codec(CodecError::UnexpectedNull { .. })));
    }

    #[test]
    fn test_new_id_must_come_from_peer_range() {
        let (schema, objects) = setup(Role::Server);
        let d = def(&schema, "get_child");

        let args = decode_args(&schema, d, &5u32.to_le_bytes(), &objects).unwrap();
        assert_eq!(args, vec![Arg::NewId(ObjectId::new(5).unwrap())]);

        let err = decode_args(&schema, d, &0xff00_0001u32.to_le_bytes(), &objects).unwrap_err();
        assert!(matches!(err, ErrorKind::Object(ObjectError::OutOfRange(_))));
    }

    #[test]
    fn test_new_id_version_inherits_parent() {
        let (schema, _) = setup(Role::Server);
        let d = def(&schema, "get_child");
        let id = ObjectId::new(5).unwrap();
        let versions = new_id_versions(&schema, d, &[Arg::NewId(id)], 2).unwrap();
        assert_eq!(versions[0].0, id);
        assert_eq!(versions[0].2, 2);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let (schema, objects) = setup(Role::Server);
        let payload = [5, 0, 0, 0, 0, 0, 0, 0];
        let err = decode_args(&schema, def(&schema, "get_child"), &payload, &objects).unwrap_err();
        assert_eq!(err, ErrorKind::Codec(CodecError::TrailingBytes { count: 4 }));
    }

    #[test]
    fn test_encode_type_mismatch_and_arity() {
        let (schema, objects) = setup(Role::Client);
        let mut out = Vec::new();
        let d = def(&schema, "set_title");
        let err = encode_args(&schema, d, &[Arg::Uint(1), Arg::Str(None)], &objects, &mut out)
            .unwrap_err();
        assert!(matches!(err, SendError::Codec(CodecError::TypeMismatch { .. })));

        let err = encode_args(&schema, d, &[], &objects, &mut out).unwrap_err();
        assert_eq!(err, SendError::Codec(CodecError::ArgCount { expected: 2, found: 0 }));
    }

    #[test]
    fn test_call_display() {
        let (schema, _) = setup(Role::Client);
        let d = def(&schema, "set_fullscreen");
        let id = ObjectId::new(7).unwrap();
        let call = CallDisplay {
            interface: "toplevel",
            object: ObjectId::new(5).unwrap(),
            def: d,
            args: &[Arg::object(id)],
        };
        assert_eq!(call.to_string(), "toplevel#5.set_fullscreen(output#7)");
    }

    /// Argumen sembarang untuk `ty`. Referensi bernama memakai `refs`
    /// (satu object per interface), new id diambil berurutan dari `next_new`.
    fn arbitrary_arg(
        ty: &FieldType,
        seed: u64,
        text: &str,
        refs: &HashMap<String, ObjectId>,
        next_new: &mut u32,
    ) -> Arg {
        let null = seed % 5 == 0;
        match ty {
            FieldType::Int => Arg::Int(seed as i32),
            FieldType::Uint => Arg::Uint((seed >> 7) as u32),
            FieldType::Fixed { frac_bits } => {
                Arg::Fixed(Fixed::from_raw_bits(seed as i32, *frac_bits))
            }
            FieldType::Pod(PodKind::U64) => Arg::U64(seed),
            FieldType::Pod(PodKind::F64) => Arg::F64(seed as i64 as f64 / 7.0),
            FieldType::Str { nullable: true } if null => Arg::Str(None),
            FieldType::Str { .. } => Arg::str(text),
            FieldType::Array { .. } => Arg::Array(text.as_bytes().to_vec()),
            FieldType::Object { nullable: true, .. } if null => Arg::Object(None),
            FieldType::Object {
                target: ObjectType::Named(name),
                ..
            } => Arg::object(refs[name]),
            FieldType::Object {
                target: ObjectType::Any,
                ..
            } => Arg::Object(ObjectId::new(seed as u32 | 1)),
            FieldType::NewId { .. } => {
                *next_new += 1;
                Arg::NewId(ObjectId::new(*next_new).unwrap())
            }
        }
    }

    proptest! {
        #[test]
        fn prop_every_bundled_message_roundtrips(
            seeds in proptest::collection::vec(any::<u64>(), 8),
            text in "\\PC{0,24}",
        ) {
            let schema = crate::protocols::bundled().unwrap();
            let mut tables = [ObjectTable::new(Role::Client), ObjectTable::new(Role::Server)];
            let mut refs = HashMap::new();
            for (i, iface) in schema.interfaces().iter().enumerate() {
                let id = ObjectId::new(100 + i as u32).unwrap();
                for table in &mut tables {
                    table.allocate(iface.id, iface.version, Some(id)).unwrap();
                }
                refs.insert(iface.name.clone(), id);
            }

            let [client, server] = &tables;
            for iface in schema.interfaces() {
                for (direction, sender, receiver, first_new) in [
                    (Direction::Request, client, server, 1000u32),
                    (Direction::Event, server, client, 0xff00_1000u32),
                ] {
                    for def in iface.messages(direction) {
                        let mut next_new = first_new;
                        let args: Vec<Arg> = def
                            .fields
                            .iter()
                            .enumerate()
                            .map(|(i, field)| {
                                let seed = seeds[i % seeds.len()].rotate_left(i as u32 * 7);
                                arbitrary_arg(&field.ty, seed, &text, &refs, &mut next_new)
                            })
                            .collect();

                        let mut out = Vec::new();
                        encode_args(&schema, def, &args, sender, &mut out).unwrap();
                        prop_assert_eq!(out.len() % 4, 0, "{}.{}", iface.name, def.name);
                        let decoded = decode_args(&schema, def, &out, receiver).unwrap();
                        prop_assert_eq!(decoded, args, "{}.{}", iface.name, def.name);
                    }
                }
            }
        }

        #[test]
        fn prop_title_roundtrip(
            title in "\\PC{0,64}",
            subtitle in proptest::option::of("\\PC{0,16}"),
        ) {
            let (schema, objects) = setup(Role::Client);
            let d = def(&schema, "set_title");
            let args = vec![Arg::Str(Some(title)), Arg::Str(subtitle)];
            let mut out = Vec::new();
            encode_args(&schema, d, &args, &objects, &mut out).unwrap();
            prop_assert_eq!(out.len() % 4, 0);
            let decoded = decode_args(&schema, d, &out, &ObjectTable::new(Role::Server)).unwrap();
            prop_assert_eq!(decoded, args);
        }

        #[test]
        fn prop_fixed_precision(v in -8_000_000.0f64..8_000_000.0) {
            let f = Fixed::from_f64(v);
            prop_assert!((f.to_f64() - v).abs() <= 1.0 / 512.0);
        }
    }
}

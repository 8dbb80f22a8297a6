//! Schema Model
//!
//! Representasi in-memory dari interface, request/event, dan field types.
//! Immutable setelah `Schema::new` berhasil, aman di-share via `Arc`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::DefinitionError;

/// Fractional bits of a plain `fixed` field (24.8).
pub const DEFAULT_FIXED_BITS: u8 = 8;

/// Name used by `id(object)` for an untyped reference.
pub const ANY_INTERFACE: &str = "object";

/// Index of an interface inside its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub(crate) u32);

impl InterfaceId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Request (client -> server) or event (server -> client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Event,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Event => "event",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw 64-bit scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodKind {
    U64,
    F64,
}

/// Object reference target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectType {
    /// `id(object)`: any live object.
    Any,
    /// Named interface. Resolved to an [`InterfaceId`] by `Schema::new`.
    Named(String),
}

/// Where a new object's negotiated version comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewIdVersion {
    /// `min(parent version, interface version)`.
    Inherit,
    /// Value of the named sibling `u32` field.
    FromField(String),
}

/// Wire type of a field. Closed set; encode/decode match on it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Uint,
    Fixed { frac_bits: u8 },
    Pod(PodKind),
    Str { nullable: bool },
    Array { element: String },
    Object { target: ObjectType, nullable: bool },
    NewId { target: String, version: NewIdVersion },
}

impl FieldType {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::Int => "i32",
            FieldType::Uint => "u32",
            FieldType::Fixed { .. } => "fixed",
            FieldType::Pod(PodKind::U64) => "pod(u64)",
            FieldType::Pod(PodKind::F64) => "pod(f64)",
            FieldType::Str { .. } => "str",
            FieldType::Array { .. } => "array",
            FieldType::Object { .. } => "object",
            FieldType::NewId { .. } => "new id",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Fixed { frac_bits } if *frac_bits != DEFAULT_FIXED_BITS => {
                write!(f, "fixed({})", frac_bits)
            }
            FieldType::Str { nullable: true } => write!(f, "str (nullable)"),
            FieldType::Array { element } => write!(f, "array({})", element),
            FieldType::Object { target, nullable } => {
                let name = match target {
                    ObjectType::Any => ANY_INTERFACE,
                    ObjectType::Named(name) => name.as_str(),
                };
                write!(f, "id({})", name)?;
                if *nullable {
                    write!(f, " (nullable)")?;
                }
                Ok(())
            }
            FieldType::NewId { target, version } => {
                write!(f, "id({}) (new", target)?;
                if let NewIdVersion::FromField(src) = version {
                    write!(f, ", version = {}", src)?;
                }
                write!(f, ")")
            }
            other => f.write_str(other.describe()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// One request or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDef {
    pub name: String,
    pub direction: Direction,
    /// Declaration index within its direction.
    pub opcode: u16,
    pub since: u32,
    pub destructor: bool,
    pub fields: Vec<Field>,
}

impl MessageDef {
    pub fn new(name: impl Into<String>, direction: Direction, opcode: u16) -> Self {
        Self {
            name: name.into(),
            direction,
            opcode,
            since: 1,
            destructor: false,
            fields: Vec::new(),
        }
    }

    pub fn since(mut self, since: u32) -> Self {
        self.since = since;
        self
    }

    pub fn destructor(mut self) -> Self {
        self.destructor = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field::new(name, ty));
        self
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Interface as written by the parser or a builder. `version == None` means
/// "highest since, at least 1".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDef {
    pub name: String,
    pub version: Option<u32>,
    pub requests: Vec<MessageDef>,
    pub events: Vec<MessageDef>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            requests: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn request(mut self, msg: MessageDef) -> Self {
        self.requests.push(msg);
        self
    }

    pub fn event(mut self, msg: MessageDef) -> Self {
        self.events.push(msg);
        self
    }
}

/// Validated interface.
#[derive(Debug, Clone)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub version: u32,
    requests: Vec<MessageDef>,
    events: Vec<MessageDef>,
}

impl Interface {
    pub fn messages(&self, direction: Direction) -> &[MessageDef] {
        match direction {
            Direction::Request => &self.requests,
            Direction::Event => &self.events,
        }
    }

    #[inline(always)]
    pub fn message(&self, direction: Direction, opcode: u16) -> Option<&MessageDef> {
        self.messages(direction).get(opcode as usize)
    }

    pub fn find(&self, direction: Direction, name: &str) -> Option<&MessageDef> {
        self.messages(direction).iter().find(|m| m.name == name)
    }
}

/// Immutable set of interfaces.
#[derive(Debug, Clone)]
pub struct Schema {
    interfaces: Vec<Interface>,
    by_name: HashMap<String, InterfaceId>,
}

impl Schema {
    /// Validasi semua definisi lalu bangun lookup table.
    pub fn new(defs: Vec<InterfaceDef>) -> Result<Self, DefinitionError> {
        let mut by_name = HashMap::with_capacity(defs.len());
        for (idx, def) in defs.iter().enumerate() {
            if def.name == ANY_INTERFACE
                || by_name
                    .insert(def.name.clone(), InterfaceId(idx as u32))
                    .is_some()
            {
                return Err(DefinitionError::DuplicateInterface(def.name.clone()));
            }
        }

        let mut interfaces = Vec::with_capacity(defs.len());
        for (idx, def) in defs.into_iter().enumerate() {
            let highest_since = def
                .requests
                .iter()
                .chain(def.events.iter())
                .map(|m| m.since)
                .max()
                .unwrap_or(1)
                .max(1);
            let version = def.version.unwrap_or(highest_since);
            if version == 0 {
                return Err(DefinitionError::ZeroVersion {
                    interface: def.name,
                });
            }

            check_messages(&def.name, version, Direction::Request, &def.requests, &by_name)?;
            check_messages(&def.name, version, Direction::Event, &def.events, &by_name)?;

            interfaces.push(Interface {
                id: InterfaceId(idx as u32),
                name: def.name,
                version,
                requests: def.requests,
                events: def.events,
            });
        }

        Ok(Self {
            interfaces,
            by_name,
        })
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    #[inline(always)]
    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[id.index()]
    }

    pub fn interface_id(&self, name: &str) -> Option<InterfaceId> {
        self.by_name.get(name).copied()
    }

    pub fn find_interface(&self, name: &str) -> Option<&Interface> {
        self.interface_id(name).map(|id| self.interface(id))
    }

    /// Lookup by (interface, direction, opcode).
    #[inline(always)]
    pub fn message(
        &self,
        interface: InterfaceId,
        direction: Direction,
        opcode: u16,
    ) -> Option<&MessageDef> {
        self.interfaces
            .get(interface.index())
            .and_then(|i| i.message(direction, opcode))
    }

    /// Resolve a message name to its opcode.
    pub fn opcode(&self, interface: &str, direction: Direction, name: &str) -> Option<u16> {
        self.find_interface(interface)
            .and_then(|i| i.find(direction, name))
            .map(|m| m.opcode)
    }

    /// Merge two independently parsed schemas.
    pub fn merge(
        parts: impl IntoIterator<Item = Vec<InterfaceDef>>,
    ) -> Result<Self, DefinitionError> {
        Self::new(parts.into_iter().flatten().collect())
    }
}

fn check_messages(
    interface: &str,
    version: u32,
    direction: Direction,
    messages: &[MessageDef],
    known: &HashMap<String, InterfaceId>,
) -> Result<(), DefinitionError> {
    let mut opcodes = HashSet::with_capacity(messages.len());
    let mut names = HashSet::with_capacity(messages.len());

    for (idx, msg) in messages.iter().enumerate() {
        if !opcodes.insert(msg.opcode) {
            return Err(DefinitionError::DuplicateOpcode {
                interface: interface.to_string(),
                direction: direction.as_str(),
                opcode: msg.opcode,
            });
        }
        if msg.opcode as usize != idx {
            return Err(DefinitionError::OpcodeGap {
                interface: interface.to_string(),
                direction: direction.as_str(),
                expected: idx as u16,
                found: msg.opcode,
            });
        }
        if !names.insert(msg.name.as_str()) {
            return Err(DefinitionError::DuplicateMessage {
                interface: interface.to_string(),
                direction: direction.as_str(),
                name: msg.name.clone(),
            });
        }
        if msg.since == 0 {
            return Err(DefinitionError::InvalidSince {
                interface: interface.to_string(),
                message: msg.name.clone(),
            });
        }
        if msg.since > version {
            return Err(DefinitionError::SinceAboveVersion {
                interface: interface.to_string(),
                message: msg.name.clone(),
                since: msg.since,
                version,
            });
        }

        for (pos, field) in msg.fields.iter().enumerate() {
            check_field(interface, msg, pos, field, known)?;
        }
    }
    Ok(())
}

fn check_field(
    interface: &str,
    msg: &MessageDef,
    pos: usize,
    field: &Field,
    known: &HashMap<String, InterfaceId>,
) -> Result<(), DefinitionError> {
    let unknown = |target: &str| DefinitionError::UnknownInterface {
        interface: interface.to_string(),
        message: msg.name.clone(),
        field: field.name.clone(),
        target: target.to_string(),
    };

    match &field.ty {
        FieldType::Fixed { frac_bits } if *frac_bits == 0 || *frac_bits > 31 => {
            Err(DefinitionError::BadFixedPrecision {
                interface: interface.to_string(),
                message: msg.name.clone(),
                field: field.name.clone(),
                bits: *frac_bits,
            })
        }
        FieldType::Object {
            target: ObjectType::Named(target),
            ..
        } if !known.contains_key(target) => Err(unknown(target)),
        FieldType::NewId { target, version } => {
            if target == ANY_INTERFACE {
                return Err(DefinitionError::UntypedNewId {
                    interface: interface.to_string(),
                    message: msg.name.clone(),
                    field: field.name.clone(),
                });
            }
            if !known.contains_key(target) {
                return Err(unknown(target));
            }
            if let NewIdVersion::FromField(source) = version {
                let ok = msg.fields[..pos]
                    .iter()
                    .any(|f| &f.name == source && f.ty == FieldType::Uint);
                if !ok {
                    return Err(DefinitionError::BadVersionSource {
                        interface: interface.to_string(),
                        message: msg.name.clone(),
                        field: field.name.clone(),
                        source_field: source.clone(),
                    });
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

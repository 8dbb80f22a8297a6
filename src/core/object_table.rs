//! Object Table: id -> (interface, version) per connection
//!
//! Namespace dibagi dua:
//! - `1..=0xfeff_ffff`: dialokasikan client
//! - `0xff00_0000..=0xffff_ffff`: dialokasikan server
//!
//! Destroy yang diinisiasi peer langsung membebaskan id. Destroy lokal
//! meninggalkan zombie sampai peer mengonfirmasi (`release`), supaya pesan
//! yang masih "in flight" ke id tersebut bisa di-drop tanpa error.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroU32;

use crate::error::ObjectError;
use crate::schema::InterfaceId;

pub const CLIENT_ID_MIN: u32 = 1;
pub const CLIENT_ID_MAX: u32 = 0xfeff_ffff;
pub const SERVER_ID_MIN: u32 = 0xff00_0000;
pub const SERVER_ID_MAX: u32 = 0xffff_ffff;

/// Connection-scoped object id. Never zero; null is `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    /// Id of the bootstrap (display) object.
    pub const ROOT: ObjectId = match NonZeroU32::new(1) {
        Some(v) => ObjectId(v),
        None => unreachable!(),
    };

    #[inline(always)]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(ObjectId(v)),
            None => None,
        }
    }

    #[inline(always)]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    /// Side whose range contains this id.
    #[inline(always)]
    pub fn owner(self) -> Role {
        if self.raw() >= SERVER_ID_MIN {
            Role::Server
        } else {
            Role::Client
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }

    /// Inclusive id range this side allocates from.
    pub fn id_range(self) -> (u32, u32) {
        match self {
            Role::Client => (CLIENT_ID_MIN, CLIENT_ID_MAX),
            Role::Server => (SERVER_ID_MIN, SERVER_ID_MAX),
        }
    }
}

/// A live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object {
    pub id: ObjectId,
    pub interface: InterfaceId,
    pub version: u32,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Live(Object),
    /// Destroyed locally, awaiting the peer's acknowledgement.
    Zombie(Object),
}

/// Result of resolving an inbound message target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Live(Object),
    Zombie(Object),
}

pub struct ObjectTable {
    local: Role,
    slots: HashMap<u32, Slot>,
    // Id lokal yang sudah di-release, dipakai ulang dari yang terkecil
    free_ids: BTreeSet<u32>,
    next_local: u64,
}

impl ObjectTable {
    pub fn new(local: Role) -> Self {
        Self {
            local,
            slots: HashMap::new(),
            free_ids: BTreeSet::new(),
            next_local: local.id_range().0 as u64,
        }
    }

    pub fn role(&self) -> Role {
        self.local
    }

    /// Bind `interface` at `version` to an id.
    ///
    /// With `id_hint = None` the next free local id is chosen. A hinted id may
    /// belong to either side; binding a live id (or a local zombie) fails.
    pub fn allocate(
        &mut self,
        interface: InterfaceId,
        version: u32,
        id_hint: Option<ObjectId>,
    ) -> Result<ObjectId, ObjectError> {
        let id = match id_hint {
            Some(id) => {
                self.check_free(id)?;
                if id.owner() == self.local {
                    self.free_ids.remove(&id.raw());
                    if id.raw() as u64 >= self.next_local {
                        self.next_local = id.raw() as u64 + 1;
                    }
                }
                id
            }
            None => self.next_free()?,
        };

        self.slots.insert(
            id.raw(),
            Slot::Live(Object {
                id,
                interface,
                version,
            }),
        );
        Ok(id)
    }

    /// Would `allocate(.., Some(id))` succeed?
    pub fn check_free(&self, id: ObjectId) -> Result<(), ObjectError> {
        match self.slots.get(&id.raw()) {
            Some(Slot::Live(_)) => Err(ObjectError::AlreadyLive(id)),
            // Peer hanya memakai ulang id miliknya setelah melihat destroy kita
            Some(Slot::Zombie(_)) if id.owner() == self.local => Err(ObjectError::AlreadyLive(id)),
            _ => Ok(()),
        }
    }

    /// Next id the local allocator would hand out, without binding it.
    pub fn peek_next_id(&self) -> Result<ObjectId, ObjectError> {
        if let Some(&raw) = self.free_ids.first() {
            return ObjectId::new(raw).ok_or(ObjectError::Exhausted);
        }
        let (_, max) = self.local.id_range();
        if self.next_local > max as u64 {
            return Err(ObjectError::Exhausted);
        }
        ObjectId::new(self.next_local as u32).ok_or(ObjectError::Exhausted)
    }

    fn next_free(&mut self) -> Result<ObjectId, ObjectError> {
        let id = self.peek_next_id()?;
        if !self.free_ids.remove(&id.raw()) {
            self.next_local += 1;
        }
        // Bisa saja id ini sudah dipakai lewat hint eksplisit
        match self.check_free(id) {
            Ok(()) => Ok(id),
            Err(_) => self.next_free(),
        }
    }

    #[inline(always)]
    pub fn lookup(&self, id: ObjectId) -> Result<&Object, ObjectError> {
        match self.slots.get(&id.raw()) {
            Some(Slot::Live(obj)) => Ok(obj),
            _ => Err(ObjectError::NotFound(id)),
        }
    }

    /// Live object or zombie. Unknown ids are `NotFound`.
    #[inline(always)]
    pub fn resolve(&self, id: ObjectId) -> Result<Target, ObjectError> {
        match self.slots.get(&id.raw()) {
            Some(Slot::Live(obj)) => Ok(Target::Live(*obj)),
            Some(Slot::Zombie(obj)) => Ok(Target::Zombie(*obj)),
            None => Err(ObjectError::NotFound(id)),
        }
    }

    pub fn negotiated_version(&self, id: ObjectId) -> Result<u32, ObjectError> {
        self.lookup(id).map(|obj| obj.version)
    }

    pub fn is_zombie(&self, id: ObjectId) -> bool {
        matches!(self.slots.get(&id.raw()), Some(Slot::Zombie(_)))
    }

    /// Locally initiated destroy. The id lingers as a zombie until `release`.
    pub fn destroy(&mut self, id: ObjectId) -> Result<Object, ObjectError> {
        let obj = *self.lookup(id)?;
        self.slots.insert(id.raw(), Slot::Zombie(obj));
        Ok(obj)
    }

    /// Peer initiated destroy. The id is free again immediately.
    pub fn destroy_by_peer(&mut self, id: ObjectId) -> Result<Object, ObjectError> {
        let obj = *self.lookup(id)?;
        self.slots.remove(&id.raw());
        if id.owner() == self.local {
            self.free_ids.insert(id.raw());
        }
        Ok(obj)
    }

    /// Peer acknowledged a local destroy; the id may be reused.
    pub fn release(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        match self.slots.get(&id.raw()) {
            Some(Slot::Zombie(_)) => {
                self.slots.remove(&id.raw());
                if id.owner() == self.local {
                    self.free_ids.insert(id.raw());
                }
                Ok(())
            }
            Some(Slot::Live(_)) => Err(ObjectError::StillLive(id)),
            None => Err(ObjectError::NotFound(id)),
        }
    }

    /// Drop every object (connection teardown). Returns the number of live
    /// objects released.
    pub fn clear(&mut self) -> usize {
        let live = self.len();
        self.slots.clear();
        self.free_ids.clear();
        self.next_local = self.local.id_range().0 as u64;
        live
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.slots.values().filter_map(|s| match s {
            Slot::Live(obj) => Some(obj),
            Slot::Zombie(_) => None,
        })
    }
}

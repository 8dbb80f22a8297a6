//! Dispatcher: frame -> object -> message definition -> handler
//!
//! Urutan per pesan:
//! 1. resolve target object (unknown = fatal, zombie = decode lalu drop)
//! 2. lookup opcode pada interface object tsb (unknown = fatal)
//! 3. version gate `negotiated >= since`
//! 4. decode argumen, daftarkan new id
//! 5. panggil handler, lalu terapkan destructor
//!
//! Sisi outbound ada di [`Endpoint::send`]: validasi penuh dulu, baru tulis.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::core::{Object, ObjectId, ObjectTable, Role, Target};
use crate::error::{
    CodecError, DefinitionError, ErrorKind, ObjectError, ProtocolError, SendError, VersionError,
};
use crate::protocol::{
    decode_args, encode_args, new_id_versions, register_new_ids, Arg, CallDisplay, Encoder, Fixed,
    Frame, HEADER_SIZE,
};
use crate::schema::{Direction, FieldType, Interface, InterfaceId, MessageDef, ObjectType, Schema};

/// Handler signature. Satu callback per (interface, direction, opcode).
pub type Callback = Box<dyn FnMut(&mut Ctx<'_>, &Message<'_>) + Send>;

/// Decoded inbound message as seen by a handler.
#[derive(Debug)]
pub struct Message<'a> {
    pub object: ObjectId,
    /// Negotiated version of the target object.
    pub version: u32,
    pub interface: &'a Interface,
    pub def: &'a MessageDef,
    pub args: Vec<Arg>,
}

impl Message<'_> {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn opcode(&self) -> u16 {
        self.def.opcode
    }

    pub fn arg(&self, name: &str) -> Option<&Arg> {
        self.def.field_index(name).and_then(|i| self.args.get(i))
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.arg(name).and_then(Arg::as_int)
    }

    pub fn uint(&self, name: &str) -> Option<u32> {
        self.arg(name).and_then(Arg::as_uint)
    }

    pub fn fixed(&self, name: &str) -> Option<Fixed> {
        self.arg(name).and_then(Arg::as_fixed)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Arg::as_str)
    }

    pub fn array(&self, name: &str) -> Option<&[u8]> {
        self.arg(name).and_then(Arg::as_array)
    }

    /// Object reference or new id.
    pub fn object(&self, name: &str) -> Option<ObjectId> {
        self.arg(name).and_then(Arg::as_object)
    }
}

/// Protocol state of one connection that handlers may touch: object table,
/// outbound buffer, and the shared schema.
pub struct Endpoint {
    pub(crate) schema: Arc<Schema>,
    pub(crate) objects: ObjectTable,
    pub(crate) outbound: Encoder,
    scratch: Vec<u8>,
    write_buffer_limit: usize,
    trace: bool,
    pub(crate) closed: bool,
}

impl Endpoint {
    pub(crate) fn new(schema: Arc<Schema>, role: Role, config: &ConnectionConfig) -> Self {
        Self {
            schema,
            objects: ObjectTable::new(role),
            outbound: Encoder::new(4096),
            scratch: Vec::with_capacity(256),
            write_buffer_limit: config.write_buffer_limit,
            trace: config.trace_messages,
            closed: false,
        }
    }

    #[inline(always)]
    pub(crate) fn role(&self) -> Role {
        self.objects.role()
    }

    /// Direction of messages this side sends.
    #[inline(always)]
    pub(crate) fn outbound_direction(&self) -> Direction {
        match self.role() {
            Role::Client => Direction::Request,
            Role::Server => Direction::Event,
        }
    }

    #[inline(always)]
    pub(crate) fn inbound_direction(&self) -> Direction {
        match self.role() {
            Role::Client => Direction::Event,
            Role::Server => Direction::Request,
        }
    }

    /// Bind an object outside of any message (bootstrap object, tests).
    pub(crate) fn create_object(
        &mut self,
        interface: &str,
        version: u32,
        id: Option<ObjectId>,
    ) -> Result<ObjectId, SendError> {
        let iface = self
            .schema
            .find_interface(interface)
            .ok_or_else(|| SendError::UnknownInterface(interface.to_string()))?;
        if version == 0 || version > iface.version {
            return Err(CodecError::BadNewIdVersion {
                field: "version".into(),
                interface: iface.name.clone(),
                requested: version,
                max: iface.version,
            }
            .into());
        }
        let iface_id = iface.id;
        Ok(self.objects.allocate(iface_id, version, id)?)
    }

    pub(crate) fn send(
        &mut self,
        object: ObjectId,
        opcode: u16,
        args: &[Arg],
    ) -> Result<(), SendError> {
        self.write_message(object, opcode, args, true)
    }

    pub(crate) fn send_named(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[Arg],
    ) -> Result<(), SendError> {
        let direction = self.outbound_direction();
        let obj = *self.objects.lookup(object)?;
        let iface = self.schema.interface(obj.interface);
        let def = iface
            .find(direction, name)
            .ok_or_else(|| SendError::UnknownMessage {
                interface: iface.name.clone(),
                direction: direction.as_str(),
                name: name.to_string(),
            })?;
        let opcode = def.opcode;
        self.send(object, opcode, args)
    }

    fn write_message(
        &mut self,
        object: ObjectId,
        opcode: u16,
        args: &[Arg],
        enforce_limit: bool,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        let direction = self.outbound_direction();
        let obj = *self.objects.lookup(object)?;
        let schema = Arc::clone(&self.schema);
        let iface = schema.interface(obj.interface);
        let def = iface
            .message(direction, opcode)
            .ok_or_else(|| SendError::UnknownOpcode {
                interface: iface.name.clone(),
                direction: direction.as_str(),
                opcode,
            })?;
        if obj.version < def.since {
            return Err(version_error(&obj, iface, def).into());
        }

        self.scratch.clear();
        encode_args(&schema, def, args, &self.objects, &mut self.scratch)?;
        let new_ids = new_id_versions(&schema, def, args, obj.version)?;

        let pending = self.outbound.len();
        let size = HEADER_SIZE + self.scratch.len();
        if enforce_limit && pending + size > self.write_buffer_limit {
            return Err(SendError::BufferFull {
                pending,
                limit: self.write_buffer_limit,
            });
        }
        self.outbound.encode(object.raw(), opcode, &self.scratch)?;

        // encode_args sudah memastikan semua new id bebas
        register_new_ids(&mut self.objects, &new_ids)?;
        if self.trace {
            debug!(
                "-> {}",
                CallDisplay {
                    interface: &iface.name,
                    object,
                    def,
                    args,
                }
            );
        }
        if def.destructor {
            self.objects.destroy(object)?;
        }
        Ok(())
    }

    /// Append the display `error` event for a fatal error, if the schema and
    /// the object table allow it. Returns whether an event was written.
    pub(crate) fn report_error(&mut self, err: &ProtocolError) -> bool {
        if self.role() != Role::Server {
            return false;
        }
        let Ok(root) = self.objects.lookup(ObjectId::ROOT) else {
            return false;
        };
        let schema = Arc::clone(&self.schema);
        let Some(def) = schema
            .interface(root.interface)
            .find(Direction::Event, "error")
        else {
            return false;
        };
        let shape_ok = matches!(
            def.fields.iter().map(|f| &f.ty).collect::<Vec<_>>().as_slice(),
            [
                FieldType::Object {
                    target: ObjectType::Any,
                    ..
                },
                FieldType::Uint,
                FieldType::Str { .. },
            ]
        );
        if !shape_ok {
            return false;
        }

        let args = [
            Arg::Object(Some(err.object.unwrap_or(ObjectId::ROOT))),
            Arg::Uint(err.wire_code()),
            Arg::str(err.kind.to_string()),
        ];
        self.write_message(ObjectId::ROOT, def.opcode, &args, false).is_ok()
    }
}

fn version_error(obj: &Object, iface: &Interface, def: &MessageDef) -> VersionError {
    VersionError {
        object: obj.id,
        interface: iface.name.clone(),
        message: def.name.clone(),
        since: def.since,
        version: obj.version,
    }
}

/// Handle passed to callbacks. Operates on the connection that delivered the
/// message.
pub struct Ctx<'a> {
    endpoint: &'a mut Endpoint,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(endpoint: &'a mut Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn role(&self) -> Role {
        self.endpoint.role()
    }

    pub fn schema(&self) -> &Schema {
        &self.endpoint.schema
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.endpoint.objects
    }

    /// Id the next local allocation would use, for a `new` argument.
    pub fn next_id(&self) -> Result<ObjectId, ObjectError> {
        self.endpoint.objects.peek_next_id()
    }

    pub fn send(&mut self, object: ObjectId, opcode: u16, args: &[Arg]) -> Result<(), SendError> {
        self.endpoint.send(object, opcode, args)
    }

    pub fn send_named(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[Arg],
    ) -> Result<(), SendError> {
        self.endpoint.send_named(object, name, args)
    }

    pub fn create_object(
        &mut self,
        interface: &str,
        version: u32,
        id: Option<ObjectId>,
    ) -> Result<ObjectId, SendError> {
        self.endpoint.create_object(interface, version, id)
    }

    /// Local destroy without a message; the id becomes a zombie.
    pub fn destroy(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        self.endpoint.objects.destroy(id).map(|_| ())
    }

    /// Peer acknowledged a local destroy.
    pub fn release(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        self.endpoint.objects.release(id)
    }
}

/// Handler registry for one connection.
pub struct Dispatcher {
    schema: Arc<Schema>,
    handlers: HashMap<(InterfaceId, Direction, u16), Callback>,
}

impl Dispatcher {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            handlers: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Bind a callback to a request (server side).
    pub fn on_request<F>(
        &mut self,
        interface: &str,
        opcode: u16,
        callback: F,
    ) -> Result<(), DefinitionError>
    where
        F: FnMut(&mut Ctx<'_>, &Message<'_>) + Send + 'static,
    {
        self.bind(interface, Direction::Request, opcode, Box::new(callback))
    }

    /// Bind a callback to an event (client side).
    pub fn on_event<F>(
        &mut self,
        interface: &str,
        opcode: u16,
        callback: F,
    ) -> Result<(), DefinitionError>
    where
        F: FnMut(&mut Ctx<'_>, &Message<'_>) + Send + 'static,
    {
        self.bind(interface, Direction::Event, opcode, Box::new(callback))
    }

    fn bind(
        &mut self,
        interface: &str,
        direction: Direction,
        opcode: u16,
        callback: Callback,
    ) -> Result<(), DefinitionError> {
        let iface = self
            .schema
            .find_interface(interface)
            .ok_or_else(|| DefinitionError::NoSuchInterface(interface.to_string()))?;
        if iface.message(direction, opcode).is_none() {
            return Err(DefinitionError::NoSuchMessage {
                interface: interface.to_string(),
                direction: direction.as_str(),
                opcode,
            });
        }
        self.handlers.insert((iface.id, direction, opcode), callback);
        Ok(())
    }

    pub fn is_bound(&self, interface: InterfaceId, direction: Direction, opcode: u16) -> bool {
        self.handlers.contains_key(&(interface, direction, opcode))
    }

    /// Process one complete frame against `endpoint`.
    pub(crate) fn dispatch(
        &mut self,
        endpoint: &mut Endpoint,
        frame: &Frame<'_>,
    ) -> Result<(), ProtocolError> {
        let header = frame.header;
        let fail = |kind: ErrorKind| {
            ProtocolError::new(
                kind,
                ObjectId::new(header.object),
                Some(header.opcode),
                frame.offset,
            )
        };

        let id = ObjectId::new(header.object).ok_or_else(|| fail(ObjectError::NullTarget.into()))?;
        let (obj, zombie) = match endpoint.objects.resolve(id) {
            Ok(Target::Live(obj)) => (obj, false),
            Ok(Target::Zombie(obj)) => (obj, true),
            Err(e) => return Err(fail(e.into())),
        };

        let schema = Arc::clone(&self.schema);
        let iface = schema.interface(obj.interface);
        let direction = endpoint.inbound_direction();
        let def = iface.message(direction, header.opcode).ok_or_else(|| {
            fail(ErrorKind::UnknownOpcode {
                interface: iface.name.clone(),
                direction: direction.as_str(),
                opcode: header.opcode,
            })
        })?;
        if obj.version < def.since {
            return Err(fail(version_error(&obj, iface, def).into()));
        }

        let args = decode_args(&schema, def, frame.payload, &endpoint.objects).map_err(fail)?;
        let new_ids =
            new_id_versions(&schema, def, &args, obj.version).map_err(|e| fail(e.into()))?;
        register_new_ids(&mut endpoint.objects, &new_ids).map_err(|e| fail(e.into()))?;

        if zombie {
            // Pesan telat untuk object yang sudah kita destroy
            for &(new_id, _, _) in &new_ids {
                endpoint.objects.destroy(new_id).map_err(|e| fail(e.into()))?;
            }
            debug!(
                "dropping {}.{} for destroyed object {}",
                iface.name, def.name, id
            );
            return Ok(());
        }

        if endpoint.trace {
            debug!(
                "<- {}",
                CallDisplay {
                    interface: &iface.name,
                    object: id,
                    def,
                    args: &args,
                }
            );
        }

        let message = Message {
            object: id,
            version: obj.version,
            interface: iface,
            def,
            args,
        };
        match self.handlers.get_mut(&(obj.interface, direction, header.opcode)) {
            Some(callback) => callback(&mut Ctx::new(endpoint), &message),
            None => debug!("no handler for {}.{} on {}", iface.name, def.name, id),
        }

        // Handler boleh sudah destroy object ini sendiri
        if def.destructor && endpoint.objects.lookup(id).is_ok() {
            endpoint.objects.destroy_by_peer(id).map_err(|e| fail(e.into()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Framer, MAX_MESSAGE_SIZE};
    use std::sync::Mutex;

    const SRC: &str = r#"
        interface display {
            request sync { callback: id(callback) (new) }
            event error { object_id: id(object), code: u32, message: str }
        }
        interface callback {
            event done (destructor) { data: u32 }
        }
    "#;

    fn endpoint(role: Role) -> Endpoint {
        let schema = Arc::new(Schema::from_source(SRC).unwrap());
        let mut ep = Endpoint::new(schema, role, &ConnectionConfig::default());
        ep.create_object("display", 1, Some(ObjectId::ROOT)).unwrap();
        ep
    }

    fn frames(bytes: &[u8]) -> Framer {
        let mut framer = Framer::new(64, MAX_MESSAGE_SIZE);
        framer.push(bytes);
        framer
    }

    #[test]
    fn test_sync_roundtrip_through_handlers() {
        let mut client = endpoint(Role::Client);
        let mut server = endpoint(Role::Server);

        let cb = client.objects.peek_next_id().unwrap();
        client.send_named(ObjectId::ROOT, "sync", &[Arg::NewId(cb)]).unwrap();
        assert!(client.objects.lookup(cb).is_ok());

        let mut dispatcher = Dispatcher::new(Arc::clone(&server.schema));
        dispatcher
            .on_request("display", 0, |ctx, msg| {
                let cb = msg.object("callback").unwrap();
                ctx.send(cb, 0, &[Arg::Uint(42)]).unwrap();
            })
            .unwrap();

        let mut framer = frames(&client.outbound.take());
        let frame = framer.next_frame().unwrap().unwrap();
        dispatcher.dispatch(&mut server, &frame).unwrap();
        // done adalah destructor event: zombie di server sampai di-release
        assert!(server.objects.is_zombie(cb));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut client_dispatcher = Dispatcher::new(Arc::clone(&client.schema));
        client_dispatcher
            .on_event("callback", 0, move |_, msg| sink.lock().unwrap().push(msg.uint("data")))
            .unwrap();

        let mut framer = frames(&server.outbound.take());
        let frame = framer.next_frame().unwrap().unwrap();
        client_dispatcher.dispatch(&mut client, &frame).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(42)]);
        assert!(client.objects.lookup(cb).is_err());
        assert!(!client.objects.is_zombie(cb));
    }

    #[test]
    fn test_unknown_binding_rejected() {
        let ep = endpoint(Role::Server);
        let mut dispatcher = Dispatcher::new(Arc::clone(&ep.schema));
        assert!(matches!(
            dispatcher.on_request("nope", 0, |_, _| {}),
            Err(DefinitionError::NoSuchInterface(_))
        ));
        assert!(matches!(
            dispatcher.on_request("display", 5, |_, _| {}),
            Err(DefinitionError::NoSuchMessage { opcode: 5, .. })
        ));
    }

    #[test]
    fn test_error_report_uses_display_event() {
        let mut server = endpoint(Role::Server);
        let id = ObjectId::new(9);
        let err = ProtocolError::new(ObjectError::NotFound(id.unwrap()), id, Some(0), 16);
        assert!(server.report_error(&err));

        let mut framer = frames(server.outbound.as_bytes());
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.header.object, 1);
        assert_eq!(frame.header.opcode, 0);
        assert_eq!(&frame.payload[0..4], &9u32.to_le_bytes());
        assert_eq!(&frame.payload[4..8], &0u32.to_le_bytes());
    }

    #[test]
    fn test_send_checks_before_writing() {
        let mut client = endpoint(Role::Client);
        let bogus = ObjectId::new(0xff00_0001).unwrap();
        let err = client.send_named(ObjectId::ROOT, "sync", &[Arg::NewId(bogus)]).unwrap_err();
        assert_eq!(err, SendError::Object(ObjectError::OutOfRange(bogus)));
        assert!(client.outbound.is_empty());

        let err = client.send(ObjectId::ROOT, 3, &[]).unwrap_err();
        assert!(matches!(err, SendError::UnknownOpcode { opcode: 3, .. }));
    }
}

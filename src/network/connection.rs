//! Protocol connection: satu object table, satu inbound cursor, satu
//! outbound buffer.
//!
//! State machine:
//!
//! ```text
//! Idle <-> Framing -> Dispatching -> Idle/Framing
//!   \________\______________\______-> Closed (fatal error atau close())
//! ```
//!
//! Tidak ada I/O di sini; transport memanggil `feed` dengan byte yang
//! dibaca dan mengirim isi `outbound()`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::{ObjectId, ObjectTable, Role};
use crate::error::{ErrorKind, ObjectError, ProtocolError, SendError};
use crate::protocol::{Arg, Framer};
use crate::schema::Schema;

use super::dispatch::{Dispatcher, Endpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No partial message buffered.
    Idle,
    /// Holding the start of an incomplete message.
    Framing,
    /// Running a handler.
    Dispatching,
    /// Terminal. No further input is processed.
    Closed,
}

pub struct Connection {
    endpoint: Endpoint,
    dispatcher: Dispatcher,
    framer: Framer,
    state: ConnectionState,
    error: Option<ProtocolError>,
}

impl Connection {
    /// The dispatcher carries the schema and the handlers for this connection.
    pub fn new(dispatcher: Dispatcher, role: Role, config: &ConnectionConfig) -> Self {
        let schema = Arc::clone(dispatcher.schema());
        Self {
            endpoint: Endpoint::new(schema, role, config),
            dispatcher,
            framer: Framer::new(config.read_buffer_size, config.max_message_size),
            state: ConnectionState::Idle,
            error: None,
        }
    }

    /// Connection without handlers.
    pub fn with_schema(schema: Arc<Schema>, role: Role, config: &ConnectionConfig) -> Self {
        Self::new(Dispatcher::new(schema), role, config)
    }

    pub fn role(&self) -> Role {
        self.endpoint.role()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.endpoint.schema
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.endpoint.objects
    }

    /// The error that closed this connection, if any.
    pub fn terminal_error(&self) -> Option<&ProtocolError> {
        self.error.as_ref()
    }

    /// Bind an object without a message, e.g. the display at [`ObjectId::ROOT`].
    pub fn create_object(
        &mut self,
        interface: &str,
        version: u32,
        id: Option<ObjectId>,
    ) -> Result<ObjectId, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.endpoint.create_object(interface, version, id)
    }

    /// Id the next local allocation would use.
    pub fn next_id(&self) -> Result<ObjectId, ObjectError> {
        self.endpoint.objects.peek_next_id()
    }

    /// Feed inbound bytes, dispatching every complete message in order.
    ///
    /// Returns jumlah pesan yang diproses. Error pertama menutup connection
    /// dan dikembalikan sekali; input setelahnya dibuang (`Ok(0)`).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if self.is_closed() {
            return Ok(0);
        }
        self.framer.push(bytes);

        let mut processed = 0;
        loop {
            // Header divalidasi di framer; konteks object/opcode untuk error
            // diambil dari header yang sama
            let header = self.framer.peek_header();
            let offset = self.framer.offset();

            let result = match self.framer.next_frame() {
                Ok(None) => break,
                Ok(Some(frame)) => {
                    self.state = ConnectionState::Dispatching;
                    self.dispatcher.dispatch(&mut self.endpoint, &frame)
                }
                Err(e) => Err(ProtocolError::new(
                    e,
                    header.and_then(|h| ObjectId::new(h.object)),
                    header.map(|h| h.opcode),
                    offset,
                )),
            };

            if let Err(err) = result {
                self.fail(err.clone());
                return Err(err);
            }
            processed += 1;
        }

        self.state = if self.framer.pending() > 0 {
            ConnectionState::Framing
        } else {
            ConnectionState::Idle
        };
        Ok(processed)
    }

    /// Validate and frame one message into the outbound buffer.
    pub fn send(&mut self, object: ObjectId, opcode: u16, args: &[Arg]) -> Result<(), SendError> {
        self.endpoint.send(object, opcode, args)
    }

    /// Like [`send`](Self::send), resolving the message by name.
    pub fn send_named(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[Arg],
    ) -> Result<(), SendError> {
        self.endpoint.send_named(object, name, args)
    }

    /// Local destroy without a message.
    pub fn destroy(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        self.endpoint.objects.destroy(id).map(|_| ())
    }

    /// Peer acknowledged a local destroy; the id becomes reusable.
    pub fn release(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        self.endpoint.objects.release(id)
    }

    /// Bytes waiting to be written to the peer.
    pub fn outbound(&self) -> &[u8] {
        self.endpoint.outbound.as_bytes()
    }

    pub fn has_outbound(&self) -> bool {
        !self.endpoint.outbound.is_empty()
    }

    pub fn consume_outbound(&mut self, n: usize) {
        self.endpoint.outbound.consume(n);
    }

    pub fn take_outbound(&mut self) -> Vec<u8> {
        self.endpoint.outbound.take()
    }

    /// Transport closed: release everything without running handlers.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let released = self.teardown();
        info!("Connection closed, released {} objects", released);
    }

    fn fail(&mut self, err: ProtocolError) {
        warn!("Fatal protocol error: {}", err);
        if self.endpoint.report_error(&err) {
            debug!("Queued error event (code {})", err.wire_code());
        }
        let released = self.teardown();
        debug!("Released {} objects after {}", released, kind_name(&err.kind));
        self.error = Some(err);
    }

    fn teardown(&mut self) -> usize {
        self.state = ConnectionState::Closed;
        self.endpoint.closed = true;
        self.framer.clear();
        self.endpoint.objects.clear()
    }
}

fn kind_name(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Framing(_) => "framing error",
        ErrorKind::Codec(_) => "codec error",
        ErrorKind::Object(_) => "object error",
        ErrorKind::Version(_) => "version error",
        ErrorKind::UnknownOpcode { .. } => "unknown opcode",
    }
}

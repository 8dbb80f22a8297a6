//! wirekit: schema-driven codec, object table and dispatcher for
//! object-oriented binary IPC protocols.
//!
//! Arsitektur:
//! - `schema`: parser + model (interface, request/event, field types)
//! - `protocol`: type codec + message framer
//! - `core`: object table per connection
//! - `network`: dispatcher, connection state machine, transport, server
//!
//! ```
//! use std::sync::Arc;
//! use wirekit::{protocols, Connection, ConnectionConfig, ObjectId, Role};
//!
//! let schema = Arc::new(protocols::bundled().unwrap());
//! let mut client = Connection::with_schema(schema, Role::Client, &ConnectionConfig::default());
//! client.create_object("display", 1, Some(ObjectId::ROOT)).unwrap();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
pub mod protocols;
pub mod schema;

pub use config::{ConnectionConfig, ServerConfig};
pub use core::{ObjectId, ObjectTable, Role};
pub use error::{
    CodecError, DefinitionError, ErrorKind, FramingError, ObjectError, ProtocolError, SchemaError,
    SendError, VersionError,
};
pub use network::{Connection, ConnectionState, Ctx, Dispatcher, Message};
pub use protocol::{Arg, Fixed};
pub use schema::{Direction, Schema};

//! Core module: Object Table per connection
//!
//! Prinsip desain:
//! - Satu tabel per connection, tidak ada namespace global
//! - Id dibagi antara client range dan server range
//! - Destroy lokal -> zombie sampai peer konfirmasi

mod object_table;

pub use object_table::{
    Object, ObjectId, ObjectTable, Role, Target, CLIENT_ID_MAX, CLIENT_ID_MIN, SERVER_ID_MAX,
    SERVER_ID_MIN,
};

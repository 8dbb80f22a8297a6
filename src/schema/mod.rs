//! Schema layer: model + source parser
//!
//! - `model`: Interface / MessageDef / Field, immutable setelah divalidasi
//! - `parser`: format tekstual `interface { request|event ... }`

mod model;
mod parser;

use std::path::Path;

pub use model::{
    Direction, Field, FieldType, Interface, InterfaceDef, InterfaceId, MessageDef, NewIdVersion,
    ObjectType, PodKind, Schema, ANY_INTERFACE, DEFAULT_FIXED_BITS,
};
pub use parser::parse;

use crate::error::SchemaError;

impl Schema {
    /// Parse and validate a single source.
    pub fn from_source(src: &str) -> Result<Self, SchemaError> {
        Ok(Schema::new(parse(src)?)?)
    }

    /// Parse several sources (e.g. one per protocol file) into one schema, so
    /// that interfaces may reference each other across files.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SchemaError> {
        let mut parts = Vec::new();
        for src in sources {
            parts.push(parse(src)?);
        }
        Ok(Schema::merge(parts)?)
    }

    /// Load schema files from disk.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SchemaError> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let src = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.display().to_string(),
                source,
            })?;
            sources.push(src);
        }
        Schema::from_sources(sources.iter().map(String::as_str))
    }
}

//! Bundled protocol sources (`protocols/*.wire`), compiled into the binary.

use crate::error::SchemaError;
use crate::schema::Schema;

pub const CORE: &str = include_str!("../protocols/core.wire");
pub const TOPLEVEL: &str = include_str!("../protocols/toplevel.wire");
pub const INPUT: &str = include_str!("../protocols/input.wire");
pub const OUTPUT: &str = include_str!("../protocols/output.wire");
pub const COLOR: &str = include_str!("../protocols/color.wire");

/// `(file name, source)` of every bundled protocol.
pub const SOURCES: &[(&str, &str)] = &[
    ("core.wire", CORE),
    ("toplevel.wire", TOPLEVEL),
    ("input.wire", INPUT),
    ("output.wire", OUTPUT),
    ("color.wire", COLOR),
];

/// All bundled protocols as one schema. The registry in `core.wire`
/// references interfaces from the other files, so they are merged.
pub fn bundled() -> Result<Schema, SchemaError> {
    Schema::from_sources(SOURCES.iter().map(|(_, src)| *src))
}

//! epmodel – an in-memory structured store for building-energy-model description files.
//!
//! The store loads documents in the IDF textual record format, where each
//! record belongs to a named record type, has positional and named fields, and
//! may reference other records by name. Loaded records are exposed as
//! strongly-typed, queryable collections that support structural edits while
//! keeping the reference graph queryable, and serialize back to text.
//!
//! * An [`construct::Epm`] owns every record of a loaded document.
//! * A [`query::Table`] is the set of all records of one record type.
//! * A [`query::Record`] is a handle to one record; fields are addressed by
//!   case-insensitive name or by position.
//! * A [`query::Queryset`] is an ordered, de-duplicated, filterable view over
//!   a table or over another queryset.
//! * References between records are late-bound name strings, re-resolved
//!   against current table contents on every graph query, so forward and
//!   dangling references are permitted.
//!
//! These core constructs are owned and indexed by "keeper" structures (see the
//! `construct` module) behind the model container, with lookup indexes kept
//! incrementally in sync on every mutation.
//!
//! ## Modules
//! * [`schema`] – The field schema catalog: per-type field descriptors, case
//!   policy flags, reference targets and extensible repeat groups.
//! * [`construct`] – Record storage, identity generation, the reference-graph
//!   lookups and the [`construct::Epm`] container.
//! * [`query`] – Tables, records and querysets: the user-facing API.
//! * [`codec`] – Parser and serializer for the textual record format.
//!
//! ## Quick Start
//! ```
//! use epmodel::construct::Epm;
//! let epm = Epm::from_text("Zone, main zone;").unwrap();
//! let zones = epm.table("Zone").unwrap();
//! let qs = zones.select(|z| z.get("name").unwrap() == "main zone");
//! assert_eq!(qs.len(), 1);
//! ```

pub mod codec;
pub mod construct;
pub mod query;
pub mod schema;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpmError {
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize> },
    #[error("Unknown record type: {0}")]
    UnknownType(String),
    #[error("Unknown field '{field}' for record type {table}")]
    UnknownField { table: String, field: String },
    #[error("No record found: {0}")]
    NotFound(String),
    #[error("More than one record found: {0}")]
    MultipleFound(String),
    #[error("Index {index} out of range (length {length})")]
    IndexOutOfRange { index: usize, length: usize },
    #[error("Record type {0} is not extensible")]
    NotExtensible(String),
    #[error("{given} value(s) given, expected a positive multiple of {cycle}")]
    ArityMismatch { given: usize, cycle: usize },
    #[error("Dangling reference from {table} '{name}': no {target} named '{reference}'")]
    DanglingReference {
        table: String,
        name: String,
        target: String,
        reference: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EpmError>;

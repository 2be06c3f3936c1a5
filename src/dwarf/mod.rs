//! DWARF ingestion and translation (spec.md §4.4-§4.7): a cursor over
//! `.debug_info` built on [`gimli`], a two-pass translator that emits the
//! same output record shapes [`crate::codeview`] does, a partial expression
//! evaluator, and the line-program reconstructor.

pub mod line;
pub mod location;
pub mod reader;
pub mod translator;

use std::error::Error;

use thiserror::Error as ThisError;

use crate::error::ErrorKind;

pub use translator::DwarfTranslator;

/// Error produced while reading or translating DWARF debug information.
#[derive(Debug, ThisError)]
#[error("{kind}")]
pub struct DwarfError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl DwarfError {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        DwarfError { kind, source: None }
    }

    pub(crate) fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        DwarfError {
            kind,
            source: Some(source.into()),
        }
    }

    /// The [`ErrorKind`] discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<gimli::Error> for DwarfError {
    fn from(err: gimli::Error) -> Self {
        DwarfError::with_source(ErrorKind::UnsupportedForm, err)
    }
}

/// Endian-tagged byte slice every gimli reader in this module is built on.
/// The translator always resolves endianness from the image's COFF machine
/// field before constructing one of these.
pub type Slice<'d> = gimli::EndianSlice<'d, gimli::RunTimeEndian>;

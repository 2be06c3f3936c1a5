//! Output Sink Adapter (spec.md §4.9): a thin veneer over an opaque PDB
//! backend. The backend itself is an external collaborator (a linked PDB
//! library); this module only defines the trait surface the translators
//! drive and the version-sniffing dispatch spec.md calls out for
//! `add_public`/`set_machine_type`.

use thiserror::Error;
use tracing::instrument;

use crate::error::ErrorKind;

/// Error produced by the output sink.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct SinkError {
    kind: ErrorKind,
    message: String,
}

impl SinkError {
    pub fn rejected(message: impl Into<String>) -> Self {
        SinkError {
            kind: ErrorKind::BackendRejected,
            message: message.into(),
        }
    }

    /// The [`ErrorKind`] discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// One decoded line-table entry handed to [`Module::add_lines`]: an address
/// delta from `seg_offset` paired with a line delta from `line_base`.
pub type LineEntry = (u32, i32);

/// A section contribution or `dbi`-level section record
/// (`segment, offset, size[, flags]`).
#[derive(Debug, Clone, Copy)]
pub struct SectionContribution {
    pub segment: u16,
    pub offset: u32,
    pub size: u32,
    pub flags: u32,
}

/// One object module within a PDB's DBI stream.
pub trait Module {
    fn add_types(&mut self, blob: &[u8]) -> Result<(), SinkError>;
    fn add_symbols(&mut self, blob: &[u8]) -> Result<(), SinkError>;
    fn add_lines(
        &mut self,
        filename: &str,
        segment: u16,
        seg_offset: u32,
        length: u32,
        line_base: u32,
        entries: &[LineEntry],
    ) -> Result<(), SinkError>;
    fn add_section_contribution(&mut self, contribution: SectionContribution) -> Result<(), SinkError>;
}

/// The DBI stream of one PDB session.
pub trait Dbi {
    fn open_module(&mut self, obj: &str, lib: &str) -> Result<Box<dyn Module>, SinkError>;
    fn add_section(&mut self, contribution: SectionContribution) -> Result<(), SinkError>;
    fn add_public(&mut self, name: &str, segment: u16, offset: u32, type_id: u32) -> Result<(), SinkError>;
    fn set_machine_type(&mut self, machine: u16) -> Result<(), SinkError>;
}

/// The TPI (type-info) stream of one PDB session.
pub trait Tpi {
    fn append_types(&mut self, blob: &[u8]) -> Result<(), SinkError>;
}

/// One open PDB write session.
pub trait Session {
    fn create_dbi(&mut self) -> Result<Box<dyn Dbi>, SinkError>;
    fn open_tpi(&mut self) -> Result<Box<dyn Tpi>, SinkError>;
    fn commit(&mut self) -> Result<(), SinkError>;
    fn close(self: Box<Self>) -> Result<(), SinkError>;
}

/// Opens a PDB for writing. Implemented against the linked backend; the
/// version-sniffing `add_public`/`set_machine_type` dispatch spec.md
/// describes lives inside that implementation, not here — this trait only
/// fixes the call surface every backend revision must support.
pub trait Backend {
    fn open_pdb(&self, path: &std::path::Path) -> Result<Box<dyn Session>, SinkError>;
}

/// Every chunk emitted into a types/symbols blob begins with this magic,
/// per spec.md §4.9 "every blob passed to add_types/add_symbols begins with
/// the 4-byte little-endian magic".
pub const BLOB_MAGIC: u32 = 0x0000_0004;

/// Prefixes `payload` with [`BLOB_MAGIC`], the shape every `add_types`/
/// `add_symbols` call expects.
pub fn wrap_blob(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&BLOB_MAGIC.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Drives one module's contribution to a session: types, symbols, and line
/// tables, in that order, matching the order the translators produce them.
#[instrument(skip_all)]
pub fn commit_module(
    module: &mut dyn Module,
    types: &[u8],
    symbols: &[u8],
    lines: &[(String, u16, u32, u32, u32, Vec<LineEntry>)],
) -> Result<(), SinkError> {
    module.add_types(&wrap_blob(types))?;
    module.add_symbols(&wrap_blob(symbols))?;
    for (filename, segment, seg_offset, length, line_base, entries) in lines {
        module.add_lines(filename, *segment, *seg_offset, *length, *line_base, entries)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_blob_prefixes_magic() {
        let blob = wrap_blob(&[1, 2, 3]);
        assert_eq!(&blob[0..4], &BLOB_MAGIC.to_le_bytes());
        assert_eq!(&blob[4..], &[1, 2, 3]);
    }
}

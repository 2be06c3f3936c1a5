//! Error types shared across the translator.
//!
//! Each component owns a narrow `{Component}ErrorKind` enum; [`TranslateError`]
//! is the union a caller driving the whole pipeline sees. This mirrors the
//! "single mutable last-error string" of the original tool (see design notes)
//! but as a typed, propagated `Result` at every fallible boundary instead.

use std::fmt;

use thiserror::Error;

use crate::codeview::CodeViewError;
#[cfg(feature = "dwarf")]
use crate::dwarf::DwarfError;
use crate::image::ImageError;
use crate::leaf::LeafError;
use crate::sink::SinkError;

/// Top-level error produced by the translator.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Failure while loading or rewriting the input/output image.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Failure while decoding or encoding a CodeView leaf.
    #[error(transparent)]
    Leaf(#[from] LeafError),

    /// Failure specific to the CodeView translator.
    #[error(transparent)]
    CodeView(#[from] CodeViewError),

    /// Failure specific to the DWARF translator.
    #[cfg(feature = "dwarf")]
    #[error(transparent)]
    Dwarf(#[from] DwarfError),

    /// The opaque PDB backend rejected a blob or call.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Neither a CodeView nor a DWARF payload could be found.
    #[error("no debug information found in input image")]
    NoDebugInfo,
}

/// The kind discriminant shared by every component error, per spec §7.
///
/// Component error types carry one of these plus an optional boxed source,
/// following the `symbolic-debuginfo` `{Name}Error { kind, source }` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O failed while reading or writing a file.
    IoFailed,
    /// The input buffer is not a recognized PE/COFF/DBG image.
    NotAnImage,
    /// A header or record was cut off by the end of the buffer.
    HeaderTruncated,
    /// No CodeView or DWARF payload was found.
    NoDebugInfo,
    /// A numeric or string leaf used an encoding this codec does not know.
    UnsupportedLeaf,
    /// A field-list entry used a kind this translator does not know.
    UnsupportedField,
    /// A DWARF attribute used a form this reader does not know.
    UnsupportedForm,
    /// A DWARF base type used an encoding/size combination with no basic-type mapping.
    UnsupportedEncoding,
    /// A relocation could not be resolved against the section table.
    BadRelocation,
    /// The `.debug_line` program is malformed.
    BadLineProgram,
    /// The output sink rejected a call.
    BackendRejected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::IoFailed => "I/O failed",
            ErrorKind::NotAnImage => "not a recognized image",
            ErrorKind::HeaderTruncated => "header truncated",
            ErrorKind::NoDebugInfo => "no debug information present",
            ErrorKind::UnsupportedLeaf => "unsupported numeric leaf",
            ErrorKind::UnsupportedField => "unsupported field-list entry",
            ErrorKind::UnsupportedForm => "unsupported DWARF attribute form",
            ErrorKind::UnsupportedEncoding => "unsupported DWARF base-type encoding",
            ErrorKind::BadRelocation => "bad relocation",
            ErrorKind::BadLineProgram => "malformed line program",
            ErrorKind::BackendRejected => "backend rejected blob",
        };
        f.write_str(s)
    }
}

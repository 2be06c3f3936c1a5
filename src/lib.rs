//! Translates CodeView v1 (with OEM extensions) and DWARF debug information
//! embedded in Windows PE images into Microsoft Program Database records.
//!
//! The crate is organized around the nine components spec.md lists: an
//! [`image`] reader, a [`leaf`] codec shared by both translators, the
//! [`codeview`] and [`dwarf`] translators themselves, [`udt`], and the
//! [`sink`] adapter the translators feed. [`translate_image`] classifies an
//! [`Image`] and dispatches to whichever translator applies, matching
//! spec.md §2's control flow.

pub mod codeview;
pub mod config;
#[cfg(feature = "dwarf")]
pub mod dwarf;
pub mod error;
pub mod image;
pub mod index;
pub mod leaf;
pub mod sink;
pub mod udt;

use tracing::instrument;

use codeview::CodeViewTranslator;
use config::TranslatorConfig;
use error::TranslateError;
use image::{cv_subsection, Image, ImageKind};

/// Output of a full DWARF-path translation run: the blobs ready for the
/// output sink, plus the reconstructed line tables for every compilation
/// unit that carried one.
#[cfg(feature = "dwarf")]
pub struct DwarfTranslation {
    pub types: Vec<u8>,
    pub symbols: Vec<u8>,
    pub udt: Vec<u8>,
    pub lines: Vec<dwarf::line::LineBatch>,
    pub section_contributions: Vec<(u16, u32, u32)>,
}

/// Runs the DWARF Reader, DWARF Translator, Location Evaluator, and
/// Line-Number Reconstructor over `image`, per spec.md §1's control flow
/// "if DWARF is present, the DWARF Translator runs".
#[cfg(feature = "dwarf")]
#[instrument(skip_all)]
pub fn translate_dwarf_image(image: &Image, config: &TranslatorConfig) -> Result<DwarfTranslation, TranslateError> {
    use dwarf::DwarfTranslator;
    use udt::UdtTable;

    let mut udt = UdtTable::new();
    let mut translator = DwarfTranslator::new(config);
    let output = translator.translate(image, &mut udt)?;

    let mut reader = dwarf::reader::DwarfReader::load(image)?;
    let units = reader.units()?;
    let mut lines = Vec::new();
    for unit in &units {
        lines.extend(dwarf::line::reconstruct(image, &reader, unit)?);
    }

    Ok(DwarfTranslation {
        types: output.types,
        symbols: output.symbols,
        udt: udt.flush(config),
        lines,
        section_contributions: output.section_contributions,
    })
}

/// Runs the CodeView Translator over `image`'s legacy NB09/NB11 global-types
/// and global-symbols subsections.
#[instrument(skip_all)]
pub fn translate_codeview_image(
    image: &Image,
    config: TranslatorConfig,
) -> Result<codeview::translator::CodeViewOutput, TranslateError> {
    let types = image
        .codeview_subsection(cv_subsection::GLOBAL_TYPES)
        .ok_or(TranslateError::NoDebugInfo)?;
    let symbols = image.codeview_subsection(cv_subsection::GLOBAL_SYM).unwrap_or_default();

    let translator = CodeViewTranslator::new(config);
    Ok(translator.translate(&types, &symbols)?)
}

/// Classifies `image` and runs whichever translator its debug dialect calls
/// for. A `.dbg` debug-companion file carries the same legacy NB09/NB11
/// CodeView payload a CodeView-bearing PE does (`PEImage::initDbgPtr` feeds
/// the same `_initFromCVDebugDir` downstream path `initCVPtr` does), so it
/// runs the CodeView Translator too. Returns `NoDebugInfo` for plain object
/// files, which callers handle through the component APIs directly if
/// needed.
#[instrument(skip_all)]
pub fn translate_image(image: &Image, config: TranslatorConfig) -> Result<Translation, TranslateError> {
    match image.kind() {
        #[cfg(feature = "dwarf")]
        ImageKind::PeDwarf => translate_dwarf_image(image, &config).map(Translation::Dwarf),
        #[cfg(not(feature = "dwarf"))]
        ImageKind::PeDwarf => Err(TranslateError::NoDebugInfo),
        ImageKind::PeCodeView | ImageKind::DbgFile => translate_codeview_image(image, config).map(Translation::CodeView),
        ImageKind::Object | ImageKind::BigObject => Err(TranslateError::NoDebugInfo),
    }
}

/// Either translation result, tagged by which dialect produced it.
pub enum Translation {
    #[cfg(feature = "dwarf")]
    Dwarf(DwarfTranslation),
    CodeView(codeview::translator::CodeViewOutput),
}

//! Image Reader (spec.md §4.1): memory-maps an input binary, classifies its
//! debug payload, and exposes named `.debug_*` slices plus a symbol lookup.
//!
//! PE images with a DOS/NT header are parsed with [`goblin`], the "raw PE
//! loader" spec.md §1 treats as an external collaborator. Plain COFF object
//! files and big-obj (anonymous-object) files lack that header, so their
//! section and symbol tables are decoded directly against the stable COFF
//! layout in [`coff`].

pub mod coff;
pub mod rsds;

use std::error::Error;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use debugid::DebugId;
use goblin::pe;
use scroll::{Pread, LE};
use thiserror::Error as ThisError;
use tracing::{debug, instrument, warn};

use crate::error::ErrorKind;
use coff::{read_symbol_table, resolve_section_name, SymbolEntryWidth, BIGOBJ_CLASS_ID};
use rsds::*;

/// An error raised by the Image Reader.
#[derive(Debug, ThisError)]
#[error("{kind}")]
pub struct ImageError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ImageError {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        ImageError { kind, source: None }
    }

    fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        ImageError {
            kind,
            source: Some(source.into()),
        }
    }

    /// The [`ErrorKind`] discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// One section of the image, normalized across the PE/COFF/big-obj shapes.
#[derive(Debug, Clone)]
pub struct Section {
    /// Resolved section name (after `/NNN` string-table indirection).
    pub name: String,
    /// Virtual address, relative to the image base (0 for object files).
    pub virtual_address: u32,
    /// Virtual size.
    pub virtual_size: u32,
    /// File offset of the raw section data.
    pub pointer_to_raw_data: u32,
    /// On-disk size of the raw section data.
    pub size_of_raw_data: u32,
    /// Section characteristics flags.
    pub characteristics: u32,
}

impl Section {
    fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address && rva < self.virtual_address + self.virtual_size.max(self.size_of_raw_data)
    }

    /// Byte range of this section's raw data within the file buffer.
    pub fn file_range(&self) -> std::ops::Range<usize> {
        let start = self.pointer_to_raw_data as usize;
        start..start + self.size_of_raw_data as usize
    }
}

/// Which of the shapes in spec.md §6 this image was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A PE executable carrying a CodeView debug directory.
    PeCodeView,
    /// A PE executable carrying `.debug_*` DWARF sections.
    PeDwarf,
    /// A separate `.dbg` debug-companion file.
    DbgFile,
    /// A classic COFF object file.
    Object,
    /// An anonymous-object ("big-obj") file.
    BigObject,
}

/// Word size of the image, driving header-shape dispatch (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    /// 32-bit image (`IMAGE_FILE_MACHINE_I386` and similar).
    W32,
    /// 64-bit image (`IMAGE_FILE_MACHINE_AMD64` or `IMAGE_FILE_MACHINE_IA64`).
    W64,
}

const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const IMAGE_FILE_MACHINE_IA64: u16 = 0x200;

fn word_size_for_machine(machine: u16) -> WordSize {
    if machine == IMAGE_FILE_MACHINE_AMD64 || machine == IMAGE_FILE_MACHINE_IA64 {
        WordSize::W64
    } else {
        WordSize::W32
    }
}

/// Recognized legacy CodeView directory subsection kinds (spec.md §3
/// "CodeView directory"), numbered as in the historical `cvinfo.h`.
pub mod cv_subsection {
    pub const MODULE: u16 = 0x120;
    pub const TYPES: u16 = 0x121;
    pub const PUBLIC: u16 = 0x122;
    pub const SYMBOLS: u16 = 0x124;
    pub const SRC_MODULE: u16 = 0x127;
    pub const LIBRARIES: u16 = 0x128;
    pub const GLOBAL_SYM: u16 = 0x129;
    pub const GLOBAL_PUB: u16 = 0x12a;
    pub const GLOBAL_TYPES: u16 = 0x12b;
    pub const SEG_MAP: u16 = 0x12d;
    pub const STATIC_SYM: u16 = 0x134;
}

const CV_SIGNATURE_NB09: u32 = 0x3930_424e;
const CV_SIGNATURE_NB11: u32 = 0x3131_424e;

/// `IMAGE_SEPARATE_DEBUG_SIGNATURE`: the two-byte "DI" tag at the front of a
/// separate `.dbg` debug-companion file, in place of the DOS `MZ` a full PE
/// image carries.
const DBG_SIGNATURE: u16 = 0x4944;
/// Fixed size of `IMAGE_SEPARATE_DEBUG_HEADER`, preceding the section table
/// in a `.dbg` file.
const DBG_HEADER_SIZE: usize = 48;

/// One entry of a legacy (NB09/NB11) CodeView directory: `(subsection kind,
/// module index, payload offset, payload byte count)`, per spec.md §3.
#[derive(Debug, Clone, Copy)]
pub struct CvDirectoryEntry {
    pub subsection: u16,
    pub module_index: u16,
    pub offset: u32,
    pub size: u32,
}

/// A resolved symbol: which section it lives in, its offset within that
/// section, and whether it was found through an `__imp_`/`__imp__` prefix
/// (indicating an import thunk rather than the symbol itself).
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSymbol {
    /// Index into [`Image::sections`].
    pub section_index: usize,
    /// Offset of the symbol within that section.
    pub offset: u32,
    /// True if resolution fell back to an `__imp`-prefixed alias.
    pub is_dllimport: bool,
}

/// A loaded, classified input image plus the slices and tables the rest of
/// the pipeline needs. The owned byte buffer outlives every borrow handed
/// out by this type, so downstream code can hold `&[u8]` slices into it for
/// as long as the `Image` itself is alive.
pub struct Image {
    data: Vec<u8>,
    kind: ImageKind,
    word_size: WordSize,
    machine: u16,
    image_base: u64,
    timestamp: u32,
    sections: Vec<Section>,
    symbols: Vec<coff::CoffSymbol>,
    symbol_index: once_cell::unsync::OnceCell<std::collections::HashMap<String, usize>>,
    codeview_directory: Option<(u32, u32)>,
    dwarf_sections: std::collections::HashMap<String, (usize, usize)>,
}

impl Image {
    /// True if `data` begins with the DOS `MZ` magic.
    pub fn test(data: &[u8]) -> bool {
        data.get(0..2) == Some(b"MZ")
    }

    /// True if `data` begins with `IMAGE_SEPARATE_DEBUG_SIGNATURE` ("DI"),
    /// the header a linker writes at the front of a separate `.dbg`
    /// debug-companion file.
    pub fn test_dbg(data: &[u8]) -> bool {
        data.pread_with::<u16>(0, LE).map(|sig| sig == DBG_SIGNATURE).unwrap_or(false)
    }

    /// Loads and classifies an image from an in-memory buffer.
    #[instrument(level = "debug", skip(data))]
    pub fn parse(data: Vec<u8>) -> Result<Self, ImageError> {
        if Self::test(&data) {
            Self::parse_pe(data)
        } else if Self::test_dbg(&data) {
            Self::parse_dbg(data)
        } else {
            Self::parse_coff(data)
        }
    }

    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let data = fs::read(path).map_err(|e| ImageError::with_source(ErrorKind::IoFailed, e))?;
        Self::parse(data)
    }

    fn parse_pe(data: Vec<u8>) -> Result<Self, ImageError> {
        let pe = pe::PE::parse(&data).map_err(|e| ImageError::with_source(ErrorKind::NotAnImage, e))?;
        let machine = pe.header.coff_header.machine;
        let word_size = word_size_for_machine(machine);
        let timestamp = pe.header.coff_header.time_date_stamp;
        let image_base = pe.image_base as u64;

        let sections = pe
            .sections
            .iter()
            .map(|s| {
                let name = resolve_section_name(&s.name, &[]).unwrap_or_else(|_| {
                    String::from_utf8_lossy(&s.name).trim_end_matches('\0').to_owned()
                });
                Section {
                    name,
                    virtual_address: s.virtual_address,
                    virtual_size: s.virtual_size,
                    pointer_to_raw_data: s.pointer_to_raw_data,
                    size_of_raw_data: s.size_of_raw_data,
                    characteristics: s.characteristics,
                }
            })
            .collect::<Vec<_>>();

        let has_dwarf = sections.iter().any(|s| s.name == ".debug_info");
        let codeview_directory = pe.debug_data.as_ref().and_then(|dd| {
            dd.entries()
                .filter_map(Result::ok)
                .find(|idd| idd.data_type == pe::debug::IMAGE_DEBUG_TYPE_CODEVIEW)
                .map(|idd| (idd.pointer_to_raw_data, idd.size_of_data))
        });

        let kind = if has_dwarf {
            ImageKind::PeDwarf
        } else if codeview_directory.is_some() {
            ImageKind::PeCodeView
        } else {
            return Err(ImageError::new(ErrorKind::NoDebugInfo));
        };

        let mut dwarf_sections = std::collections::HashMap::new();
        if has_dwarf {
            for s in &sections {
                if let Some(range) = slice_range(&s.file_range(), data.len()) {
                    dwarf_sections.insert(s.name.clone(), range);
                }
            }
        }

        Ok(Image {
            data,
            kind,
            word_size,
            machine,
            image_base,
            timestamp,
            sections,
            symbols: Vec::new(),
            symbol_index: once_cell::unsync::OnceCell::new(),
            codeview_directory,
            dwarf_sections,
        })
    }

    fn parse_coff(data: Vec<u8>) -> Result<Self, ImageError> {
        let trunc = || ImageError::new(ErrorKind::HeaderTruncated);
        if data.len() < 20 {
            return Err(ImageError::new(ErrorKind::NotAnImage));
        }

        let machine: u16 = data.pread_with(0, LE).map_err(|_| trunc())?;
        let section_count: u16 = data.pread_with(2, LE).map_err(|_| trunc())?;

        let is_bigobj = machine == 0
            && section_count == 0xFFFF
            && data.get(4..20) == Some(&BIGOBJ_CLASS_ID[..]);

        let (kind, width, header_size) = if is_bigobj {
            (ImageKind::BigObject, SymbolEntryWidth::BigObj, 56)
        } else {
            (ImageKind::Object, SymbolEntryWidth::Classic, 20)
        };

        let real_machine: u16 = if is_bigobj {
            data.pread_with(6, LE).map_err(|_| trunc())?
        } else {
            machine
        };
        let real_section_count: u32 = if is_bigobj {
            data.pread_with(28, LE).map_err(|_| trunc())?
        } else {
            section_count as u32
        };
        let timestamp: u32 = if is_bigobj {
            data.pread_with(16, LE).map_err(|_| trunc())?
        } else {
            data.pread_with(4, LE).map_err(|_| trunc())?
        };
        let symtab_offset: u32 = if is_bigobj {
            data.pread_with(48, LE).map_err(|_| trunc())?
        } else {
            data.pread_with(8, LE).map_err(|_| trunc())?
        };
        let symtab_count: u32 = if is_bigobj {
            data.pread_with(52, LE).map_err(|_| trunc())?
        } else {
            data.pread_with(12, LE).map_err(|_| trunc())?
        };

        let string_table_offset = symtab_offset as usize + symtab_count as usize * width.entry_size();
        let string_table = data.get(string_table_offset..).unwrap_or(&[]);

        const SECTION_HEADER_SIZE: usize = 40;
        let mut sections = Vec::with_capacity(real_section_count as usize);
        for i in 0..real_section_count {
            let off = header_size + i as usize * SECTION_HEADER_SIZE;
            let raw = data.get(off..off + SECTION_HEADER_SIZE).ok_or_else(trunc)?;
            let raw_name: [u8; 8] = raw[0..8].try_into().unwrap();
            let name = resolve_section_name(&raw_name, string_table)?;
            let virtual_size: u32 = raw.pread_with(8, LE).map_err(|_| trunc())?;
            let pointer_to_raw_data: u32 = raw.pread_with(20, LE).map_err(|_| trunc())?;
            let size_of_raw_data: u32 = raw.pread_with(16, LE).map_err(|_| trunc())?;
            let characteristics: u32 = raw.pread_with(36, LE).map_err(|_| trunc())?;
            sections.push(Section {
                name,
                virtual_address: 0,
                virtual_size,
                pointer_to_raw_data,
                size_of_raw_data,
                characteristics,
            });
        }

        let symbols = read_symbol_table(
            &data,
            symtab_offset as usize,
            symtab_count,
            width,
            string_table,
        )?;

        let mut dwarf_sections = std::collections::HashMap::new();
        for s in &sections {
            if let Some(range) = slice_range(&s.file_range(), data.len()) {
                dwarf_sections.insert(s.name.clone(), range);
            }
        }

        Ok(Image {
            data,
            kind,
            word_size: word_size_for_machine(real_machine),
            machine: real_machine,
            image_base: 0,
            timestamp,
            sections,
            symbols,
            symbol_index: once_cell::unsync::OnceCell::new(),
            codeview_directory: None,
            dwarf_sections,
        })
    }

    /// Parses a separate `.dbg` debug-companion file (`PEImage::initDbgPtr`'s
    /// debug-link recovery path): an `IMAGE_SEPARATE_DEBUG_HEADER`, a section
    /// table, an exported-names blob, then the same `IMAGE_DEBUG_DIRECTORY`
    /// array a full PE image's debug data directory carries, pointing at the
    /// legacy NB09/NB11 CodeView payload. A `.dbg` file carries no COFF
    /// symbol table (`nsym` is always 0 for this shape).
    fn parse_dbg(data: Vec<u8>) -> Result<Self, ImageError> {
        let trunc = || ImageError::new(ErrorKind::HeaderTruncated);
        if data.len() < DBG_HEADER_SIZE {
            return Err(ImageError::new(ErrorKind::NotAnImage));
        }

        let machine: u16 = data.pread_with(4, LE).map_err(|_| trunc())?;
        let timestamp: u32 = data.pread_with(8, LE).map_err(|_| trunc())?;
        let image_base: u32 = data.pread_with(16, LE).map_err(|_| trunc())?;
        let section_count: u32 = data.pread_with(24, LE).map_err(|_| trunc())?;
        let exported_names_size: u32 = data.pread_with(28, LE).map_err(|_| trunc())?;
        let debug_directory_size: u32 = data.pread_with(32, LE).map_err(|_| trunc())?;

        const SECTION_HEADER_SIZE: usize = 40;
        let mut sections = Vec::with_capacity(section_count as usize);
        for i in 0..section_count {
            let off = DBG_HEADER_SIZE + i as usize * SECTION_HEADER_SIZE;
            let raw = data.get(off..off + SECTION_HEADER_SIZE).ok_or_else(trunc)?;
            let raw_name: [u8; 8] = raw[0..8].try_into().unwrap();
            let name = resolve_section_name(&raw_name, &[]).unwrap_or_else(|_| {
                String::from_utf8_lossy(&raw_name).trim_end_matches('\0').to_owned()
            });
            let virtual_address: u32 = raw.pread_with(12, LE).map_err(|_| trunc())?;
            let virtual_size: u32 = raw.pread_with(8, LE).map_err(|_| trunc())?;
            let pointer_to_raw_data: u32 = raw.pread_with(20, LE).map_err(|_| trunc())?;
            let size_of_raw_data: u32 = raw.pread_with(16, LE).map_err(|_| trunc())?;
            let characteristics: u32 = raw.pread_with(36, LE).map_err(|_| trunc())?;
            sections.push(Section {
                name,
                virtual_address,
                virtual_size,
                pointer_to_raw_data,
                size_of_raw_data,
                characteristics,
            });
        }

        let debug_dir_offset = DBG_HEADER_SIZE + section_count as usize * SECTION_HEADER_SIZE + exported_names_size as usize;
        const DEBUG_DIRECTORY_ENTRY_SIZE: usize = 28;
        let entry_count = debug_directory_size as usize / DEBUG_DIRECTORY_ENTRY_SIZE;
        let mut codeview_directory = None;
        for i in 0..entry_count {
            let off = debug_dir_offset + i * DEBUG_DIRECTORY_ENTRY_SIZE;
            let Some(raw) = data.get(off..off + DEBUG_DIRECTORY_ENTRY_SIZE) else {
                break;
            };
            let entry_type: u32 = raw.pread_with(12, LE).map_err(|_| trunc())?;
            if entry_type != pe::debug::IMAGE_DEBUG_TYPE_CODEVIEW {
                continue;
            }
            let size_of_data: u32 = raw.pread_with(16, LE).map_err(|_| trunc())?;
            let pointer_to_raw_data: u32 = raw.pread_with(24, LE).map_err(|_| trunc())?;
            codeview_directory = Some((pointer_to_raw_data, size_of_data));
            break;
        }

        if codeview_directory.is_none() {
            return Err(ImageError::new(ErrorKind::NoDebugInfo));
        }

        Ok(Image {
            data,
            kind: ImageKind::DbgFile,
            word_size: word_size_for_machine(machine),
            machine,
            image_base: image_base as u64,
            timestamp,
            sections,
            symbols: Vec::new(),
            symbol_index: once_cell::unsync::OnceCell::new(),
            codeview_directory,
            dwarf_sections: std::collections::HashMap::new(),
        })
    }

    /// The kind this image was classified as.
    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// Word size, driving 32/64-bit header-shape dispatch.
    pub fn word_size(&self) -> WordSize {
        self.word_size
    }

    /// Raw `Machine` field from the COFF header.
    pub fn machine(&self) -> u16 {
        self.machine
    }

    /// Preferred load address of the image (0 for object files).
    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    /// COFF header timestamp, reused verbatim in synthesized debug directory
    /// entries.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// All sections of the image, in file order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Raw file bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns a named `.debug_*` slice, if present and within buffer bounds.
    ///
    /// Per spec.md §3 invariant, a slice whose offset+length exceeds the
    /// buffer is reported as absent rather than truncated.
    pub fn debug_section(&self, name: &str) -> Option<&[u8]> {
        let (start, end) = *self.dwarf_sections.get(name)?;
        self.data.get(start..end)
    }

    /// Raw bytes of the legacy CodeView debug-directory payload, if the
    /// image carries one. This is the blob a `cvdump`-style NB09/NB11
    /// signature and directory header live inside.
    pub fn codeview_payload(&self) -> Option<&[u8]> {
        let (offset, size) = self.codeview_directory?;
        self.data.get(offset as usize..(offset as usize + size as usize))
    }

    /// Parses the NB09/NB11 directory header inside [`Self::codeview_payload`]
    /// and returns its entries. `None` if there is no CodeView payload, or if
    /// its signature isn't one of the two legacy directory-based forms (for
    /// example a PDB70/RSDS pointer, which carries no embedded type/symbol
    /// records for this translator to read).
    pub fn codeview_entries(&self) -> Option<Vec<CvDirectoryEntry>> {
        let payload = self.codeview_payload()?;
        let mut cursor = 0usize;
        let signature: u32 = payload.gread_with(&mut cursor, LE).ok()?;
        if signature != CV_SIGNATURE_NB09 && signature != CV_SIGNATURE_NB11 {
            return None;
        }
        let lfo_directory: u32 = payload.gread_with(&mut cursor, LE).ok()?;
        let mut header_cursor = lfo_directory as usize;
        let cb_dir_header: u16 = payload.gread_with(&mut header_cursor, LE).ok()?;
        let cb_dir_entry: u16 = payload.gread_with(&mut header_cursor, LE).ok()?;
        let c_dir: u32 = payload.gread_with(&mut header_cursor, LE).ok()?;
        let _lfo_next_dir: u32 = payload.gread_with(&mut header_cursor, LE).ok()?;
        let _flags: u32 = payload.gread_with(&mut header_cursor, LE).ok()?;

        let mut entry_cursor = lfo_directory as usize + cb_dir_header as usize;
        let mut entries = Vec::with_capacity(c_dir as usize);
        for _ in 0..c_dir {
            let entry_start = entry_cursor;
            let subsection: u16 = payload.gread_with(&mut entry_cursor, LE).ok()?;
            let module_index: u16 = payload.gread_with(&mut entry_cursor, LE).ok()?;
            let offset: u32 = payload.gread_with(&mut entry_cursor, LE).ok()?;
            let size: u32 = payload.gread_with(&mut entry_cursor, LE).ok()?;
            entries.push(CvDirectoryEntry { subsection, module_index, offset, size });
            entry_cursor = entry_start + cb_dir_entry as usize;
        }
        Some(entries)
    }

    /// Concatenated payload of every directory entry matching `subsection`
    /// (for example [`cv_subsection::GLOBAL_TYPES`]).
    pub fn codeview_subsection(&self, subsection: u16) -> Option<Vec<u8>> {
        let payload = self.codeview_payload()?;
        let entries = self.codeview_entries()?;
        let mut out = Vec::new();
        for entry in entries.iter().filter(|e| e.subsection == subsection) {
            let start = entry.offset as usize;
            let end = start + entry.size as usize;
            out.extend_from_slice(payload.get(start..end)?);
        }
        Some(out)
    }

    /// Finds the section whose virtual extent contains `rva - image_base`.
    pub fn find_section(&self, rva: u32) -> Option<usize> {
        let rel = rva.checked_sub(self.image_base as u32)?;
        self.sections.iter().position(|s| s.contains_rva(rel))
    }

    /// Resolves a virtual address to `(section index, offset within that
    /// section)`, applying the same `addr - image_base` shift
    /// [`Image::find_section`] uses internally before its own match.
    pub fn resolve_section_offset(&self, addr: u64) -> Option<(usize, u32)> {
        let section_index = self.find_section(addr as u32)?;
        let rel = (addr as u32).wrapping_sub(self.image_base as u32);
        let section = &self.sections[section_index];
        Some((section_index, rel.saturating_sub(section.virtual_address)))
    }

    fn symbol_index(&self) -> &std::collections::HashMap<String, usize> {
        self.symbol_index.get_or_init(|| {
            self.symbols
                .iter()
                .enumerate()
                .map(|(i, s)| (s.name.clone(), i))
                .collect()
        })
    }

    /// Resolves `name` against the symbol table, trying in order: exact,
    /// `_`-prefixed, `__imp_`-prefixed, `__imp__`-prefixed (spec.md §4.1).
    pub fn find_symbol(&self, name: &str) -> Option<ResolvedSymbol> {
        let index = self.symbol_index();
        let candidates = [
            (name.to_owned(), false),
            (format!("_{name}"), false),
            (format!("__imp_{name}"), true),
            (format!("__imp__{name}"), true),
        ];
        for (candidate, is_dllimport) in candidates {
            if let Some(&i) = index.get(&candidate) {
                let sym = &self.symbols[i];
                if sym.section_number > 0 {
                    return Some(ResolvedSymbol {
                        section_index: sym.section_number as usize - 1,
                        offset: sym.value,
                        is_dllimport,
                    });
                }
            }
        }
        None
    }

    /// Rewrites the image so the last section becomes `.debug`, containing
    /// `bytes` followed by a fresh debug-directory entry (spec.md §4.1).
    ///
    /// When `install_debug_directory` is true (or no prior debug directory
    /// existed), the data directory's debug entry and a 28-byte
    /// `IMAGE_DEBUG_DIRECTORY` are installed pointing at `bytes`'s start;
    /// existing virtual addresses of all other sections are preserved.
    #[instrument(level = "debug", skip(self, bytes))]
    pub fn replace_debug_section(
        &mut self,
        bytes: &[u8],
        install_debug_directory: bool,
    ) -> Result<(), ImageError> {
        let trunc = || ImageError::new(ErrorKind::HeaderTruncated);
        let e_lfanew: u32 = self.data.pread_with(DOS_E_LFANEW_OFFSET, LE).map_err(|_| trunc())?;
        let sig_offset = e_lfanew as usize;
        if self.data.get(sig_offset..sig_offset + 4) != Some(b"PE\0\0") {
            return Err(ImageError::new(ErrorKind::NotAnImage));
        }
        let coff_offset = sig_offset + COFF_HEADER_OFFSET_FROM_SIGNATURE;
        let opt_offset = coff_offset + COFF_HEADER_SIZE;
        let magic: u16 = self.data.pread_with(opt_offset + OPT_MAGIC_OFFSET, LE).map_err(|_| trunc())?;
        let dir_base = if magic == OPT_MAGIC_PE32_PLUS {
            opt_offset + OPT_DATA_DIRECTORY_OFFSET_PE32_PLUS
        } else {
            opt_offset + OPT_DATA_DIRECTORY_OFFSET_PE32
        };
        let file_alignment: u32 = self
            .data
            .pread_with(opt_offset + OPT_FILE_ALIGNMENT_OFFSET, LE)
            .map_err(|_| trunc())?;
        let file_alignment = file_alignment.max(1);

        let last = self
            .sections
            .last()
            .cloned()
            .ok_or_else(|| ImageError::new(ErrorKind::HeaderTruncated))?;

        let payload_file_offset = last.pointer_to_raw_data as usize;
        let padded_len = align_up(bytes.len() as u32 + DEBUG_DIRECTORY_ENTRY_SIZE as u32, file_alignment);

        self.data.truncate(payload_file_offset);
        self.data.extend_from_slice(bytes);
        let directory_file_offset = payload_file_offset + bytes.len();
        let directory_rva = last.virtual_address + bytes.len() as u32;

        let entry = DebugDirectoryEntry {
            characteristics: 0,
            time_date_stamp: self.timestamp,
            major_version: 0,
            minor_version: 0,
            kind: IMAGE_DEBUG_TYPE_CODEVIEW,
            size_of_data: bytes.len() as u32,
            address_of_raw_data: last.virtual_address,
            pointer_to_raw_data: payload_file_offset as u32,
        };
        self.data.extend_from_slice(&entry.encode());
        self.data.resize(payload_file_offset + padded_len as usize, 0);

        let new_size = self.data.len() as u32 - payload_file_offset as u32;
        let virtual_size = bytes.len() as u32 + DEBUG_DIRECTORY_ENTRY_SIZE as u32;

        self.sections.last_mut().unwrap().name = ".debug".to_owned();
        self.sections.last_mut().unwrap().size_of_raw_data = new_size;
        self.sections.last_mut().unwrap().virtual_size = virtual_size;

        let size_of_image_offset = opt_offset + OPT_SIZE_OF_IMAGE_OFFSET;
        let section_alignment: u32 = self.data.pread_with(opt_offset + 32, LE).map_err(|_| trunc())?;
        let section_alignment = section_alignment.max(1);
        let new_size_of_image = align_up(last.virtual_address + virtual_size, section_alignment);
        self.data[size_of_image_offset..size_of_image_offset + 4]
            .copy_from_slice(&new_size_of_image.to_le_bytes());

        if install_debug_directory || self.codeview_directory.is_some() {
            let debug_dir_entry_offset = dir_base + IMAGE_DIRECTORY_ENTRY_DEBUG * DATA_DIRECTORY_ENTRY_SIZE;
            self.data[debug_dir_entry_offset..debug_dir_entry_offset + 4]
                .copy_from_slice(&directory_rva.to_le_bytes());
            self.data[debug_dir_entry_offset + 4..debug_dir_entry_offset + 8]
                .copy_from_slice(&(DEBUG_DIRECTORY_ENTRY_SIZE as u32).to_le_bytes());
        }

        debug!(
            payload_len = bytes.len(),
            directory_file_offset, "rewrote debug section"
        );
        Ok(())
    }

    /// Writes the owned buffer to `path` via a temp-file-plus-rename, so a
    /// crash mid-write never leaves a half-written output file behind
    /// (spec.md §7 "temp-file-plus-rename discipline").
    pub fn save(&self, path: &Path) -> Result<(), ImageError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile_in(dir).map_err(|e| ImageError::with_source(ErrorKind::IoFailed, e))?;
        tmp.write_all(&self.data)
            .map_err(|e| ImageError::with_source(ErrorKind::IoFailed, e))?;
        tmp.persist(path)
            .map_err(|e| ImageError::with_source(ErrorKind::IoFailed, e.error))?;
        Ok(())
    }

    /// Returns the GUID/age a fresh RSDS blob for this image should carry.
    ///
    /// Derived deterministically from the image's timestamp and size so
    /// repeated runs over the same unmodified binary are reproducible.
    pub fn synthesize_debug_id(&self) -> DebugId {
        let mut guid = [0u8; 16];
        guid[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        guid[4..8].copy_from_slice(&(self.data.len() as u32).to_le_bytes());
        DebugId::from_guid_age(&guid, 1).unwrap_or_else(|_| DebugId::nil())
    }
}

fn slice_range(range: &std::ops::Range<usize>, len: usize) -> Option<(usize, usize)> {
    let start = range.start;
    let end = range.end;
    if start <= end && end <= len {
        Some((start, end))
    } else {
        warn!(start, end, len, "debug section slice out of bounds, reporting as absent");
        None
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

fn tempfile_in(dir: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::new_in(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(10, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn word_size_dispatches_on_machine() {
        assert_eq!(word_size_for_machine(IMAGE_FILE_MACHINE_AMD64), WordSize::W64);
        assert_eq!(word_size_for_machine(IMAGE_FILE_MACHINE_IA64), WordSize::W64);
        assert_eq!(word_size_for_machine(0x014c), WordSize::W32);
    }

    #[test]
    fn non_image_buffer_is_not_an_image() {
        assert!(!Image::test(b"not a pe file"));
    }

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Builds a minimal `.dbg` file: a header with no sections and one
    /// `IMAGE_DEBUG_DIRECTORY` entry pointing at a tiny NB09 payload.
    fn synthetic_dbg_file() -> Vec<u8> {
        let mut buf = Vec::new();
        push_u16(&mut buf, DBG_SIGNATURE); // Signature
        push_u16(&mut buf, 0); // Flags
        push_u16(&mut buf, 0x014c); // Machine
        push_u16(&mut buf, 0); // Characteristics
        push_u32(&mut buf, 0); // TimeDateStamp
        push_u32(&mut buf, 0); // CheckSum
        push_u32(&mut buf, 0x0040_0000); // ImageBase
        push_u32(&mut buf, 0); // SizeOfImage
        push_u32(&mut buf, 0); // NumberOfSections
        push_u32(&mut buf, 0); // ExportedNamesSize
        push_u32(&mut buf, 28); // DebugDirectorySize: one entry
        push_u32(&mut buf, 0); // SectionAlignment
        push_u32(&mut buf, 0); // Reserved[0]
        push_u32(&mut buf, 0); // Reserved[1]
        assert_eq!(buf.len(), DBG_HEADER_SIZE);

        let payload_offset = DBG_HEADER_SIZE + 28;
        let payload_size = 24u32;

        push_u32(&mut buf, 0); // Characteristics
        push_u32(&mut buf, 0); // TimeDateStamp
        push_u16(&mut buf, 0); // MajorVersion
        push_u16(&mut buf, 0); // MinorVersion
        push_u32(&mut buf, pe::debug::IMAGE_DEBUG_TYPE_CODEVIEW); // Type
        push_u32(&mut buf, payload_size); // SizeOfData
        push_u32(&mut buf, 0); // AddressOfRawData
        push_u32(&mut buf, payload_offset as u32); // PointerToRawData

        buf.extend_from_slice(b"NB09");
        push_u32(&mut buf, 8); // lfo_directory, relative to payload start
        push_u16(&mut buf, 16); // cb_dir_header
        push_u16(&mut buf, 12); // cb_dir_entry
        push_u32(&mut buf, 0); // c_dir
        push_u32(&mut buf, 0); // lfo_next_dir
        push_u32(&mut buf, 0); // flags
        assert_eq!(buf.len(), payload_offset + payload_size as usize);

        buf
    }

    #[test]
    fn dbg_signature_is_recognized() {
        let buf = synthetic_dbg_file();
        assert!(Image::test_dbg(&buf));
        assert!(!Image::test(&buf));
    }

    #[test]
    fn dbg_file_parses_to_dbg_file_kind_with_codeview_payload() {
        let buf = synthetic_dbg_file();
        let image = Image::parse(buf).unwrap();
        assert_eq!(image.kind(), ImageKind::DbgFile);
        assert_eq!(image.word_size(), WordSize::W32);
        let payload = image.codeview_payload().unwrap();
        assert_eq!(&payload[0..4], b"NB09");
        assert!(image.codeview_entries().is_some());
    }
}

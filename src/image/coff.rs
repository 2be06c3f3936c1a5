//! COFF symbol/string table decoding shared by the object-file and
//! big-object-file dispatch paths (spec.md §4.1, §6).
//!
//! Both shapes share a string table format (a 4-byte length prefix followed
//! by NUL-terminated names) and a name-resolution rule for section names
//! longer than 8 bytes (`/NNN` indirects through the string table). The
//! symbol entry width is the only thing that differs: 18 bytes for classic
//! COFF, 20 bytes for "big-obj" (anonymous object) files.

use scroll::{Pread, LE};

use crate::error::ErrorKind;

use super::ImageError;

/// GUID identifying an anonymous-object ("big-obj") header, per spec.md §6.
pub const BIGOBJ_CLASS_ID: [u8; 16] = [
    0xC7, 0xA1, 0xBA, 0xD1, 0xEE, 0xBA, 0xA9, 0x4B, 0xAF, 0x20, 0xFA, 0xF6, 0x6A, 0xA4, 0xDC, 0xB8,
];

/// One decoded COFF symbol table entry, normalized across the 18/20-byte
/// shapes.
#[derive(Debug, Clone)]
pub struct CoffSymbol {
    /// Resolved name (either the inline 8-byte name or a string-table hit).
    pub name: String,
    /// Value field: for most storage classes, a section-relative offset.
    pub value: u32,
    /// 1-based section number, or a special value (`0` = undefined,
    /// `0xFFFF`/`0xFFFE` = absolute/debug) per the COFF spec.
    pub section_number: i32,
    /// Number of auxiliary entries that follow this one (skipped as-is).
    pub num_aux: u8,
}

/// Whether symbol entries are the classic 18-byte COFF shape or the
/// big-obj 20-byte shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolEntryWidth {
    /// Classic COFF object, 18-byte `IMAGE_SYMBOL` entries.
    Classic,
    /// Big-obj (anonymous object) files, 20-byte entries (wider section
    /// number field).
    BigObj,
}

impl SymbolEntryWidth {
    /// Byte size of one symbol table entry (aux entries included) of this shape.
    pub fn entry_size(self) -> usize {
        match self {
            SymbolEntryWidth::Classic => 18,
            SymbolEntryWidth::BigObj => 20,
        }
    }
}

/// Resolves a COFF section name, following `/NNN` indirection into the
/// string table when the name doesn't fit inline.
pub fn resolve_section_name(raw: &[u8; 8], string_table: &[u8]) -> Result<String, ImageError> {
    if raw[0] == b'/' {
        let digits = std::str::from_utf8(&raw[1..])
            .map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))?
            .trim_end_matches('\0');
        let offset: usize = digits
            .parse()
            .map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))?;
        read_string_table_entry(string_table, offset)
    } else {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(8);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// Reads a NUL-terminated string at `offset` within the string table.
///
/// The first 4 bytes of the string table are its own total length (itself
/// counted in the offsets symbols use), so `offset` is relative to the start
/// of the table, not to the name data following the length prefix.
pub fn read_string_table_entry(string_table: &[u8], offset: usize) -> Result<String, ImageError> {
    let bytes = string_table
        .get(offset..)
        .ok_or_else(|| ImageError::new(ErrorKind::HeaderTruncated))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Decodes every primary symbol table entry (auxiliary entries are skipped,
/// advancing past them using `num_aux`).
pub fn read_symbol_table(
    data: &[u8],
    offset: usize,
    count: u32,
    width: SymbolEntryWidth,
    string_table: &[u8],
) -> Result<Vec<CoffSymbol>, ImageError> {
    let entry_size = width.entry_size();
    let mut symbols = Vec::with_capacity(count as usize);
    let mut i: u32 = 0;
    while i < count {
        let entry_off = offset + i as usize * entry_size;
        let entry = data
            .get(entry_off..entry_off + entry_size)
            .ok_or_else(|| ImageError::new(ErrorKind::HeaderTruncated))?;

        let short_name: [u8; 8] = entry[0..8].try_into().unwrap();
        let name = if short_name[0..4] != [0, 0, 0, 0] {
            let end = short_name.iter().position(|&b| b == 0).unwrap_or(8);
            String::from_utf8_lossy(&short_name[..end]).into_owned()
        } else {
            let str_offset: u32 = entry.pread_with(4, LE).map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))?;
            read_string_table_entry(string_table, str_offset as usize)?
        };

        let value: u32 = entry
            .pread_with(8, LE)
            .map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))?;
        let section_number: i32 = match width {
            SymbolEntryWidth::Classic => {
                entry.pread_with::<i16>(12, LE).map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))? as i32
            }
            SymbolEntryWidth::BigObj => entry
                .pread_with(12, LE)
                .map_err(|_| ImageError::new(ErrorKind::HeaderTruncated))?,
        };
        let num_aux_offset = if width == SymbolEntryWidth::BigObj { 19 } else { 17 };
        let num_aux = entry[num_aux_offset];

        symbols.push(CoffSymbol {
            name,
            value,
            section_number,
            num_aux,
        });

        i += 1 + num_aux as u32;
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_inline_short_name() {
        let raw = *b".text\0\0\0";
        let name = resolve_section_name(&raw, &[]).unwrap();
        assert_eq!(name, ".text");
    }

    #[test]
    fn resolves_long_name_via_string_table() {
        let mut raw = [0u8; 8];
        raw[0] = b'/';
        raw[1] = b'4';
        // String table: 4-byte length prefix, then the name starting at offset 4.
        let mut table = 13u32.to_le_bytes().to_vec();
        table.extend_from_slice(b".debug$S\0");
        let name = resolve_section_name(&raw, &table).unwrap();
        assert_eq!(name, ".debug$S");
    }
}

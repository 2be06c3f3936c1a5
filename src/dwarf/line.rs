//! Line-Number Reconstructor (spec.md §4.7): runs gimli's `.debug_line`
//! state machine to decode rows, then re-batches them the way the output
//! sink's `add_lines` call expects — one batch per contiguous run that
//! doesn't change file, go backward, or overflow a 16-bit line delta.

use crate::error::ErrorKind;
use crate::image::Image;

use super::reader::CompilationUnit;
use super::{DwarfError, Slice};

/// One sink-ready line table: a contiguous run of rows sharing a file and
/// increasing address, line numbers stored as deltas from `line_base`.
#[derive(Debug, Clone)]
pub struct LineBatch {
    pub filename: String,
    pub segment: u16,
    pub seg_offset: u32,
    pub length: u32,
    pub line_base: u32,
    /// `(address delta from the batch's first row, line delta from `line_base`)`.
    pub entries: Vec<(u32, i32)>,
}

struct OpenBatch {
    filename: String,
    base_address: u64,
    last_address: u64,
    line_base: u32,
    entries: Vec<(u32, i32)>,
}

/// Reconstructs every line table for `unit`'s line program, if it has one.
pub fn reconstruct(image: &Image, reader: &super::reader::DwarfReader<'_>, unit: &CompilationUnit<'_>) -> Result<Vec<LineBatch>, DwarfError> {
    let Some(program) = unit.unit.line_program.clone() else {
        return Ok(Vec::new());
    };

    let header = program.header().clone();
    let mut rows = program.rows();
    let mut out = Vec::new();
    let mut current: Option<OpenBatch> = None;
    let mut last_real_address: u64 = 0;

    while let Some((_, row)) = rows.next_row()? {
        let mut address = row.address();
        if address == 0 {
            // A workaround for instantiation noise from the source compiler:
            // spec.md §4.7 "Address 0 ... reuse the last real address".
            address = last_real_address;
        } else {
            last_real_address = address;
        }

        if row.end_sequence() {
            if let Some(batch) = current.take() {
                out.push(finish_batch(image, batch)?);
            }
            continue;
        }

        let filename = resolve_filename(reader, unit, &header, row.file_index());
        let line = row.line().map(|l| l.get()).unwrap_or(0) as i32;

        let needs_flush = match &current {
            None => false,
            Some(batch) => {
                batch.filename != filename
                    || address < batch.last_address
                    || (line - batch.line_base as i32) > 0xFFFF
                    || (line - batch.line_base as i32) < 0
            }
        };

        if needs_flush {
            if let Some(batch) = current.take() {
                out.push(finish_batch(image, batch)?);
            }
        }

        let batch = current.get_or_insert_with(|| OpenBatch {
            filename: filename.clone(),
            base_address: address,
            last_address: address,
            line_base: line as u32,
            entries: Vec::new(),
        });
        let addr_delta = (address - batch.base_address) as u32;
        let line_delta = line - batch.line_base as i32;
        batch.entries.push((addr_delta, line_delta));
        batch.last_address = address;
    }

    if let Some(batch) = current.take() {
        out.push(finish_batch(image, batch)?);
    }

    Ok(out)
}

fn finish_batch(image: &Image, batch: OpenBatch) -> Result<LineBatch, DwarfError> {
    let (section_index, seg_offset) = image
        .resolve_section_offset(batch.base_address)
        .ok_or_else(|| DwarfError::new(ErrorKind::BadLineProgram))?;
    let length = (batch.last_address.saturating_sub(batch.base_address)) as u32;

    Ok(LineBatch {
        filename: batch.filename,
        segment: (section_index + 1) as u16,
        seg_offset,
        length,
        line_base: batch.line_base,
        entries: batch.entries,
    })
}

fn resolve_filename(
    reader: &super::reader::DwarfReader<'_>,
    unit: &CompilationUnit<'_>,
    header: &gimli::LineProgramHeader<Slice<'_>>,
    file_index: u64,
) -> String {
    let Some(file) = header.file(file_index) else {
        return String::from("<unknown>");
    };
    let name = reader
        .attr_string(&unit.unit, file.path_name())
        .unwrap_or_else(|| String::from("<unknown>"));

    if name.starts_with('/') || name.contains(':') {
        return name;
    }

    let dir_index = file.directory_index();
    let dir = header
        .directory(dir_index)
        .and_then(|d| reader.attr_string(&unit.unit, d));

    match dir {
        Some(dir) if !dir.is_empty() => format!("{dir}/{name}"),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_batch_stores_deltas_relative_to_base() {
        let batch = LineBatch {
            filename: "a.c".into(),
            segment: 1,
            seg_offset: 0x10,
            length: 0x20,
            line_base: 5,
            entries: vec![(0, 0), (4, 1), (8, 3)],
        };
        assert_eq!(batch.entries[2], (8, 3));
    }
}

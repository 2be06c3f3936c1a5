//! DWARF Translator (spec.md §4.5): a two-pass walk over every compilation
//! unit — pass one assigns output type indices to every type-producing DIE
//! without emitting anything, pass two walks the same DIEs again and emits
//! type and symbol records through the same wire encoding
//! [`crate::codeview`] uses, so both translators feed one output stream.

use std::collections::HashMap;

use gimli::constants as c;
use gimli::DwAte;

use crate::codeview::{emit_record, kind, symkind};
use crate::config::TranslatorConfig;
use crate::image::Image;
use crate::index::{DieOffset, IndexRemap, TypeIdx, TypeIndexAllocator};
use crate::leaf::{name_copy, write_numeric_leaf, NameStyle};
use crate::udt::UdtTable;

use super::location::{evaluate, Location};
use super::reader::{is_type_producing, DecodedDie, DwarfReader, MemberLocation};
use super::DwarfError;

fn name_style(config: &TranslatorConfig) -> NameStyle {
    if config.use_v3_names {
        NameStyle::ZeroTerminated
    } else {
        NameStyle::Pascal
    }
}

/// Maps a base type's `(encoding, byte_size)` to the nearest CodeView basic
/// type id (spec.md §4.5 "base types map to the nearest basic type id,
/// best-effort on mismatch").
fn basic_type(encoding: Option<DwAte>, byte_size: Option<u64>) -> TypeIdx {
    const T_VOID: u32 = 0x0003;
    const T_CHAR: u32 = 0x0010;
    const T_UCHAR: u32 = 0x0020;
    const T_SHORT: u32 = 0x0011;
    const T_USHORT: u32 = 0x0021;
    const T_INT4: u32 = 0x0074;
    const T_UINT4: u32 = 0x0075;
    const T_QUAD: u32 = 0x0013;
    const T_UQUAD: u32 = 0x0023;
    const T_REAL32: u32 = 0x0040;
    const T_REAL64: u32 = 0x0041;
    const T_BOOL08: u32 = 0x0030;

    let size = byte_size.unwrap_or(4);
    let idx = if encoding == Some(c::DW_ATE_boolean) {
        T_BOOL08
    } else if encoding == Some(c::DW_ATE_float) {
        if size == 8 { T_REAL64 } else { T_REAL32 }
    } else if encoding == Some(c::DW_ATE_unsigned_char) {
        T_UCHAR
    } else if encoding == Some(c::DW_ATE_signed_char) {
        T_CHAR
    } else if encoding == Some(c::DW_ATE_unsigned) {
        match size {
            1 => T_UCHAR,
            2 => T_USHORT,
            8 => T_UQUAD,
            _ => T_UINT4,
        }
    } else if encoding == Some(c::DW_ATE_signed) {
        match size {
            1 => T_CHAR,
            2 => T_SHORT,
            8 => T_QUAD,
            _ => T_INT4,
        }
    } else {
        T_VOID
    };
    TypeIdx(idx)
}

/// CodeView basic type id used for array index types and as a safe
/// placeholder when a reference cannot be resolved.
const T_UINT4: u32 = 0x0075;
const T_VOID: u32 = 0x0003;

/// Resolves a virtual address to its section index and offset within that
/// section, delegating to [`Image::resolve_section_offset`] so the
/// `rva - image_base` math lives in one place.
fn resolve_address(image: &Image, addr: u64) -> Option<(usize, u32)> {
    image.resolve_section_offset(addr)
}

/// Types and section contributions produced by one translation run.
#[derive(Debug, Default)]
pub struct DwarfOutput {
    pub types: Vec<u8>,
    pub symbols: Vec<u8>,
    /// `(segment, offset, size)` per compilation unit with known bounds.
    pub section_contributions: Vec<(u16, u32, u32)>,
}

pub struct DwarfTranslator<'cfg> {
    config: &'cfg TranslatorConfig,
    remap: IndexRemap<DieOffset>,
    allocator: TypeIndexAllocator,
    aux_idx: HashMap<DieOffset, TypeIdx>,
    sizes: HashMap<DieOffset, u64>,
}

impl<'cfg> DwarfTranslator<'cfg> {
    pub fn new(config: &'cfg TranslatorConfig) -> Self {
        DwarfTranslator {
            config,
            remap: IndexRemap::new(),
            allocator: TypeIndexAllocator::new(),
            aux_idx: HashMap::new(),
            sizes: HashMap::new(),
        }
    }

    /// Runs both passes over every unit in `image` and returns the
    /// accumulated type/symbol blobs.
    pub fn translate(&mut self, image: &Image, udt: &mut UdtTable) -> Result<DwarfOutput, DwarfError> {
        let mut reader = DwarfReader::load(image)?;
        let units = reader.units()?;

        for cu in &units {
            let mut cursor = reader.cursor(cu)?;
            while let Some(die) = cursor.read_next()? {
                if let Some(sz) = die.attrs.byte_size {
                    self.sizes.insert(die.offset, sz);
                }
                self.map_die(&die);
            }
        }

        let mut out = DwarfOutput::default();
        for cu in &units {
            let mut cursor = reader.cursor(cu)?;
            let mut cu_low = None;
            let mut cu_high = None;
            while let Some(die) = cursor.read_next()? {
                if die.tag == c::DW_TAG_compile_unit {
                    cu_low = die.attrs.low_pc;
                    cu_high = die.attrs.high_pc;
                    continue;
                }
                if is_type_producing(die.tag) && die.tag != c::DW_TAG_base_type {
                    self.emit_type(&die, &cursor, &mut out.types)?;
                } else {
                    match die.tag {
                        c::DW_TAG_subprogram => self.emit_subprogram(image, &die, &cursor, &mut out.symbols)?,
                        c::DW_TAG_lexical_block => self.emit_lexical_block(image, &die, &mut out.symbols),
                        c::DW_TAG_variable => self.emit_variable(image, &die, udt, &mut out.symbols),
                        _ => {}
                    }
                }
            }
            if let (Some(low), Some(high)) = (cu_low, cu_high) {
                if let Some((section_index, offset)) = resolve_address(image, low) {
                    out.section_contributions
                        .push(((section_index + 1) as u16, offset, (high - low) as u32));
                }
            }
        }
        Ok(out)
    }

    /// Pass one: assigns output indices without emitting anything.
    fn map_die(&mut self, die: &DecodedDie) {
        match die.tag {
            c::DW_TAG_base_type => {
                self.remap.insert(die.offset, basic_type(die.attrs.encoding, die.attrs.byte_size));
            }
            c::DW_TAG_structure_type | c::DW_TAG_class_type | c::DW_TAG_union_type => {
                let aux = self.allocator.alloc();
                self.aux_idx.insert(die.offset, aux);
                let idx = self.allocator.alloc();
                self.remap.insert(die.offset, idx);
            }
            c::DW_TAG_enumeration_type => {
                let aux = self.allocator.alloc();
                self.aux_idx.insert(die.offset, aux);
                let idx = self.allocator.alloc();
                self.remap.insert(die.offset, idx);
            }
            c::DW_TAG_subroutine_type => {
                let aux = self.allocator.alloc();
                self.aux_idx.insert(die.offset, aux);
                let idx = self.allocator.alloc();
                self.remap.insert(die.offset, idx);
            }
            _ if is_type_producing(die.tag) => {
                let idx = self.allocator.alloc();
                self.remap.insert(die.offset, idx);
            }
            _ => {}
        }
    }

    fn resolve(&self, offset: Option<DieOffset>) -> TypeIdx {
        offset.and_then(|o| self.remap.get(o)).unwrap_or(TypeIdx(T_VOID))
    }

    /// Pass two: emits the output record for one already-mapped type DIE.
    /// `cursor` must currently sit on `die` so children can be walked
    /// through [`super::reader::DieCursor::subtree_cursor`].
    fn emit_type(
        &mut self,
        die: &DecodedDie,
        cursor: &super::reader::DieCursor<'_, '_, '_>,
        types: &mut Vec<u8>,
    ) -> Result<(), DwarfError> {
        match die.tag {
            c::DW_TAG_typedef | c::DW_TAG_unspecified_type => {
                let underlying = self.resolve(die.attrs.type_ref);
                let mut body = Vec::with_capacity(8);
                body.extend_from_slice(&underlying.0.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes());
                emit_record(types, kind::LF_MODIFIER, &body);
            }
            c::DW_TAG_const_type | c::DW_TAG_volatile_type | c::DW_TAG_restrict_type => {
                let underlying = self.resolve(die.attrs.type_ref);
                let attr: u16 = match die.tag {
                    t if t == c::DW_TAG_const_type => 0x0001,
                    t if t == c::DW_TAG_volatile_type => 0x0002,
                    _ => 0x0000,
                };
                let mut body = Vec::with_capacity(8);
                body.extend_from_slice(&underlying.0.to_le_bytes());
                body.extend_from_slice(&attr.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes());
                emit_record(types, kind::LF_MODIFIER, &body);
            }
            c::DW_TAG_pointer_type | c::DW_TAG_reference_type | c::DW_TAG_rvalue_reference_type => {
                let pointee = self.resolve(die.attrs.type_ref);
                const CV_PTR_NEAR32: u32 = 0x0A;
                let is_ref = die.tag != c::DW_TAG_pointer_type;
                let attr: u32 = CV_PTR_NEAR32 | if is_ref { 0x20 } else { 0 };
                let mut body = Vec::with_capacity(8);
                body.extend_from_slice(&pointee.0.to_le_bytes());
                body.extend_from_slice(&attr.to_le_bytes());
                emit_record(types, kind::LF_POINTER, &body);
            }
            c::DW_TAG_array_type => {
                let elem = self.resolve(die.attrs.type_ref);
                let elem_size = die
                    .attrs
                    .type_ref
                    .and_then(|o| self.sizes.get(&o).copied())
                    .unwrap_or(1);
                let mut count = None;
                let mut sub = cursor.subtree_cursor()?;
                while let Some(child) = sub.read_next()? {
                    if child.tag == c::DW_TAG_subrange_type {
                        count = Some(child.attrs.count.unwrap_or_else(|| {
                            let lo = child.attrs.lower_bound.unwrap_or(0);
                            let hi = child.attrs.upper_bound.unwrap_or(-1);
                            (hi - lo + 1).max(0) as u64
                        }));
                        break;
                    }
                }
                let total = count.unwrap_or(0).saturating_mul(elem_size);
                let mut body = Vec::new();
                body.extend_from_slice(&elem.0.to_le_bytes());
                body.extend_from_slice(&T_UINT4.to_le_bytes());
                write_numeric_leaf(total as i128, &mut body);
                name_copy(&mut body, "", name_style(self.config), self.config.dot_replacement);
                emit_record(types, kind::LF_ARRAY, &body);
            }
            c::DW_TAG_structure_type | c::DW_TAG_class_type | c::DW_TAG_union_type => {
                let mut field_list = Vec::new();
                let mut member_count = 0u32;
                let mut sub = cursor.subtree_cursor()?;
                while let Some(child) = sub.read_next()? {
                    if child.tag != c::DW_TAG_member {
                        continue;
                    }
                    let mty = self.resolve(child.attrs.type_ref);
                    let offset = match &child.attrs.member_location {
                        Some(MemberLocation::Constant(v)) => *v as i128,
                        _ => 0,
                    };
                    let name = child.attrs.name.clone().unwrap_or_default();
                    emit_field_member(&mut field_list, mty, offset, &name, self.config);
                    member_count += 1;
                }
                emit_record(types, kind::LF_FIELDLIST, &field_list);

                let field_list_idx = self.aux_idx.get(&die.offset).copied().unwrap_or(TypeIdx(0));
                let size = die.attrs.byte_size.unwrap_or(0);
                let name = die.attrs.name.clone().unwrap_or_default();
                let kind_tag = match die.tag {
                    t if t == c::DW_TAG_class_type => kind::LF_CLASS,
                    t if t == c::DW_TAG_union_type => kind::LF_UNION,
                    _ => kind::LF_STRUCTURE,
                };
                let mut body = Vec::new();
                body.extend_from_slice(&member_count.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes()); // property: nothing forward/nested here.
                body.extend_from_slice(&field_list_idx.0.to_le_bytes());
                if die.tag != c::DW_TAG_union_type {
                    body.extend_from_slice(&0u32.to_le_bytes()); // derived: none.
                    body.extend_from_slice(&0u32.to_le_bytes()); // vtshape: none.
                }
                write_numeric_leaf(size as i128, &mut body);
                name_copy(&mut body, &self.config.replace_dots(&name), name_style(self.config), self.config.dot_replacement);
                emit_record(types, kind_tag, &body);
            }
            c::DW_TAG_enumeration_type => {
                let mut field_list = Vec::new();
                let mut count = 0u32;
                let mut sub = cursor.subtree_cursor()?;
                while let Some(child) = sub.read_next()? {
                    if child.tag != c::DW_TAG_enumerator {
                        continue;
                    }
                    let name = child.attrs.name.clone().unwrap_or_default();
                    let value = child.attrs.const_value.unwrap_or(0);
                    field_list.extend_from_slice(&kind::LF_ENUMERATE.to_le_bytes());
                    field_list.extend_from_slice(&0u16.to_le_bytes());
                    write_numeric_leaf(value as i128, &mut field_list);
                    name_copy(&mut field_list, &self.config.replace_dots(&name), name_style(self.config), self.config.dot_replacement);
                    let pad = (4 - field_list.len() % 4) % 4;
                    for i in 0..pad {
                        field_list.push(0xF0 + (pad - i) as u8);
                    }
                    count += 1;
                }
                emit_record(types, kind::LF_FIELDLIST, &field_list);

                let field_list_idx = self.aux_idx.get(&die.offset).copied().unwrap_or(TypeIdx(0));
                let underlying = self.resolve(die.attrs.type_ref);
                let name = die.attrs.name.clone().unwrap_or_default();
                let mut body = Vec::new();
                body.extend_from_slice(&count.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes());
                body.extend_from_slice(&underlying.0.to_le_bytes());
                body.extend_from_slice(&field_list_idx.0.to_le_bytes());
                name_copy(&mut body, &self.config.replace_dots(&name), name_style(self.config), self.config.dot_replacement);
                emit_record(types, kind::LF_ENUM, &body);
            }
            c::DW_TAG_subroutine_type => {
                let ret = self.resolve(die.attrs.type_ref);
                let mut arglist = Vec::new();
                let mut param_count = 0u32;
                let mut sub = cursor.subtree_cursor()?;
                while let Some(child) = sub.read_next()? {
                    if child.tag != c::DW_TAG_formal_parameter {
                        continue;
                    }
                    let pty = self.resolve(child.attrs.type_ref);
                    arglist.extend_from_slice(&pty.0.to_le_bytes());
                    param_count += 1;
                }
                let mut arglist_body = Vec::with_capacity(4 + arglist.len());
                arglist_body.extend_from_slice(&param_count.to_le_bytes());
                arglist_body.extend_from_slice(&arglist);
                emit_record(types, kind::LF_ARGLIST, &arglist_body);

                let arglist_idx = self.aux_idx.get(&die.offset).copied().unwrap_or(TypeIdx(0));
                let mut body = Vec::with_capacity(14);
                body.extend_from_slice(&ret.0.to_le_bytes());
                body.push(0); // calltype: near C, best-effort default.
                body.push(0); // reserved.
                body.extend_from_slice(&(param_count as u16).to_le_bytes());
                body.extend_from_slice(&arglist_idx.0.to_le_bytes());
                emit_record(types, kind::LF_PROCEDURE, &body);
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_subprogram(
        &mut self,
        image: &Image,
        die: &DecodedDie,
        cursor: &super::reader::DieCursor<'_, '_, '_>,
        symbols: &mut Vec<u8>,
    ) -> Result<(), DwarfError> {
        let (Some(low), Some(high)) = (die.attrs.low_pc, die.attrs.high_pc) else {
            return Ok(());
        };
        let Some((section_index, offset)) = resolve_address(image, low) else {
            return Ok(());
        };
        let segment = (section_index + 1) as u16;
        let name = die.attrs.name.clone().unwrap_or_default();
        let ty = self.resolve(die.attrs.type_ref);

        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes()); // parent: not threaded.
        body.extend_from_slice(&0u32.to_le_bytes()); // end: not threaded.
        body.extend_from_slice(&0u32.to_le_bytes()); // next.
        body.extend_from_slice(&((high - low) as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // dbg_start.
        body.extend_from_slice(&0u32.to_le_bytes()); // dbg_end.
        body.extend_from_slice(&ty.0.to_le_bytes());
        body.extend_from_slice(&offset.to_le_bytes());
        body.extend_from_slice(&segment.to_le_bytes());
        body.push(0); // flags.
        name_copy(&mut body, &self.config.replace_dots(&name), name_style(self.config), self.config.dot_replacement);
        emit_record(symbols, symkind::S_GPROC32, &body);

        let frame_base = die.attrs.frame_base.as_deref().and_then(|expr| evaluate(expr, None).ok());

        let mut sub = cursor.subtree_cursor()?;
        while let Some(child) = sub.read_next()? {
            if child.tag != c::DW_TAG_formal_parameter && child.tag != c::DW_TAG_variable {
                continue;
            }
            let Some(loc_expr) = child.attrs.location.as_deref() else {
                continue;
            };
            let Ok(location) = evaluate(loc_expr, frame_base) else {
                continue;
            };
            let cty = self.resolve(child.attrs.type_ref);
            let cname = child.attrs.name.clone().unwrap_or_default();
            match location {
                Location::RegRel(_, frame_offset) => {
                    let mut out = Vec::new();
                    out.extend_from_slice(&(frame_offset as i32).to_le_bytes());
                    out.extend_from_slice(&cty.0.to_le_bytes());
                    name_copy(&mut out, &self.config.replace_dots(&cname), name_style(self.config), self.config.dot_replacement);
                    emit_record(symbols, symkind::S_BPREL32, &out);
                }
                Location::Abs(addr) => {
                    if let Some((idx, offset)) = resolve_address(image, addr as u64) {
                        let mut out = Vec::new();
                        out.extend_from_slice(&cty.0.to_le_bytes());
                        out.extend_from_slice(&offset.to_le_bytes());
                        out.extend_from_slice(&((idx + 1) as u16).to_le_bytes());
                        name_copy(&mut out, &self.config.replace_dots(&cname), name_style(self.config), self.config.dot_replacement);
                        emit_record(symbols, symkind::S_LDATA32, &out);
                    }
                }
                Location::Reg(_) => {}
            }
        }
        Ok(())
    }

    fn emit_lexical_block(&mut self, image: &Image, die: &DecodedDie, symbols: &mut Vec<u8>) {
        let (Some(low), Some(high)) = (die.attrs.low_pc, die.attrs.high_pc) else {
            return;
        };
        if high <= low {
            return;
        }
        let Some((section_index, offset)) = resolve_address(image, low) else {
            return;
        };
        let segment = (section_index + 1) as u16;
        let len = (high - low) as u32;

        let mut start = Vec::new();
        start.extend_from_slice(&0u32.to_le_bytes());
        start.extend_from_slice(&0u32.to_le_bytes());
        start.extend_from_slice(&len.to_le_bytes());
        start.extend_from_slice(&offset.to_le_bytes());
        start.extend_from_slice(&segment.to_le_bytes());
        start.push(0);
        emit_record(symbols, symkind::S_BLOCK32, &start);
        emit_record(symbols, symkind::S_END, &[]);
    }

    fn emit_variable(&mut self, image: &Image, die: &DecodedDie, udt: &mut UdtTable, symbols: &mut Vec<u8>) {
        let name = match &die.attrs.name {
            Some(n) => n.clone(),
            None => return,
        };
        let ty = self.resolve(die.attrs.type_ref);

        let resolved = if die.attrs.location.is_none() && die.attrs.external {
            die.attrs
                .linkage_name
                .as_deref()
                .or(Some(name.as_str()))
                .and_then(|n| image.find_symbol(n))
                .map(|sym| (sym.section_index, sym.offset))
        } else if let Some(expr) = &die.attrs.location {
            match evaluate(expr, None) {
                Ok(Location::Abs(addr)) => resolve_address(image, addr as u64),
                _ => None,
            }
        } else {
            None
        };

        let Some((section_index, offset)) = resolved else {
            return;
        };
        let segment = (section_index + 1) as u16;
        let kind_tag = if die.attrs.external { symkind::S_GDATA32 } else { symkind::S_LDATA32 };

        let mut out = Vec::new();
        out.extend_from_slice(&ty.0.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&segment.to_le_bytes());
        name_copy(&mut out, &self.config.replace_dots(&name), name_style(self.config), self.config.dot_replacement);
        emit_record(symbols, kind_tag, &out);

        if ty.0 != T_VOID {
            udt.insert(ty, self.config.replace_dots(&name));
        }
    }
}

fn emit_field_member(out: &mut Vec<u8>, ty: TypeIdx, offset: i128, name: &str, config: &TranslatorConfig) {
    out.extend_from_slice(&kind::LF_MEMBER.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&ty.0.to_le_bytes());
    write_numeric_leaf(offset, out);
    name_copy(out, &config.replace_dots(name), name_style(config), config.dot_replacement);
    let pad = (4 - out.len() % 4) % 4;
    for i in 0..pad {
        out.push(0xF0 + (pad - i) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_type_maps_signed_four_byte_to_int4() {
        let idx = basic_type(Some(gimli::constants::DW_ATE_signed), Some(4));
        assert_eq!(idx, TypeIdx(0x0074));
    }

    #[test]
    fn basic_type_maps_unknown_encoding_to_void() {
        let idx = basic_type(None, None);
        assert_eq!(idx, TypeIdx(0x0003));
    }

    #[test]
    fn basic_type_maps_float_by_width() {
        assert_eq!(basic_type(Some(gimli::constants::DW_ATE_float), Some(4)), TypeIdx(0x0040));
        assert_eq!(basic_type(Some(gimli::constants::DW_ATE_float), Some(8)), TypeIdx(0x0041));
    }
}

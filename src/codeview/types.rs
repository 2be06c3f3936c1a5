//! Non-field-list type record rewrites (spec.md §4.3 "Type rewrite").
//!
//! Every function here takes a v1 record body (as decoded by
//! [`super::RecordCursor`]) and the already-populated index remap, and
//! returns the bytes of the equivalent v2/v3 record body (kind tag not
//! included; callers pass it to [`super::emit_record`]).

use scroll::{Pread, LE};

use crate::config::TranslatorConfig;
use crate::error::ErrorKind;
use crate::index::{IndexRemap, InputTypeIdx, TypeIdx};
use crate::leaf::{name_copy, numeric_leaf, pascal_string_length, write_numeric_leaf, NameStyle};

use super::CodeViewError;

fn trunc() -> CodeViewError {
    CodeViewError::new(ErrorKind::HeaderTruncated)
}

fn name_style(config: &TranslatorConfig) -> NameStyle {
    if config.use_v3_names {
        NameStyle::ZeroTerminated
    } else {
        NameStyle::Pascal
    }
}

/// Resolves a v1 16-bit type reference through the remap table, passing
/// through basic-type ids (below [`crate::index::FIRST_USER_TYPE`])
/// unchanged.
fn resolve(input: u16, remap: &IndexRemap<InputTypeIdx>) -> TypeIdx {
    let idx = InputTypeIdx(input as u32);
    if let Some(resolved) = remap.get(idx) {
        // A basic-type id can be remapped too: a complex-float basic type
        // redirects to its lowered `{re, im}` aggregate this way.
        resolved
    } else if (input as u32) < crate::index::FIRST_USER_TYPE {
        TypeIdx(input as u32)
    } else {
        remap.require(idx)
    }
}

/// Bit layout of the aggregate/enum `property` field, per the historical
/// `CV_prop_t` bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CvProperty(pub u16);

impl CvProperty {
    const FWDREF: u16 = 0x0080;
    const ISNESTED: u16 = 0x0008;
    const CNESTED: u16 = 0x0010;

    pub fn incomplete(self) -> bool {
        self.0 & Self::FWDREF != 0
    }

    pub fn set_incomplete(&mut self, value: bool) {
        self.set_bit(Self::FWDREF, value);
    }

    pub fn is_nested(self) -> bool {
        self.0 & Self::ISNESTED != 0
    }

    pub fn set_is_nested(&mut self, value: bool) {
        self.set_bit(Self::ISNESTED, value);
    }

    pub fn has_nested(self) -> bool {
        self.0 & Self::CNESTED != 0
    }

    pub fn set_has_nested(&mut self, value: bool) {
        self.set_bit(Self::CNESTED, value);
    }

    fn set_bit(&mut self, mask: u16, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// Rewrites `LF_POINTER_16T` (`utype: u16, attr: u16`) to `LF_POINTER`
/// (`utype: u32, attr: u32`).
pub fn rewrite_pointer(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let utype: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let attr: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&resolve(utype, remap).0.to_le_bytes());
    out.extend_from_slice(&(attr as u32).to_le_bytes());
    Ok(out)
}

/// Rewrites `LF_MODIFIER_16T` (`index: u16, attr: u16`) to `LF_MODIFIER`
/// (`index: u32, attr: u16, pad: u16`).
pub fn rewrite_modifier(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let index: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let attr: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&resolve(index, remap).0.to_le_bytes());
    out.extend_from_slice(&attr.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    Ok(out)
}

/// Rewrites `LF_BITFIELD_16T` (`length: u8, position: u8, type: u16`) to
/// `LF_BITFIELD` (`type: u32, length: u8, position: u8`).
pub fn rewrite_bitfield(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let length = *body.first().ok_or_else(trunc)?;
    let position = *body.get(1).ok_or_else(trunc)?;
    let ty: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&resolve(ty, remap).0.to_le_bytes());
    out.push(length);
    out.push(position);
    Ok(out)
}

/// Rewrites `LF_ARGLIST_16T` (`count: u16, args: [u16; count]`) to
/// `LF_ARGLIST` (`count: u32, args: [u32; count]`).
pub fn rewrite_arglist(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let count: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let mut out = Vec::with_capacity(4 + 4 * count as usize);
    out.extend_from_slice(&(count as u32).to_le_bytes());
    for i in 0..count as usize {
        let arg: u16 = body.pread_with(2 + i * 2, LE).map_err(|_| trunc())?;
        out.extend_from_slice(&resolve(arg, remap).0.to_le_bytes());
    }
    Ok(out)
}

/// Copies `LF_VTSHAPE` unchanged: the nibble-packed descriptor shape did not
/// change between dialects.
pub fn rewrite_vtshape(body: &[u8]) -> Vec<u8> {
    body.to_vec()
}

/// Rewrites `LF_PROCEDURE_16T` to `LF_PROCEDURE`, widening the return-type
/// and argument-list indices to 32 bits.
pub fn rewrite_procedure(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let rvtype: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let calltype = *body.get(2).ok_or_else(trunc)?;
    let reserved = *body.get(3).ok_or_else(trunc)?;
    let parmcount: u16 = body.pread_with(4, LE).map_err(|_| trunc())?;
    let arglist: u16 = body.pread_with(6, LE).map_err(|_| trunc())?;
    let mut out = Vec::with_capacity(14);
    out.extend_from_slice(&resolve(rvtype, remap).0.to_le_bytes());
    out.push(calltype);
    out.push(reserved);
    out.extend_from_slice(&parmcount.to_le_bytes());
    out.extend_from_slice(&resolve(arglist, remap).0.to_le_bytes());
    Ok(out)
}

/// Rewrites `LF_MFUNCTION_16T` to `LF_MFUNCTION`, widening every type index.
pub fn rewrite_mfunction(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    let rvtype: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let classtype: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let thistype: u16 = body.pread_with(4, LE).map_err(|_| trunc())?;
    let calltype = *body.get(6).ok_or_else(trunc)?;
    let reserved = *body.get(7).ok_or_else(trunc)?;
    let parmcount: u16 = body.pread_with(8, LE).map_err(|_| trunc())?;
    let arglist: u16 = body.pread_with(10, LE).map_err(|_| trunc())?;
    let thisadjust: i32 = body.pread_with(12, LE).map_err(|_| trunc())?;

    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(&resolve(rvtype, remap).0.to_le_bytes());
    out.extend_from_slice(&resolve(classtype, remap).0.to_le_bytes());
    out.extend_from_slice(&resolve(thistype, remap).0.to_le_bytes());
    out.push(calltype);
    out.push(reserved);
    out.extend_from_slice(&parmcount.to_le_bytes());
    out.extend_from_slice(&resolve(arglist, remap).0.to_le_bytes());
    out.extend_from_slice(&thisadjust.to_le_bytes());
    Ok(out)
}

/// Rewrites `LF_METHODLIST_16T` (repeated `{attr: u16, type: u16, [vbaseoff:
/// u32 if the method is virtual]}`) to `LF_METHODLIST` with 32-bit types.
///
/// The virtual-base-offset word, when present, is copied through unchanged;
/// it is an offset, not a type reference.
pub fn rewrite_methodlist(body: &[u8], remap: &IndexRemap<InputTypeIdx>) -> Result<Vec<u8>, CodeViewError> {
    const INTRODUCING_VIRTUAL: u16 = 0x0004;
    const PURE_VIRTUAL: u16 = 0x0005;

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        let attr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
        let ty: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
        pos += 4;
        out.extend_from_slice(&attr.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&resolve(ty, remap).0.to_le_bytes());

        let mprop = (attr >> 2) & 0x7;
        if mprop == INTRODUCING_VIRTUAL || mprop == PURE_VIRTUAL {
            let vbaseoff: u32 = body.pread_with(pos, LE).map_err(|_| trunc())?;
            pos += 4;
            out.extend_from_slice(&vbaseoff.to_le_bytes());
        }
    }
    Ok(out)
}

/// Rewrites `LF_ARRAY_16T` (`elemtype: u16, idxtype: u16, length: leaf,
/// name: pascal`) to `LF_ARRAY` (32-bit indices, output name style).
pub fn rewrite_array(
    body: &[u8],
    remap: &IndexRemap<InputTypeIdx>,
    config: &TranslatorConfig,
) -> Result<Vec<u8>, CodeViewError> {
    let elemtype: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let idxtype: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let rest = body.get(4..).ok_or_else(trunc)?;
    let (leaf, leaf_len) = numeric_leaf(rest)?;
    let (name_len, name_off) = pascal_string_length(rest.get(leaf_len..).ok_or_else(trunc)?)?;
    let name_bytes = rest
        .get(leaf_len + name_off..leaf_len + name_off + name_len)
        .ok_or_else(trunc)?;
    let name = String::from_utf8_lossy(name_bytes);

    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&resolve(elemtype, remap).0.to_le_bytes());
    out.extend_from_slice(&resolve(idxtype, remap).0.to_le_bytes());
    write_numeric_leaf(leaf.as_i128().unwrap_or(0), &mut out);
    name_copy(&mut out, &name, name_style(config), config.dot_replacement);
    Ok(out)
}

/// Which aggregate shape [`rewrite_aggregate`] is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Class,
    Struct,
    Union,
}

/// Rewrites a v1 class/struct/union record to its v2/v3 equivalent.
///
/// Input layout (`LF_CLASS_16T`/`LF_STRUCTURE_16T`): `count: u16, property:
/// u16, field_list: u16, derived: u16, vtshape: u16, size: leaf, name:
/// pascal`. `LF_UNION_16T` omits `derived`/`vtshape`. Per spec.md §4.3 the
/// derived-list index is always nulled in the output (`derived` is dropped
/// here and re-emitted as zero by [`translator`] after property fix-up).
pub fn rewrite_aggregate(
    aggregate_kind: AggregateKind,
    body: &[u8],
    remap: &IndexRemap<InputTypeIdx>,
    field_list_remap: &IndexRemap<InputTypeIdx>,
    config: &TranslatorConfig,
) -> Result<(Vec<u8>, CvProperty, String), CodeViewError> {
    let count: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let property = CvProperty(body.pread_with(2, LE).map_err(|_| trunc())?);
    let field_list: u16 = body.pread_with(4, LE).map_err(|_| trunc())?;

    let (vtshape, rest_off) = match aggregate_kind {
        AggregateKind::Union => (0u16, 6),
        _ => {
            let vtshape: u16 = body.pread_with(8, LE).map_err(|_| trunc())?;
            (vtshape, 10)
        }
    };

    let rest = body.get(rest_off..).ok_or_else(trunc)?;
    let (leaf, leaf_len) = numeric_leaf(rest)?;
    let (name_len, name_off) = pascal_string_length(rest.get(leaf_len..).ok_or_else(trunc)?)?;
    let name_bytes = rest
        .get(leaf_len + name_off..leaf_len + name_off + name_len)
        .ok_or_else(trunc)?;
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let resolved_field_list = if field_list == 0 {
        TypeIdx(0)
    } else {
        resolve(field_list, field_list_remap)
    };

    let mut out = Vec::with_capacity(20 + body.len());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    out.extend_from_slice(&property.0.to_le_bytes());
    out.extend_from_slice(&resolved_field_list.0.to_le_bytes());
    if aggregate_kind != AggregateKind::Union {
        out.extend_from_slice(&0u32.to_le_bytes()); // derived: always nulled (LF_NULL).
        out.extend_from_slice(&resolve(vtshape, remap).0.to_le_bytes());
    }
    write_numeric_leaf(leaf.as_i128().unwrap_or(0), &mut out);
    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);

    Ok((out, property, name))
}

/// Rewrites a v1 enum record. Layout: `count: u16, property: u16,
/// underlying: u16, field_list: u16, name: pascal`.
pub fn rewrite_enum(
    body: &[u8],
    remap: &IndexRemap<InputTypeIdx>,
    field_list_remap: &IndexRemap<InputTypeIdx>,
    config: &TranslatorConfig,
) -> Result<(Vec<u8>, CvProperty, String), CodeViewError> {
    let count: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    let property = CvProperty(body.pread_with(2, LE).map_err(|_| trunc())?);
    let underlying: u16 = body.pread_with(4, LE).map_err(|_| trunc())?;
    let field_list: u16 = body.pread_with(6, LE).map_err(|_| trunc())?;
    let rest = body.get(8..).ok_or_else(trunc)?;
    let (name_len, name_off) = pascal_string_length(rest)?;
    let name_bytes = rest.get(name_off..name_off + name_len).ok_or_else(trunc)?;
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let resolved_field_list = if field_list == 0 {
        TypeIdx(0)
    } else {
        resolve(field_list, field_list_remap)
    };

    let mut out = Vec::with_capacity(14 + body.len());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    out.extend_from_slice(&property.0.to_le_bytes());
    out.extend_from_slice(&resolve(underlying, remap).0.to_le_bytes());
    out.extend_from_slice(&resolved_field_list.0.to_le_bytes());
    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);

    Ok((out, property, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remap_with(input: u16, output: u32) -> IndexRemap<InputTypeIdx> {
        let mut remap = IndexRemap::new();
        remap.insert(InputTypeIdx(input as u32), TypeIdx(output));
        remap
    }

    #[test]
    fn pointer_widens_both_fields() {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1002u16.to_le_bytes());
        body.extend_from_slice(&0x0020u16.to_le_bytes());
        let remap = remap_with(0x1002, 0x1003);
        let out = rewrite_pointer(&body, &remap).unwrap();
        assert_eq!(&out[0..4], &0x1003u32.to_le_bytes());
        assert_eq!(&out[4..8], &0x0020u32.to_le_bytes());
    }

    #[test]
    fn bitfield_reorders_fields() {
        let mut body = Vec::new();
        body.push(4); // length
        body.push(8); // position
        body.extend_from_slice(&0x74u16.to_le_bytes()); // basic type, passes through
        let remap = IndexRemap::new();
        let out = rewrite_bitfield(&body, &remap).unwrap();
        assert_eq!(&out[0..4], &0x74u32.to_le_bytes());
        assert_eq!(out[4], 4);
        assert_eq!(out[5], 8);
    }

    #[test]
    fn cv_property_bits_round_trip() {
        let mut prop = CvProperty::default();
        assert!(!prop.incomplete());
        prop.set_incomplete(true);
        assert!(prop.incomplete());
        prop.set_has_nested(true);
        assert!(prop.has_nested());
        assert!(prop.incomplete());
    }
}

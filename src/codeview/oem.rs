//! OEM-type lowering (spec.md §4.3 "OEM-type lowering"): rewrites the three
//! vendor-specific OEM record shapes, plus the three complex-float basic
//! types, into ordinary aggregates with synthesized field lists.
//!
//! Every lowering here produces a `(field_list_body, aggregate_name,
//! member_count)` triple; [`super::translator`] wraps the field list in an
//! `LF_FIELDLIST` record and the aggregate in an `LF_STRUCTURE` record using
//! the same machinery as every other emitted type.

use scroll::{Pread, LE};

use crate::config::TranslatorConfig;
use crate::error::ErrorKind;
use crate::index::TypeIdx;
use crate::leaf::{name_copy, write_numeric_leaf, NameStyle};

use super::kind::{LF_MEMBER, LF_NESTTYPE};
use super::CodeViewError;

fn trunc() -> CodeViewError {
    CodeViewError::new(ErrorKind::HeaderTruncated)
}

/// Identifies an OEM record's specific extension kind, carried as the
/// `id` field alongside the shared `oemid = 0x42` vendor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OemKind {
    DynamicArray,
    Delegate,
    AssociativeArray,
}

/// The vendor id shared by every OEM record this translator recognizes.
pub const OEMID: u16 = 0x42;

const OEM_ID_DYNAMIC_ARRAY: u16 = 1;
const OEM_ID_DELEGATE: u16 = 2;
const OEM_ID_ASSOCIATIVE_ARRAY: u16 = 3;

impl OemKind {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            OEM_ID_DYNAMIC_ARRAY => Some(OemKind::DynamicArray),
            OEM_ID_DELEGATE => Some(OemKind::Delegate),
            OEM_ID_ASSOCIATIVE_ARRAY => Some(OemKind::AssociativeArray),
            _ => None,
        }
    }
}

fn name_style(config: &TranslatorConfig) -> NameStyle {
    if config.use_v3_names {
        NameStyle::ZeroTerminated
    } else {
        NameStyle::Pascal
    }
}

fn pointer_size() -> i128 {
    4
}

fn emit_member(out: &mut Vec<u8>, type_idx: TypeIdx, offset: i128, name: &str, config: &TranslatorConfig) {
    out.extend_from_slice(&LF_MEMBER.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // attr: public data member
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&type_idx.0.to_le_bytes());
    write_numeric_leaf(offset, out);
    name_copy(out, name, name_style(config), config.dot_replacement);
    let pad = (4 - out.len() % 4) % 4;
    for i in 0..pad {
        out.push(0xF0 + (pad - i) as u8);
    }
}

/// `LF_OEM` body for a recognized extension: `oemid: u16, id: u16, count:
/// u16, args: [u32; count]` (our simplified, self-consistent layout —
/// dynamic array and delegate both carry exactly the type arguments listed
/// in spec.md §4.3's table).
pub struct OemRecord {
    pub id: u16,
    pub args: Vec<u32>,
}

pub fn parse_oem(body: &[u8]) -> Result<OemRecord, CodeViewError> {
    let oemid: u16 = body.pread_with(0, LE).map_err(|_| trunc())?;
    if oemid != OEMID {
        return Err(CodeViewError::new(ErrorKind::UnsupportedField));
    }
    let id: u16 = body.pread_with(2, LE).map_err(|_| trunc())?;
    let count: u16 = body.pread_with(4, LE).map_err(|_| trunc())?;
    let mut args = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        args.push(body.pread_with(6 + i * 4, LE).map_err(|_| trunc())?);
    }
    Ok(OemRecord { id, args })
}

/// Lowers a dynamic array of `elem_type` to a struct `{length: u32, ptr:
/// *elem}` named by pretty-printing the element type (spec.md §8 scenario 1).
///
/// `elem_name` is the already-resolved pretty name of the element type
/// (`string`/`wstring`/`dstring` for the three builtin string kinds, or the
/// element type's own name otherwise); the caller looks this up since it
/// requires walking the translated type stream, not just this record.
pub fn lower_dynamic_array(
    elem_type: TypeIdx,
    elem_name: &str,
    config: &TranslatorConfig,
) -> (Vec<u8>, String, usize) {
    let mut field_list = Vec::new();
    emit_member(&mut field_list, TypeIdx(0x0075 /* T_ULONG basic type */), 0, "length", config);
    emit_member(&mut field_list, elem_type, pointer_size(), "ptr", config);
    (field_list, format!("{elem_name}[]"), 2)
}

/// Lowers a delegate to a struct `{thisptr: *Ctx, funcptr: *Fn}` (spec.md §8
/// scenario 2).
pub fn lower_delegate(
    this_type: TypeIdx,
    func_type: TypeIdx,
    func_name: &str,
    config: &TranslatorConfig,
) -> (Vec<u8>, String, usize) {
    let mut field_list = Vec::new();
    emit_member(&mut field_list, this_type, 0, "thisptr", config);
    emit_member(&mut field_list, func_type, pointer_size(), "funcptr", config);
    (field_list, format!("delegate {func_name}"), 2)
}

/// Lowers an associative array `K -> V` per the configured layout
/// (spec.md §4.3 "OEM-type lowering" table; layout choice resolved once by
/// [`TranslatorConfig::assoc_array_layout`]).
///
/// The modern layout is a struct with one opaque pointer plus two nested
/// typedefs; the legacy layout reconstructs the historical `aaA`/`BB` tree
/// node shapes. Both are represented here as field lists plus nested-type
/// entries so the rest of the pipeline treats them like any other
/// translated aggregate.
pub fn lower_associative_array(
    key_type: TypeIdx,
    value_type: TypeIdx,
    config: &mut TranslatorConfig,
) -> (Vec<u8>, String, usize) {
    use crate::config::AssocArrayLayout;

    let mut field_list = Vec::new();
    match config.assoc_array_layout() {
        AssocArrayLayout::Modern => {
            emit_member(&mut field_list, TypeIdx(0x0003 /* T_VOID pointer placeholder */), 0, "ptr", config);
            field_list.extend_from_slice(&LF_NESTTYPE.to_le_bytes());
            field_list.extend_from_slice(&0u16.to_le_bytes());
            field_list.extend_from_slice(&key_type.0.to_le_bytes());
            name_copy(&mut field_list, "__key_t", name_style(config), config.dot_replacement);
            pad4(&mut field_list);
            field_list.extend_from_slice(&LF_NESTTYPE.to_le_bytes());
            field_list.extend_from_slice(&0u16.to_le_bytes());
            field_list.extend_from_slice(&value_type.0.to_le_bytes());
            name_copy(&mut field_list, "__val_t", name_style(config), config.dot_replacement);
            pad4(&mut field_list);
            (field_list, "aaA".to_owned(), 3)
        }
        AssocArrayLayout::Legacy => {
            // Historical tree-node layout: a root pointer plus the node
            // shape's key/value members, reconstructed verbatim from the
            // compiler's runtime `aaA`/`BB` node structs.
            emit_member(&mut field_list, key_type, 0, "key", config);
            emit_member(&mut field_list, value_type, pointer_size(), "value", config);
            emit_member(&mut field_list, TypeIdx(0x0003), 2 * pointer_size(), "next", config);
            (field_list, "aaA".to_owned(), 3)
        }
    }
}

fn pad4(buf: &mut Vec<u8>) {
    let pad = (4 - buf.len() % 4) % 4;
    for i in 0..pad {
        buf.push(0xF0 + (pad - i) as u8);
    }
}

/// Basic-type id of the 32-bit-component complex float (`T_CPLX32`).
pub const T_CPLX32: u32 = 0x0050;
/// Basic-type id of the 64-bit-component complex float (`T_CPLX64`).
pub const T_CPLX64: u32 = 0x0051;
/// Basic-type id of the 80-bit-component complex float (`T_CPLX80`).
pub const T_CPLX80: u32 = 0x0052;

const T_REAL32: u32 = 0x0040;
const T_REAL64: u32 = 0x0041;
const T_REAL80: u32 = 0x0042;

/// Maps a basic complex-type id to the basic real type backing its `re`/`im`
/// components, that component's width in bytes, and the lowered struct's
/// pretty name.
pub fn complex_component(complex_id: u32) -> Option<(TypeIdx, u8, &'static str)> {
    match complex_id {
        T_CPLX32 => Some((TypeIdx(T_REAL32), 4, "cfloat")),
        T_CPLX64 => Some((TypeIdx(T_REAL64), 8, "cdouble")),
        T_CPLX80 => Some((TypeIdx(T_REAL80), 10, "creal")),
        _ => None,
    }
}

/// Lowers a complex float (`cfloat`/`cdouble`/`creal`) to a 2-element struct
/// `{re, im}` of the given component basic type and width.
pub fn lower_complex(
    component_type: TypeIdx,
    component_size: u8,
    name: &str,
    config: &TranslatorConfig,
) -> (Vec<u8>, String, usize) {
    let mut field_list = Vec::new();
    emit_member(&mut field_list, component_type, 0, "re", config);
    emit_member(&mut field_list, component_type, component_size as i128, "im", config);
    (field_list, format!("__{name}"), 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_array_names_by_element_and_has_two_members() {
        let (_, name, count) = lower_dynamic_array(TypeIdx(0x0074), "int", &TranslatorConfig::default());
        assert_eq!(name, "int[]");
        assert_eq!(count, 2);
    }

    #[test]
    fn delegate_names_with_function_name() {
        let (_, name, count) = lower_delegate(TypeIdx(0x0403), TypeIdx(0x1020), "onClick", &TranslatorConfig::default());
        assert_eq!(name, "delegate onClick");
        assert_eq!(count, 2);
    }

    #[test]
    fn complex_component_varies_width_by_kind() {
        assert_eq!(complex_component(T_CPLX32), Some((TypeIdx(0x0040), 4, "cfloat")));
        assert_eq!(complex_component(T_CPLX64), Some((TypeIdx(0x0041), 8, "cdouble")));
        assert_eq!(complex_component(T_CPLX80), Some((TypeIdx(0x0042), 10, "creal")));
        assert_eq!(complex_component(0x0099), None);
    }

    #[test]
    fn complex_double_places_im_member_eight_bytes_in() {
        let (_, name, count) = lower_complex(TypeIdx(0x0041), 8, "cdouble", &TranslatorConfig::default());
        assert_eq!(name, "__cdouble");
        assert_eq!(count, 2);
    }

    #[test]
    fn oem_record_parses_id_and_args() {
        let mut body = Vec::new();
        body.extend_from_slice(&OEMID.to_le_bytes());
        body.extend_from_slice(&OEM_ID_DYNAMIC_ARRAY.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0x74u32.to_le_bytes());
        let record = parse_oem(&body).unwrap();
        assert_eq!(OemKind::from_id(record.id), Some(OemKind::DynamicArray));
        assert_eq!(record.args, vec![0x74]);
    }
}

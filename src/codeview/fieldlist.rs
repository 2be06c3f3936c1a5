//! The single reentrant field-list walk (spec.md §4.3 "Field-list
//! processing"): one routine, six jobs, selected by [`FieldListJob`].
//!
//! The routine always walks entries in physical order, computing each
//! entry's length from its kind and (for members) from its embedded
//! numeric leaf's width, and skips `0xF1..=0xF4` padding between entries.
//! Only the *copy* job produces bytes; the other five jobs exist so the
//! translator can answer structural questions (how many bases, is there
//! already a `__ClassType` member, where is the first virtual method)
//! without allocating output it would discard.

use std::collections::HashMap;

use scroll::{Pread, LE};
use tracing::warn;

use crate::config::TranslatorConfig;
use crate::error::ErrorKind;
use crate::index::{IndexRemap, InputTypeIdx, TypeIdx};
use crate::leaf::{name_copy, numeric_leaf, pascal_string_length, write_numeric_leaf, NameStyle};

use super::kind::*;
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

/// Method-property subfield of a method's `attr` word (bits 2..4) that
/// indicates an introducing (non-pure or pure) virtual method, the only
/// cases that carry a trailing virtual-base-table offset.
const MPROP_INTRODUCING_VIRTUAL: u16 = 4;
const MPROP_PURE_INTRODUCING_VIRTUAL: u16 = 6;
const MPROP_PURE_VIRTUAL: u16 = 5;

fn mprop(attr: u16) -> u16 {
    (attr >> 2) & 0x7
}

fn is_introducing_virtual(attr: u16) -> bool {
    matches!(
        mprop(attr),
        MPROP_INTRODUCING_VIRTUAL | MPROP_PURE_INTRODUCING_VIRTUAL | MPROP_PURE_VIRTUAL
    )
}

/// Which of the six jobs [`walk`] should perform.
#[derive(Debug, Clone, Copy)]
pub enum FieldListJob {
    /// Rewrite every recognized entry into the output dialect.
    CopyWithRewrite,
    /// Count every recognized entry (padding excluded).
    CountEntries,
    /// Count `LF_BCLASS`/`LF_VBCLASS`/`LF_IVBCLASS` entries.
    CountBaseClasses,
    /// Count `LF_NESTTYPE` entries, optionally only those naming a specific
    /// (already-remapped) output type index.
    CountNestedTypes(Option<TypeIdx>),
    /// True if a nested-type entry named `__ClassType` is already present.
    HasClassTypeEnumMember,
    /// Byte offset, within the *input* body, of the first entry whose
    /// method attribute marks it as an introducing virtual method.
    FirstVirtualMethodOffset,
}

/// Outcome of a [`walk`] call, shaped by which [`FieldListJob`] ran.
#[derive(Debug)]
pub enum FieldListResult {
    Bytes(Vec<u8>),
    Count(usize),
    Bool(bool),
    Offset(Option<usize>),
}

/// Skips `0xF1..=0xF4` padding starting at `body[pos]`, returning the
/// advanced position.
fn skip_padding(body: &[u8], mut pos: usize) -> usize {
    while let Some(&b) = body.get(pos) {
        if (0xF1..=0xF4).contains(&b) {
            pos += (b - 0xF0) as usize;
        } else {
            break;
        }
    }
    pos
}

fn read_pascal(body: &[u8], at: usize) -> Result<(String, usize), CodeViewError> {
    let (len, off) = pascal_string_length(body.get(at..).ok_or_else(trunc)?)?;
    let bytes = body.get(at + off..at + off + len).ok_or_else(trunc)?;
    Ok((String::from_utf8_lossy(bytes).into_owned(), at + off + len))
}

/// The single entry of a one-overload `LF_METHODLIST_16T` record, read
/// directly from its raw input bytes for the `LF_ONEMETHOD` rewrite.
struct SingleMethod {
    attr: u16,
    index: TypeIdx,
    vbaseoff: Option<u32>,
}

/// Resolves `mlist` (a v1 method-list type index) to its single entry by
/// re-reading the raw input record `methodlists` captured before the field
/// list containing it was walked. Returns `None` if the methodlist record
/// wasn't seen, is empty, or is malformed, in which case the caller falls
/// back to emitting a full `LF_METHOD` instead.
fn single_method(
    mlist: u16,
    methodlists: &HashMap<InputTypeIdx, Vec<u8>>,
    type_remap: &IndexRemap<InputTypeIdx>,
) -> Option<SingleMethod> {
    let body = methodlists.get(&InputTypeIdx(mlist as u32))?;
    let attr: u16 = body.pread_with(0, LE).ok()?;
    let index: u16 = body.pread_with(2, LE).ok()?;
    let vbaseoff = if is_introducing_virtual(attr) {
        Some(body.pread_with(4, LE).ok()?)
    } else {
        None
    };
    Some(SingleMethod {
        attr,
        index: resolve(index, type_remap),
        vbaseoff,
    })
}

/// Walks one v1 field list, performing `job` (spec.md §4.3).
///
/// `field_list_remap` maps input type indices that appear *as nested
/// field-list references* (there are none at this level, kept for symmetry
/// with [`super::types`]); `type_remap` maps every other type reference
/// (member types, base-class types, method types). `methodlists` is the
/// table of raw `LF_METHODLIST_16T` bodies captured by the type-stream pass,
/// keyed by input type index, used to rewrite single-overload `LF_METHOD`
/// entries into `LF_ONEMETHOD` without re-parsing the output stream.
pub fn walk(
    body: &[u8],
    job: FieldListJob,
    type_remap: &IndexRemap<InputTypeIdx>,
    methodlists: &HashMap<InputTypeIdx, Vec<u8>>,
    config: &TranslatorConfig,
) -> Result<FieldListResult, CodeViewError> {
    let mut pos = 0usize;
    let mut out = Vec::new();
    let mut entry_count = 0usize;
    let mut base_count = 0usize;
    let mut nested_count = 0usize;
    let mut has_class_type_enum = false;
    let mut first_virtual: Option<usize> = None;

    while pos < body.len() {
        pos = skip_padding(body, pos);
        if pos >= body.len() {
            break;
        }
        let entry_start = pos;
        let entry_kind: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
        pos += 2;

        match entry_kind {
            LF_BCLASS_16T | LF_VBCLASS_16T | LF_IVBCLASS_16T => {
                let attr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                let index: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
                pos += 4;
                base_count += 1;
                entry_count += 1;

                if entry_kind == LF_BCLASS_16T {
                    let (leaf, leaf_len) = numeric_leaf(body.get(pos..).ok_or_else(trunc)?)?;
                    pos += leaf_len;
                    if matches!(job, FieldListJob::CopyWithRewrite) {
                        out.extend_from_slice(&LF_BCLASS.to_le_bytes());
                        out.extend_from_slice(&attr.to_le_bytes());
                        out.extend_from_slice(&0u16.to_le_bytes());
                        out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                        write_numeric_leaf(leaf.as_i128().unwrap_or(0), &mut out);
                    }
                } else {
                    let vbptr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                    pos += 2;
                    let (vbpoff, l1) = numeric_leaf(body.get(pos..).ok_or_else(trunc)?)?;
                    pos += l1;
                    let (vboff, l2) = numeric_leaf(body.get(pos..).ok_or_else(trunc)?)?;
                    pos += l2;
                    if matches!(job, FieldListJob::CopyWithRewrite) {
                        let out_kind = if entry_kind == LF_VBCLASS_16T { LF_VBCLASS } else { LF_IVBCLASS };
                        out.extend_from_slice(&out_kind.to_le_bytes());
                        out.extend_from_slice(&attr.to_le_bytes());
                        out.extend_from_slice(&0u16.to_le_bytes());
                        out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                        out.extend_from_slice(&resolve(vbptr, type_remap).0.to_le_bytes());
                        write_numeric_leaf(vbpoff.as_i128().unwrap_or(0), &mut out);
                        write_numeric_leaf(vboff.as_i128().unwrap_or(0), &mut out);
                    }
                }
            }
            LF_MEMBER_16T => {
                let attr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                let index: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
                pos += 4;
                let (offset, leaf_len) = numeric_leaf(body.get(pos..).ok_or_else(trunc)?)?;
                pos += leaf_len;
                let (name, after_name) = read_pascal(body, pos)?;
                pos = after_name;
                entry_count += 1;

                if matches!(job, FieldListJob::CopyWithRewrite) {
                    out.extend_from_slice(&LF_MEMBER.to_le_bytes());
                    out.extend_from_slice(&attr.to_le_bytes());
                    out.extend_from_slice(&0u16.to_le_bytes());
                    out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                    write_numeric_leaf(offset.as_i128().unwrap_or(0), &mut out);
                    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                }
            }
            LF_STMEMBER_16T => {
                let attr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                let index: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
                pos += 4;
                let (name, after_name) = read_pascal(body, pos)?;
                pos = after_name;
                entry_count += 1;

                if matches!(job, FieldListJob::CopyWithRewrite) {
                    out.extend_from_slice(&LF_STMEMBER.to_le_bytes());
                    out.extend_from_slice(&attr.to_le_bytes());
                    out.extend_from_slice(&0u16.to_le_bytes());
                    out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                }
            }
            LF_METHOD_16T => {
                let count: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                let mlist: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
                pos += 4;
                let (name, after_name) = read_pascal(body, pos)?;
                pos = after_name;
                entry_count += 1;

                if matches!(job, FieldListJob::CopyWithRewrite) {
                    if count == 1 && config.compact_one_method {
                        if let Some(one) = single_method(mlist, methodlists, type_remap) {
                            out.extend_from_slice(&LF_ONEMETHOD.to_le_bytes());
                            out.extend_from_slice(&one.attr.to_le_bytes());
                            out.extend_from_slice(&0u16.to_le_bytes());
                            out.extend_from_slice(&one.index.0.to_le_bytes());
                            if let Some(v) = one.vbaseoff {
                                out.extend_from_slice(&v.to_le_bytes());
                            }
                            name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                        } else {
                            // Methodlist record wasn't captured (or is malformed);
                            // fall back to the full LF_METHOD rather than dropping
                            // the overload entirely.
                            out.extend_from_slice(&LF_METHOD.to_le_bytes());
                            out.extend_from_slice(&count.to_le_bytes());
                            out.extend_from_slice(&0u16.to_le_bytes());
                            out.extend_from_slice(&resolve(mlist, type_remap).0.to_le_bytes());
                            name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                        }
                    } else if count > 0 {
                        out.extend_from_slice(&LF_METHOD.to_le_bytes());
                        out.extend_from_slice(&count.to_le_bytes());
                        out.extend_from_slice(&0u16.to_le_bytes());
                        out.extend_from_slice(&resolve(mlist, type_remap).0.to_le_bytes());
                        name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                    }
                    // count == 0: unresolvable method list, dropped entirely.
                }
            }
            LF_ONEMETHOD_16T => {
                let attr: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                let index: u16 = body.pread_with(pos + 2, LE).map_err(|_| trunc())?;
                pos += 4;
                let vbaseoff = if is_introducing_virtual(attr) {
                    let v: u32 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                    pos += 4;
                    Some(v)
                } else {
                    None
                };
                if first_virtual.is_none() && is_introducing_virtual(attr) {
                    first_virtual = Some(entry_start);
                }
                let (name, after_name) = read_pascal(body, pos)?;
                pos = after_name;
                entry_count += 1;

                if matches!(job, FieldListJob::CopyWithRewrite) {
                    out.extend_from_slice(&LF_ONEMETHOD.to_le_bytes());
                    out.extend_from_slice(&attr.to_le_bytes());
                    out.extend_from_slice(&0u16.to_le_bytes());
                    out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                    if let Some(v) = vbaseoff {
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                }
            }
            LF_NESTTYPE_16T => {
                let index: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                pos += 2;
                let (name, after_name) = read_pascal(body, pos)?;
                pos = after_name;
                entry_count += 1;
                nested_count += 1;
                let resolved = resolve(index, type_remap);

                if name == "__ClassType" {
                    has_class_type_enum = true;
                }

                if matches!(job, FieldListJob::CopyWithRewrite) {
                    out.extend_from_slice(&LF_NESTTYPE.to_le_bytes());
                    out.extend_from_slice(&0u16.to_le_bytes());
                    out.extend_from_slice(&resolved.0.to_le_bytes());
                    name_copy(&mut out, &config.replace_dots(&name), name_style(config), config.dot_replacement);
                }
                if let FieldListJob::CountNestedTypes(Some(target)) = job {
                    if resolved != target {
                        nested_count -= 1;
                    }
                }
            }
            LF_VFUNCTAB_16T => {
                let index: u16 = body.pread_with(pos, LE).map_err(|_| trunc())?;
                pos += 2;
                entry_count += 1;
                if matches!(job, FieldListJob::CopyWithRewrite) {
                    out.extend_from_slice(&LF_VFUNCTAB.to_le_bytes());
                    out.extend_from_slice(&0u16.to_le_bytes());
                    out.extend_from_slice(&resolve(index, type_remap).0.to_le_bytes());
                }
            }
            LF_FRIENDFCN_16T => {
                // Dropped: no v3 analogue, and no debugger consumes it.
                pos += 2;
                let (_, after_name) = read_pascal(body, pos)?;
                pos = after_name;
            }
            LF_FRIENDCLS_16T => {
                // Dropped, same rationale as LF_FRIENDFCN_16T.
                pos += 2;
            }
            _ => {
                // This entry's shape isn't known, so its length can't be
                // determined either; there is no way to locate where the next
                // entry starts. Stop collecting for this field list rather
                // than failing the whole translation — entries already seen
                // are kept, and the caller's record-level scan moves on to
                // the next type record regardless.
                warn!(kind = format!("{entry_kind:#06x}"), "unrecognized field-list entry, stopping this field list");
                break;
            }
        }

        if matches!(job, FieldListJob::CopyWithRewrite) {
            let pad = (4 - out.len() % 4) % 4;
            for i in 0..pad {
                out.push(0xF0 + (pad - i) as u8);
            }
        }
    }

    Ok(match job {
        FieldListJob::CopyWithRewrite => FieldListResult::Bytes(out),
        FieldListJob::CountEntries => FieldListResult::Count(entry_count),
        FieldListJob::CountBaseClasses => FieldListResult::Count(base_count),
        FieldListJob::CountNestedTypes(_) => FieldListResult::Count(nested_count),
        FieldListJob::HasClassTypeEnumMember => FieldListResult::Bool(has_class_type_enum),
        FieldListJob::FirstVirtualMethodOffset => FieldListResult::Offset(first_virtual),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_entry(attr: u16, index: u16, offset: i128, name: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&LF_MEMBER_16T.to_le_bytes());
        body.extend_from_slice(&attr.to_le_bytes());
        body.extend_from_slice(&index.to_le_bytes());
        write_numeric_leaf(offset, &mut body);
        body.push(name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body
    }

    #[test]
    fn counts_one_member_entry() {
        let body = member_entry(0, 0x74, 0, "x");
        let remap = IndexRemap::new();
        let config = TranslatorConfig::default();
        let result = walk(&body, FieldListJob::CountEntries, &remap, &HashMap::new(), &config).unwrap();
        assert!(matches!(result, FieldListResult::Count(1)));
    }

    #[test]
    fn copy_with_rewrite_widens_member_index() {
        let body = member_entry(0, 0x74, 4, "x");
        let remap = IndexRemap::new();
        let config = TranslatorConfig::default();
        let result = walk(&body, FieldListJob::CopyWithRewrite, &remap, &HashMap::new(), &config).unwrap();
        let FieldListResult::Bytes(bytes) = result else { panic!() };
        assert_eq!(&bytes[0..2], &LF_MEMBER.to_le_bytes());
        assert_eq!(&bytes[6..10], &0x74u32.to_le_bytes());
    }

    #[test]
    fn skips_padding_between_entries() {
        let mut body = member_entry(0, 0x74, 0, "x");
        body.push(0xF1);
        body.extend_from_slice(&member_entry(0, 0x75, 0, "y"));
        let remap = IndexRemap::new();
        let config = TranslatorConfig::default();
        let result = walk(&body, FieldListJob::CountEntries, &remap, &HashMap::new(), &config).unwrap();
        assert!(matches!(result, FieldListResult::Count(2)));
    }

    #[test]
    fn unrecognized_kind_stops_collection_without_erroring() {
        let mut body = member_entry(0, 0x74, 0, "x");
        body.extend_from_slice(&0xFFFFu16.to_le_bytes());
        let remap = IndexRemap::new();
        let config = TranslatorConfig::default();
        let result = walk(&body, FieldListJob::CountEntries, &remap, &HashMap::new(), &config).unwrap();
        assert!(matches!(result, FieldListResult::Count(1)));
    }

    #[test]
    fn single_overload_method_rewrites_to_onemethod() {
        let mut mlist_body = Vec::new();
        mlist_body.extend_from_slice(&0u16.to_le_bytes()); // attr: non-virtual
        mlist_body.extend_from_slice(&0x1002u16.to_le_bytes()); // already-remapped type
        let mut methodlists = HashMap::new();
        methodlists.insert(InputTypeIdx(0x1001), mlist_body);

        let mut body = Vec::new();
        body.extend_from_slice(&LF_METHOD_16T.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes()); // count
        body.extend_from_slice(&0x1001u16.to_le_bytes()); // mlist
        body.push(3);
        body.extend_from_slice(b"foo");

        let mut remap = IndexRemap::new();
        remap.insert(InputTypeIdx(0x1002), TypeIdx(0x1003));
        let config = TranslatorConfig::default();

        let result = walk(&body, FieldListJob::CopyWithRewrite, &remap, &methodlists, &config).unwrap();
        let FieldListResult::Bytes(bytes) = result else { panic!() };
        assert_eq!(&bytes[0..2], &LF_ONEMETHOD.to_le_bytes());
        assert_eq!(&bytes[6..10], &0x1003u32.to_le_bytes());
    }

    #[test]
    fn single_overload_falls_back_to_method_when_methodlist_unseen() {
        let mut body = Vec::new();
        body.extend_from_slice(&LF_METHOD_16T.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes()); // count
        body.extend_from_slice(&0x1001u16.to_le_bytes()); // mlist, never captured
        body.push(3);
        body.extend_from_slice(b"foo");

        let mut remap = IndexRemap::new();
        remap.insert(InputTypeIdx(0x1001), TypeIdx(0x1005));
        let config = TranslatorConfig::default();

        let result = walk(&body, FieldListJob::CopyWithRewrite, &remap, &HashMap::new(), &config).unwrap();
        let FieldListResult::Bytes(bytes) = result else { panic!() };
        assert_eq!(&bytes[0..2], &LF_METHOD.to_le_bytes());
        assert_eq!(&bytes[6..10], &0x1005u32.to_le_bytes());
    }
}

//! Orchestrates the CodeView Translator (spec.md §4.3): walks the input type
//! stream once (CodeView's own "index N before any reference to N"
//! invariant means a single forward pass suffices, unlike the two-pass
//! DWARF design), lowers OEM types, runs forward-declaration completion and
//! the `HasNested`/`IsNested` property fix-up, then rewrites the symbol
//! stream.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::TranslatorConfig;
use crate::index::{IndexRemap, InputTypeIdx, TypeIdx, TypeIndexAllocator, FIRST_USER_TYPE};
use crate::udt::UdtTable;

use super::fieldlist::{self, FieldListJob, FieldListResult};
use super::kind;
use super::oem;
use super::symbols::{self, ProcedureContext};
use super::types::{self, AggregateKind, CvProperty};
use super::{emit_record, CodeViewError, RecordCursor};

/// Everything the CodeView Translator produces for one translation unit,
/// ready to hand to the [`crate::sink`] (spec.md §4.3's five outputs, minus
/// the module-per-entry split which the sink adapter itself performs).
pub struct CodeViewOutput {
    pub types: Vec<u8>,
    pub symbols: Vec<u8>,
    pub udt: Vec<u8>,
}

struct AggregateRecord {
    type_idx: TypeIdx,
    name: String,
    field_list: TypeIdx,
    property_offset: usize,
}

/// Orchestrator state for one CodeView translation run. Owns the index
/// remap and output buffers exclusively, per spec.md §5 "Shared-resource
/// policy".
pub struct CodeViewTranslator {
    config: TranslatorConfig,
    allocator: TypeIndexAllocator,
    remap: IndexRemap<InputTypeIdx>,
    names: HashMap<TypeIdx, String>,
    complete_by_name: HashMap<String, TypeIdx>,
    aggregates: Vec<AggregateRecord>,
    incomplete: Vec<AggregateRecord>,
    udt: UdtTable,
    /// Raw `LF_METHODLIST_16T` bodies, keyed by input type index, captured
    /// as the type stream is scanned so a later single-overload `LF_METHOD`
    /// entry can be rewritten into `LF_ONEMETHOD` (spec.md §4.3).
    methodlists: HashMap<InputTypeIdx, Vec<u8>>,
}

impl CodeViewTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        CodeViewTranslator {
            config,
            allocator: TypeIndexAllocator::new(),
            remap: IndexRemap::new(),
            names: HashMap::new(),
            complete_by_name: HashMap::new(),
            aggregates: Vec::new(),
            incomplete: Vec::new(),
            udt: UdtTable::new(),
            methodlists: HashMap::new(),
        }
    }

    /// Resolves a raw v1 type/basic-type id, consulting the remap first so a
    /// basic complex-float id already lowered to a synthesized aggregate
    /// (spec.md §4.3 "OEM-type lowering") redirects to it instead of being
    /// passed through as a bare basic-type id.
    fn resolve_arg(&self, raw: u32) -> TypeIdx {
        if let Some(resolved) = self.remap.get(InputTypeIdx(raw)) {
            resolved
        } else if raw < FIRST_USER_TYPE {
            TypeIdx(raw)
        } else {
            self.remap.require(InputTypeIdx(raw))
        }
    }

    fn pretty_name(&self, ty: TypeIdx) -> String {
        match ty.0 {
            0x0070 => "string".to_owned(),
            0x0071 => "wstring".to_owned(),
            0x0072 => "dstring".to_owned(),
            basic if ty.is_basic() => format!("basic_{basic:#x}"),
            _ => self.names.get(&ty).cloned().unwrap_or_else(|| "anon".to_owned()),
        }
    }

    /// Translates the full v1 type stream into its v2/v3 equivalent,
    /// lowering OEM records and tracking aggregates for the fix-up passes
    /// that run once the whole stream has been rewritten.
    pub fn translate_types(&mut self, type_stream: &[u8]) -> Result<Vec<u8>, CodeViewError> {
        let mut out = Vec::new();
        let mut next_input_idx = FIRST_USER_TYPE;

        if !self.config.foreign_language {
            self.lower_complex_types(scan_complex_usage(type_stream), &mut out);
        }

        for record in RecordCursor::new(type_stream) {
            let record = record?;
            let input_idx = InputTypeIdx(next_input_idx);
            next_input_idx += 1;

            if record.kind == kind::LF_METHODLIST_16T {
                self.methodlists.insert(input_idx, record.body.to_vec());
            }

            // OEM records lower to two output records (field list, then
            // aggregate) and must allocate their indices in that same
            // order, so they bypass the single-index-per-record allocation
            // every other kind uses below (spec.md §5 "index N before any
            // reference to N").
            if record.kind == kind::LF_OEM_16T {
                self.lower_oem_record(record.body, input_idx, &mut out)?;
                continue;
            }

            let output_idx = self.allocator.alloc();
            self.remap.insert(input_idx, output_idx);

            match record.kind {
                kind::LF_POINTER_16T => {
                    let body = types::rewrite_pointer(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_POINTER, &body);
                }
                kind::LF_MODIFIER_16T => {
                    let body = types::rewrite_modifier(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_MODIFIER, &body);
                }
                kind::LF_BITFIELD_16T => {
                    let body = types::rewrite_bitfield(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_BITFIELD, &body);
                }
                kind::LF_ARGLIST_16T => {
                    let body = types::rewrite_arglist(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_ARGLIST, &body);
                }
                kind::LF_VTSHAPE => {
                    let body = types::rewrite_vtshape(record.body);
                    emit_record(&mut out, kind::LF_VTSHAPE, &body);
                }
                kind::LF_PROCEDURE_16T => {
                    let body = types::rewrite_procedure(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_PROCEDURE, &body);
                }
                kind::LF_MFUNCTION_16T => {
                    let body = types::rewrite_mfunction(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_MFUNCTION, &body);
                }
                kind::LF_METHODLIST_16T => {
                    let body = types::rewrite_methodlist(record.body, &self.remap)?;
                    emit_record(&mut out, kind::LF_METHODLIST, &body);
                }
                kind::LF_ARRAY_16T => {
                    let body = types::rewrite_array(record.body, &self.remap, &self.config)?;
                    emit_record(&mut out, kind::LF_ARRAY, &body);
                }
                kind::LF_FIELDLIST_16T => {
                    let FieldListResult::Bytes(body) = fieldlist::walk(
                        record.body,
                        FieldListJob::CopyWithRewrite,
                        &self.remap,
                        &self.methodlists,
                        &self.config,
                    )?
                    else {
                        unreachable!("CopyWithRewrite always yields Bytes")
                    };
                    emit_record(&mut out, kind::LF_FIELDLIST, &body);
                }
                kind::LF_CLASS_16T | kind::LF_STRUCTURE_16T | kind::LF_UNION_16T => {
                    let agg_kind = match record.kind {
                        kind::LF_CLASS_16T => AggregateKind::Class,
                        kind::LF_STRUCTURE_16T => AggregateKind::Struct,
                        _ => AggregateKind::Union,
                    };
                    let (body, property, name) =
                        types::rewrite_aggregate(agg_kind, record.body, &self.remap, &self.remap, &self.config)?;
                    let out_kind = match agg_kind {
                        AggregateKind::Class => kind::LF_CLASS,
                        AggregateKind::Struct => kind::LF_STRUCTURE,
                        AggregateKind::Union => kind::LF_UNION,
                    };
                    // `count`(u32) + `property`(u16) + `field_list`(u32) is the
                    // shared prefix every aggregate kind emits before the
                    // optional derived/vtshape words.
                    let field_list = TypeIdx(u32::from_le_bytes(body[6..10].try_into().unwrap()));
                    self.track_aggregate(output_idx, out_kind, &body, property, field_list, &name, &mut out);
                }
                kind::LF_ENUM_16T => {
                    let (body, property, name) =
                        types::rewrite_enum(record.body, &self.remap, &self.remap, &self.config)?;
                    // `count`(u32) + `property`(u16) + `underlying`(u32) +
                    // `field_list`(u32).
                    let field_list = TypeIdx(u32::from_le_bytes(body[10..14].try_into().unwrap()));
                    self.track_aggregate(output_idx, kind::LF_ENUM, &body, property, field_list, &name, &mut out);
                }
                kind::LF_DERIVED_16T => {
                    // The derived-list kind is nulled out: the input compiler
                    // emits it incorrectly and no debugger reads it.
                    emit_record(&mut out, kind::LF_NULL, &[]);
                }
                other => {
                    // Reserve this record's slot with an inert placeholder so
                    // the positional index invariant (the Nth emitted record
                    // occupies FIRST_USER_TYPE + N) holds for every later
                    // record, then move on: one unrecognized record must not
                    // abort translation of the rest of the stream.
                    warn!(kind = format!("{other:#06x}"), "unsupported type record kind, emitting placeholder");
                    emit_record(&mut out, kind::LF_NULL, &[]);
                }
            }
        }

        self.fixup_properties(&mut out);
        Ok(out)
    }

    fn track_aggregate(
        &mut self,
        type_idx: TypeIdx,
        out_kind: u16,
        body: &[u8],
        property: CvProperty,
        field_list: TypeIdx,
        name: &str,
        out: &mut Vec<u8>,
    ) {
        self.names.insert(type_idx, name.to_owned());
        // `count`(u32) + `property`(u16) is the shared prefix of every
        // aggregate/enum body this translator emits.
        let property_offset = out.len() + 4 + 4;
        emit_record(out, out_kind, body);

        let record = AggregateRecord {
            type_idx,
            name: name.to_owned(),
            field_list,
            property_offset,
        };

        if property.incomplete() {
            self.incomplete.push(record);
        } else {
            self.complete_by_name.insert(name.to_owned(), type_idx);
            self.aggregates.push(record);
        }
    }

    fn lower_oem_record(&mut self, body: &[u8], input_idx: InputTypeIdx, out: &mut Vec<u8>) -> Result<(), CodeViewError> {
        let record = oem::parse_oem(body)?;
        let Some(oem_kind) = oem::OemKind::from_id(record.id) else {
            // An OEM id this translator doesn't know: reserve the slot with
            // an inert placeholder and move on rather than aborting the rest
            // of the type stream over one vendor extension it can't lower.
            warn!(oem_id = record.id, "unsupported OEM extension id, emitting placeholder");
            let idx = self.allocator.alloc();
            self.remap.insert(input_idx, idx);
            emit_record(out, kind::LF_NULL, &[]);
            return Ok(());
        };

        let (field_list_body, name, member_count) = match oem_kind {
            oem::OemKind::DynamicArray => {
                let elem = self.resolve_arg(*record.args.first().unwrap_or(&0));
                let elem_name = self.pretty_name(elem);
                oem::lower_dynamic_array(elem, &elem_name, &self.config)
            }
            oem::OemKind::Delegate => {
                let this_ty = self.resolve_arg(*record.args.first().unwrap_or(&0));
                let func_ty = self.resolve_arg(*record.args.get(1).unwrap_or(&0));
                let func_name = self.pretty_name(func_ty);
                oem::lower_delegate(this_ty, func_ty, &func_name, &self.config)
            }
            oem::OemKind::AssociativeArray => {
                let key_ty = self.resolve_arg(*record.args.first().unwrap_or(&0));
                let val_ty = self.resolve_arg(*record.args.get(1).unwrap_or(&0));
                oem::lower_associative_array(key_ty, val_ty, &mut self.config)
            }
        };

        let aggregate_idx =
            self.emit_simple_aggregate(&field_list_body, &name, member_count, (member_count * 4) as i128, out);
        self.remap.insert(input_idx, aggregate_idx);
        Ok(())
    }

    /// Emits an `LF_FIELDLIST` and the `LF_STRUCTURE` that references it for
    /// a synthesized aggregate (an OEM-type lowering or a complex-float
    /// lowering), allocating both indices and tracking the aggregate for the
    /// property fix-up pass exactly as an input-derived aggregate would be.
    fn emit_simple_aggregate(
        &mut self,
        field_list_body: &[u8],
        name: &str,
        member_count: usize,
        size: i128,
        out: &mut Vec<u8>,
    ) -> TypeIdx {
        let field_list_idx = self.allocator.alloc();
        emit_record(out, kind::LF_FIELDLIST, field_list_body);

        let aggregate_idx = self.allocator.alloc();

        let mut agg_body = Vec::new();
        agg_body.extend_from_slice(&(member_count as u32).to_le_bytes());
        agg_body.extend_from_slice(&0u16.to_le_bytes()); // property: complete, not nested.
        agg_body.extend_from_slice(&field_list_idx.0.to_le_bytes());
        agg_body.extend_from_slice(&0u32.to_le_bytes()); // derived: always null.
        agg_body.extend_from_slice(&0u32.to_le_bytes()); // vtshape: none.
        crate::leaf::write_numeric_leaf(size, &mut agg_body);
        crate::leaf::name_copy(
            &mut agg_body,
            &self.config.replace_dots(name),
            if self.config.use_v3_names {
                crate::leaf::NameStyle::ZeroTerminated
            } else {
                crate::leaf::NameStyle::Pascal
            },
            self.config.dot_replacement,
        );

        self.track_aggregate(aggregate_idx, kind::LF_STRUCTURE, &agg_body, CvProperty::default(), field_list_idx, name, out);
        aggregate_idx
    }

    /// Lowers whichever of the three complex-float basic types
    /// (`cfloat`/`cdouble`/`creal`) `used` marks as actually referenced by
    /// this type stream to `{re, im}` structs, ahead of the main pass, and
    /// records the remap from each basic-type id to its synthesized
    /// aggregate, so any later reference to the basic id — in a member, a
    /// pointer, an arg list, wherever — resolves through
    /// [`Self::resolve_arg`]/[`fieldlist::walk`]'s `resolve` exactly like a
    /// reference to any other lowered type would (spec.md §4.3 "OEM-type
    /// lowering"). Skipping the unused ones keeps an input that never
    /// mentions complex floats free of unreferenced synthetic records.
    fn lower_complex_types(&mut self, used: [bool; 3], out: &mut Vec<u8>) {
        for (&complex_id, &is_used) in [oem::T_CPLX32, oem::T_CPLX64, oem::T_CPLX80].iter().zip(used.iter()) {
            if !is_used {
                continue;
            }
            let Some((component, component_size, name)) = oem::complex_component(complex_id) else {
                continue;
            };
            let (field_list_body, agg_name, member_count) = oem::lower_complex(component, component_size, name, &self.config);
            let size = 2 * component_size as i128;
            let aggregate_idx = self.emit_simple_aggregate(&field_list_body, &agg_name, member_count, size, out);
            self.remap.insert(InputTypeIdx(complex_id), aggregate_idx);
        }
    }

    /// Sets `HasNested` on every aggregate whose field list contains a
    /// nested-type entry, and `IsNested` on every aggregate referenced by
    /// some other field list's nested-type entry (spec.md §4.3 "Property
    /// fix-up"). Both require a linear pass over the already-translated
    /// stream, so this runs once after every record has been emitted.
    fn fixup_properties(&mut self, out: &mut [u8]) {
        let mut is_nested: HashMap<TypeIdx, bool> = HashMap::new();

        for aggregate in self.aggregates.iter().chain(self.incomplete.iter()) {
            if aggregate.field_list.0 == 0 {
                continue;
            }
            if let Some(field_list_body) = self.find_field_list_body(out, aggregate.field_list) {
                for target in nested_type_targets(&field_list_body, &self.config) {
                    is_nested.insert(target, true);
                }
            }
        }

        for aggregate in self.aggregates.iter().chain(self.incomplete.iter()) {
            let has_nested = aggregate.field_list.0 != 0
                && self
                    .find_field_list_body(out, aggregate.field_list)
                    .map(|body| !nested_type_targets(&body, &self.config).is_empty())
                    .unwrap_or(false);
            let nested = is_nested.get(&aggregate.type_idx).copied().unwrap_or(false);

            if let Some(slice) = out.get_mut(aggregate.property_offset..aggregate.property_offset + 2) {
                let mut property = CvProperty(u16::from_le_bytes([slice[0], slice[1]]));
                property.set_has_nested(has_nested);
                property.set_is_nested(nested);
                slice.copy_from_slice(&property.0.to_le_bytes());
            }
        }
    }

    fn find_field_list_body(&self, out: &[u8], field_list: TypeIdx) -> Option<Vec<u8>> {
        // Linear scan, acceptable at this translator's single-CU scale; the
        // arena-by-index design note targets construction, not this
        // diagnostic fix-up pass.
        let target_wire_idx = field_list.0;
        let mut scanned = FIRST_USER_TYPE;
        for record in RecordCursor::new(out) {
            let record = record.ok()?;
            if record.kind == kind::LF_FIELDLIST && scanned == target_wire_idx {
                return Some(record.body.to_vec());
            }
            scanned += 1;
        }
        None
    }

    /// Resolves the output type a `S_UDT` symbol should reference, applying
    /// forward-declaration completion: an incomplete aggregate is replaced
    /// by its complete counterpart when one was emitted, otherwise this
    /// records a placeholder UDT under a mangled name (spec.md §4.3
    /// "Forward-declaration completion").
    fn resolve_udt_target(&mut self, ty: TypeIdx) -> (TypeIdx, Option<String>) {
        if let Some(incomplete) = self.incomplete.iter().find(|a| a.type_idx == ty) {
            if let Some(&complete) = self.complete_by_name.get(&incomplete.name) {
                return (complete, None);
            }
            let placeholder = format!("__incomplete_{}", incomplete.name);
            return (ty, Some(placeholder));
        }
        (ty, None)
    }

    /// Translates the v1 global-symbol stream, per spec.md §4.3 "Symbol
    /// rewrite", recording every UDT symbol seen or synthesized into the
    /// [`UdtTable`].
    pub fn translate_symbols(&mut self, symbol_stream: &[u8]) -> Result<Vec<u8>, CodeViewError> {
        let mut out = Vec::new();
        let mut proc = ProcedureContext::default();

        for record in RecordCursor::new(symbol_stream) {
            let record = record?;
            match symbols::rewrite_symbol(record.kind, record.body, &self.remap, &self.config, &mut proc)? {
                Some(rewritten) => {
                    if rewritten.kind == super::symkind::S_UDT {
                        let ty = TypeIdx(u32::from_le_bytes(rewritten.body[0..4].try_into().unwrap()));
                        let (resolved, placeholder) = self.resolve_udt_target(ty);
                        let name = placeholder.unwrap_or_else(|| {
                            self.names.get(&resolved).cloned().unwrap_or_default()
                        });
                        self.udt.insert(resolved, name);
                    }
                    emit_record(&mut out, rewritten.kind, &rewritten.body);
                }
                None => debug!(kind = format!("{:#06x}", record.kind), "dropped unsupported-but-known symbol kind"),
            }
        }

        // Every aggregate that had no explicit S_UDT in the input stream
        // still needs one, including incomplete types with no complete
        // counterpart (spec.md §8 boundary behavior).
        for aggregate in self.aggregates.iter().chain(self.incomplete.iter()) {
            if self.udt.find_by_type(aggregate.type_idx).is_some() {
                continue;
            }
            self.udt.insert(aggregate.type_idx, aggregate.name.clone());
        }

        Ok(out)
    }

    /// Runs the full CodeView Translator over one type stream and one
    /// symbol stream, producing the blobs spec.md §4.3 lists (minus the
    /// module-per-entry split, which [`crate::sink`] performs once symbols
    /// from multiple object modules are merged).
    pub fn translate(mut self, type_stream: &[u8], symbol_stream: &[u8]) -> Result<CodeViewOutput, CodeViewError> {
        let types = self.translate_types(type_stream)?;
        let symbols = self.translate_symbols(symbol_stream)?;
        let udt = self.udt.flush(&self.config);
        Ok(CodeViewOutput { types, symbols, udt })
    }
}

/// Scans every record's body for a 2-byte-aligned occurrence of one of the
/// three complex-float basic-type ids, so [`CodeViewTranslator::translate_types`]
/// only lowers the ones an input stream actually references. Every type
/// reference this translator reads sits at an even byte offset, so this
/// cannot miss a real reference; it may rarely over-match a numeric leaf
/// that happens to carry the same bit pattern, which costs an unreferenced
/// synthesized struct rather than any incorrect output.
fn scan_complex_usage(type_stream: &[u8]) -> [bool; 3] {
    let mut used = [false; 3];
    for record in RecordCursor::new(type_stream) {
        let Ok(record) = record else { continue };
        let mut pos = 0usize;
        while pos + 2 <= record.body.len() {
            let value = u32::from(u16::from_le_bytes([record.body[pos], record.body[pos + 1]]));
            match value {
                oem::T_CPLX32 => used[0] = true,
                oem::T_CPLX64 => used[1] = true,
                oem::T_CPLX80 => used[2] = true,
                _ => {}
            }
            pos += 2;
        }
    }
    used
}

fn skip_pad(body: &[u8], mut pos: usize) -> usize {
    while let Some(&b) = body.get(pos) {
        if (0xF1..=0xF4).contains(&b) {
            pos += (b - 0xF0) as usize;
        } else {
            break;
        }
    }
    pos
}

fn read_name_end(body: &[u8], at: usize, config: &TranslatorConfig) -> Option<usize> {
    if config.use_v3_names {
        let rel = body.get(at..)?.iter().position(|&b| b == 0)?;
        Some(at + rel + 1)
    } else {
        let (len, off) = crate::leaf::pascal_string_length(body.get(at..)?).ok()?;
        Some(at + off + len)
    }
}

/// Computes the byte position immediately after one v3 field-list entry
/// (whose kind tag starts at `after_kind - 2`), plus the nested-type target
/// it names, if any. Mirrors the exact shapes [`super::fieldlist::walk`]'s
/// `CopyWithRewrite` job emits.
fn v3_entry_end(body: &[u8], entry_kind: u16, after_kind: usize, config: &TranslatorConfig) -> Option<(usize, Option<TypeIdx>)> {
    use crate::leaf::numeric_leaf;
    let mut pos = after_kind;
    match entry_kind {
        kind::LF_BCLASS => {
            pos += 8; // attr, reserved, index
            let (_, len) = numeric_leaf(body.get(pos..)?).ok()?;
            Some((pos + len, None))
        }
        kind::LF_VBCLASS | kind::LF_IVBCLASS => {
            pos += 12; // attr, reserved, index, vbptr
            let (_, l1) = numeric_leaf(body.get(pos..)?).ok()?;
            pos += l1;
            let (_, l2) = numeric_leaf(body.get(pos..)?).ok()?;
            Some((pos + l2, None))
        }
        kind::LF_MEMBER => {
            pos += 8; // attr, reserved, index
            let (_, len) = numeric_leaf(body.get(pos..)?).ok()?;
            pos += len;
            Some((read_name_end(body, pos, config)?, None))
        }
        kind::LF_STMEMBER | kind::LF_METHOD => {
            pos += 8;
            Some((read_name_end(body, pos, config)?, None))
        }
        kind::LF_ONEMETHOD => {
            let attr_bytes = body.get(pos..pos + 2)?;
            let attr = u16::from_le_bytes([attr_bytes[0], attr_bytes[1]]);
            pos += 8; // attr, reserved, index
            if matches!((attr >> 2) & 0x7, 4 | 5 | 6) {
                pos += 4; // trailing vbaseoff
            }
            Some((read_name_end(body, pos, config)?, None))
        }
        kind::LF_NESTTYPE => {
            pos += 2; // reserved
            let idx = u32::from_le_bytes(body.get(pos..pos + 4)?.try_into().ok()?);
            pos += 4;
            Some((read_name_end(body, pos, config)?, Some(TypeIdx(idx))))
        }
        kind::LF_VFUNCTAB => Some((pos + 6, None)), // reserved, index
        _ => None,
    }
}

/// Scans a v3 field-list body for `LF_NESTTYPE` entries and returns the
/// (already-resolved) output type index each one names.
fn nested_type_targets(body: &[u8], config: &TranslatorConfig) -> Vec<TypeIdx> {
    let mut targets = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        pos = skip_pad(body, pos);
        if pos + 2 > body.len() {
            break;
        }
        let entry_kind = u16::from_le_bytes([body[pos], body[pos + 1]]);
        let Some((end, nested)) = v3_entry_end(body, entry_kind, pos + 2, config) else {
            break;
        };
        if let Some(target) = nested {
            targets.push(target);
        }
        pos = end;
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_simple_pointer_and_class() {
        let mut type_stream = Vec::new();
        // LF_POINTER_16T(0x1000): points to basic type 0x74 (uint).
        let mut ptr_body = Vec::new();
        ptr_body.extend_from_slice(&0x0074u16.to_le_bytes());
        ptr_body.extend_from_slice(&0u16.to_le_bytes());
        emit_record(&mut type_stream, kind::LF_POINTER_16T, &ptr_body);

        let mut translator = CodeViewTranslator::new(TranslatorConfig::default());
        let out = translator.translate_types(&type_stream).unwrap();
        let record = RecordCursor::new(&out).next().unwrap().unwrap();
        assert_eq!(record.kind, kind::LF_POINTER);
    }

    #[test]
    fn unreferenced_complex_types_add_no_records() {
        let mut type_stream = Vec::new();
        let mut ptr_body = Vec::new();
        ptr_body.extend_from_slice(&0x0074u16.to_le_bytes());
        ptr_body.extend_from_slice(&0u16.to_le_bytes());
        emit_record(&mut type_stream, kind::LF_POINTER_16T, &ptr_body);

        let mut translator = CodeViewTranslator::new(TranslatorConfig::default());
        let out = translator.translate_types(&type_stream).unwrap();
        let records: Vec<_> = RecordCursor::new(&out).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1, "no complex-float struct should be synthesized when unused");
    }

    #[test]
    fn pointer_to_cdouble_resolves_through_lowered_aggregate() {
        let mut type_stream = Vec::new();
        // LF_POINTER_16T -> T_CPLX64 (cdouble basic type).
        let mut ptr_body = Vec::new();
        ptr_body.extend_from_slice(&(oem::T_CPLX64 as u16).to_le_bytes());
        ptr_body.extend_from_slice(&0u16.to_le_bytes());
        emit_record(&mut type_stream, kind::LF_POINTER_16T, &ptr_body);

        let mut translator = CodeViewTranslator::new(TranslatorConfig::default());
        let out = translator.translate_types(&type_stream).unwrap();
        let records: Vec<_> = RecordCursor::new(&out).collect::<Result<_, _>>().unwrap();
        // Lowered field list, lowered struct, then the pointer record.
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].kind, kind::LF_STRUCTURE);
        let pointer = &records[2];
        assert_eq!(pointer.kind, kind::LF_POINTER);
        let resolved = u32::from_le_bytes(pointer.body[0..4].try_into().unwrap());
        assert_eq!(resolved, FIRST_USER_TYPE + 1, "pointer must target the lowered cdouble struct");
    }
}

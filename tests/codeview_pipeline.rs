use pdbsynth::codeview::{emit_record, kind, CodeViewTranslator, RecordCursor};
use pdbsynth::config::TranslatorConfig;

/// `LF_MODIFIER_16T(index: T_INT4, attr: const)` should come out the other
/// side as an `LF_MODIFIER` whose index has been widened to 32 bits and whose
/// attr word is preserved, at output type index 0x1000 (the first record in
/// an otherwise-empty stream).
#[test]
fn modifier_record_widens_index_and_keeps_attribute() {
    const T_INT4: u16 = 0x0074;
    const CONST_ATTR: u16 = 0x0001;

    let mut input = Vec::new();
    let mut body = Vec::new();
    body.extend_from_slice(&T_INT4.to_le_bytes());
    body.extend_from_slice(&CONST_ATTR.to_le_bytes());
    emit_record(&mut input, kind::LF_MODIFIER_16T, &body);

    let translator = CodeViewTranslator::new(TranslatorConfig::default());
    let output = translator.translate(&input, &[]).expect("translation succeeds");

    let records: Vec<_> = RecordCursor::new(&output.types)
        .collect::<Result<_, _>>()
        .expect("output stream is well-formed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, kind::LF_MODIFIER);

    let index = u32::from_le_bytes(records[0].body[0..4].try_into().unwrap());
    let attr = u16::from_le_bytes(records[0].body[4..6].try_into().unwrap());
    assert_eq!(index, T_INT4 as u32);
    assert_eq!(attr, CONST_ATTR);
}

/// Two records in a row must land at consecutive output indices starting at
/// 0x1000, and a forward reference from the second to the first must resolve
/// through the remap rather than being left as a dangling v1 index.
#[test]
fn pointer_to_earlier_record_resolves_through_remap() {
    const T_CHAR: u16 = 0x0010;

    let mut input = Vec::new();

    // Record 0 (-> output index 0x1000): LF_MODIFIER_16T wrapping T_CHAR.
    let mut modifier_body = Vec::new();
    modifier_body.extend_from_slice(&T_CHAR.to_le_bytes());
    modifier_body.extend_from_slice(&0u16.to_le_bytes());
    emit_record(&mut input, kind::LF_MODIFIER_16T, &modifier_body);

    // Record 1 (-> output index 0x1001): LF_POINTER_16T(utype=0x1000, attr=0).
    let mut pointer_body = Vec::new();
    pointer_body.extend_from_slice(&0x1000u16.to_le_bytes());
    pointer_body.extend_from_slice(&0u16.to_le_bytes());
    emit_record(&mut input, kind::LF_POINTER_16T, &pointer_body);

    let translator = CodeViewTranslator::new(TranslatorConfig::default());
    let output = translator.translate(&input, &[]).expect("translation succeeds");

    let records: Vec<_> = RecordCursor::new(&output.types)
        .collect::<Result<_, _>>()
        .expect("output stream is well-formed");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].kind, kind::LF_POINTER);

    let resolved = u32::from_le_bytes(records[1].body[0..4].try_into().unwrap());
    assert_eq!(resolved, 0x1000, "pointer must target the first record's output index");
}

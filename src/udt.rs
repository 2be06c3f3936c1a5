//! UDT Symbol Table (spec.md §4.8): tracks every user-defined type that
//! needs an `S_UDT` symbol, indexed by both output type index and name, and
//! flushes the accumulated set as a single blob once translation completes.

use std::collections::HashMap;

use crate::codeview::symkind::S_UDT;
use crate::codeview::emit_record;
use crate::config::TranslatorConfig;
use crate::index::TypeIdx;
use crate::leaf::{name_copy, NameStyle};

/// One tracked user-defined type and the name its `S_UDT` symbol carries.
#[derive(Debug, Clone)]
pub struct UdtEntry {
    pub type_idx: TypeIdx,
    pub name: String,
}

/// Dual-indexed table of UDT entries, insertion-ordered for deterministic
/// output.
#[derive(Debug, Default)]
pub struct UdtTable {
    by_type: HashMap<TypeIdx, usize>,
    by_name: HashMap<String, usize>,
    entries: Vec<UdtEntry>,
}

impl UdtTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        UdtTable::default()
    }

    /// Records that `type_idx` needs a `S_UDT` symbol under `name`.
    ///
    /// Idempotent: inserting the same type twice with the same name is a
    /// no-op. Inserting a second name for an already-tracked type (a later,
    /// more specific `S_UDT` from the input stream, say) updates the name
    /// in place rather than duplicating the entry.
    pub fn insert(&mut self, type_idx: TypeIdx, name: String) {
        if let Some(&idx) = self.by_type.get(&type_idx) {
            let old_name = self.entries[idx].name.clone();
            if old_name != name {
                self.by_name.remove(&old_name);
                self.by_name.insert(name.clone(), idx);
                self.entries[idx].name = name;
            }
            return;
        }
        let idx = self.entries.len();
        self.by_type.insert(type_idx, idx);
        self.by_name.insert(name.clone(), idx);
        self.entries.push(UdtEntry { type_idx, name });
    }

    /// Looks up a tracked UDT by its output type index.
    pub fn find_by_type(&self, type_idx: TypeIdx) -> Option<&UdtEntry> {
        self.by_type.get(&type_idx).map(|&idx| &self.entries[idx])
    }

    /// Looks up a tracked UDT by name.
    pub fn find_by_name(&self, name: &str) -> Option<&UdtEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Number of tracked UDTs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no UDTs have been tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flushes every tracked UDT as a blob of `S_UDT` records, in insertion
    /// order (spec.md §4.8 "UDT Symbol Table").
    pub fn flush(&self, config: &TranslatorConfig) -> Vec<u8> {
        let style = if config.use_v3_names {
            NameStyle::ZeroTerminated
        } else {
            NameStyle::Pascal
        };
        let mut out = Vec::new();
        for entry in &self.entries {
            let mut body = Vec::new();
            body.extend_from_slice(&entry.type_idx.0.to_le_bytes());
            name_copy(&mut body, &entry.name, style, config.dot_replacement);
            emit_record(&mut out, S_UDT, &body);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_for_same_name() {
        let mut table = UdtTable::new();
        table.insert(TypeIdx(0x1000), "Foo".to_owned());
        table.insert(TypeIdx(0x1000), "Foo".to_owned());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_updates_name_for_same_type() {
        let mut table = UdtTable::new();
        table.insert(TypeIdx(0x1000), "Foo".to_owned());
        table.insert(TypeIdx(0x1000), "Bar".to_owned());
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_type(TypeIdx(0x1000)).unwrap().name, "Bar");
        assert!(table.find_by_name("Foo").is_none());
        assert!(table.find_by_name("Bar").is_some());
    }

    #[test]
    fn flush_emits_one_record_per_entry() {
        let mut table = UdtTable::new();
        table.insert(TypeIdx(0x1000), "Foo".to_owned());
        table.insert(TypeIdx(0x1001), "Bar".to_owned());
        let blob = table.flush(&TranslatorConfig::default());
        let records: Vec<_> = crate::codeview::RecordCursor::new(&blob).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == S_UDT));
    }
}

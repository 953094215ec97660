//! # Process-Wide Schema Interning
//!
//! Two schemas with equal canonical JSON must share one runtime
//! instance, so pointer equality doubles as schema equality everywhere a
//! record, list, or log frame is checked against an expected type. The
//! registry also resolves 64-bit schema ids back to their schema, which
//! is how a log cursor recognizes a frame type it has seen before in
//! another file.

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

use crate::records::schema::{FieldDef, Schema};

#[derive(Default)]
struct Registry {
    by_canonical: HashMap<String, Arc<Schema>>,
    by_id: HashMap<u64, Arc<Schema>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

pub(crate) fn intern(name: Option<&str>, fields: Vec<FieldDef>) -> Result<Arc<Schema>> {
    // Validation and layout run outside the lock; only the map insert is
    // serialized.
    let built = Schema::build(name, fields)?;
    let mut reg = registry().lock();
    if let Some(existing) = reg.by_canonical.get(built.canonical_json()) {
        return Ok(existing.clone());
    }
    let schema = Arc::new(built);
    reg.by_canonical
        .insert(schema.canonical_json().to_string(), schema.clone());
    reg.by_id.insert(schema.id(), schema.clone());
    Ok(schema)
}

/// Resolves a schema id to its interned schema, if this process has seen
/// it.
pub fn lookup_by_id(id: u64) -> Option<Arc<Schema>> {
    registry().lock().by_id.get(&id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    #[test]
    fn equal_field_lists_intern_to_one_instance() {
        let a = Schema::intern(
            Some("interned_eq"),
            vec![
                FieldDef::new("k", FieldType::Uint32),
                FieldDef::new("v", FieldType::Utf8),
            ],
        )
        .unwrap();
        let b = Schema::intern(
            Some("interned_eq"),
            vec![
                FieldDef::new("k", FieldType::Uint32),
                FieldDef::new("v", FieldType::Utf8),
            ],
        )
        .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn differing_names_do_not_intern_together() {
        let fields = || vec![FieldDef::new("k", FieldType::Uint32)];
        let a = Schema::intern(Some("interned_a"), fields()).unwrap();
        let b = Schema::intern(Some("interned_b"), fields()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn interned_ids_resolve_back() {
        let schema = Schema::intern(
            Some("interned_lookup"),
            vec![FieldDef::new("x", FieldType::Float64)],
        )
        .unwrap();
        let found = lookup_by_id(schema.id()).expect("id registered");
        assert!(Arc::ptr_eq(&schema, &found));
    }
}

//! # Schema Definition and Layout
//!
//! A schema is an ordered list of `(name, type, length)` field
//! descriptors. Construction validates the descriptors and pre-computes
//! the byte layout every accessor uses, so field access is offset
//! arithmetic with no per-call lookups.
//!
//! ## Record Binary Layout
//!
//! ```text
//! +---------------------+---------------------+------------------+
//! | Fixed-width fields  | Offset slots        | Variable payloads|
//! | (widest first)      | [u32; n_variable]   | [u8; ...]        |
//! +---------------------+---------------------+------------------+
//! ```
//!
//! | Component | Description |
//! |-----------|-------------|
//! | **Fixed fields** | Sorted widest-element first (stable on input order), each offset rounded up to its element width |
//! | **Offset slots** | One `u32` per variable field, 4-byte aligned, holding the byte offset where that payload begins |
//! | **Payloads** | Concatenated; a payload ends where the next one begins, or at the buffer end for the last |
//!
//! The width-descending sort makes the layout deterministic for a given
//! field list without requiring the caller to hand-pack it: two schemas
//! that differ only in declaration order produce the same offsets.
//!
//! ## Identity
//!
//! The canonical serialization is the JSON `[name, [[field, type] |
//! [field, type, len], ...]]` over the *input-ordered* field list. Equal
//! canonical JSON means the same interned runtime schema; the 64-bit
//! schema id is the first 8 bytes (big-endian) of SHA-256 over it.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::types::FieldType;

/// Name of the raw-buffer accessor every record exposes; fields may not
/// shadow it.
pub const RESERVED_FIELD_NAME: &str = "buffer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub len: usize,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            len: 1,
        }
    }

    pub fn array(name: impl Into<String>, ty: FieldType, len: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            len,
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDef>,
    offsets: Vec<usize>,
    var_order: Vec<usize>,
    by_name: HashMap<String, usize>,
    min_size: usize,
    stride: Option<usize>,
    canonical: String,
    id: u64,
}

fn valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn round_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

impl Schema {
    /// Validates the field list and computes the layout. Callers go
    /// through [`Schema::intern`]; this stays crate-private so equal
    /// schemas always deduplicate to one instance.
    pub(crate) fn build(name: Option<&str>, fields: Vec<FieldDef>) -> Result<Schema> {
        let mut by_name = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            ensure!(
                valid_field_name(&field.name),
                "invalid field name '{}'",
                field.name
            );
            ensure!(
                field.name != RESERVED_FIELD_NAME,
                "invalid field name '{}': reserved accessor",
                field.name
            );
            ensure!(
                by_name.insert(field.name.clone(), idx).is_none(),
                "invalid field name '{}': duplicate",
                field.name
            );
            ensure!(
                field.len >= 1,
                "field '{}' length must be >= 1, got {}",
                field.name,
                field.len
            );
            if field.ty.is_variable() {
                ensure!(
                    field.len == 1,
                    "arrays of variable-width fields are not supported ('{}')",
                    field.name
                );
            }
        }

        // Layout order: fixed fields widest-element first, stable on
        // input order; variable fields last, in input order.
        let mut order: Vec<usize> = (0..fields.len()).collect();
        order.sort_by_key(|&i| match fields[i].ty.fixed_size() {
            Some(w) => (0usize, usize::MAX - w),
            None => (1, 0),
        });

        let mut offsets = vec![0usize; fields.len()];
        let mut var_order = Vec::new();
        let mut cursor = 0usize;
        let mut max_align = 1usize;
        for &i in &order {
            match fields[i].ty.fixed_size() {
                Some(width) => {
                    cursor = round_up(cursor, width);
                    offsets[i] = cursor;
                    cursor += width * fields[i].len;
                    max_align = max_align.max(width);
                }
                None => {
                    cursor = round_up(cursor, 4);
                    offsets[i] = cursor;
                    cursor += 4;
                    var_order.push(i);
                }
            }
        }

        let min_size = cursor;
        let stride = if var_order.is_empty() {
            if fields.is_empty() {
                Some(0)
            } else {
                Some(round_up(min_size, max_align))
            }
        } else {
            None
        };

        let name = match name {
            Some(n) => n.to_string(),
            None => synthetic_name(&fields),
        };
        let canonical = canonical_json(&name, &fields);
        let id = schema_id_of(&canonical);

        Ok(Schema {
            name,
            fields,
            offsets,
            var_order,
            by_name,
            min_size,
            stride,
            canonical,
            id,
        })
    }

    /// Returns the interned schema for this `(name, fields)` pair. Equal
    /// pairs share one `Arc<Schema>` process-wide.
    pub fn intern(name: Option<&str>, fields: Vec<FieldDef>) -> Result<Arc<Schema>> {
        crate::records::registry::intern(name, fields)
    }

    /// Parses canonical schema JSON (`[name, [[field, type, len?], ...]]`)
    /// and interns the result.
    pub fn from_json(json: &str) -> Result<Arc<Schema>> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| eyre::eyre!("invalid schema JSON: {}", e))?;
        let pair = value
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| eyre::eyre!("invalid schema JSON: expected [name, fields]"))?;
        let name = pair[0]
            .as_str()
            .ok_or_else(|| eyre::eyre!("invalid schema JSON: name must be a string"))?;
        let raw_fields = pair[1]
            .as_array()
            .ok_or_else(|| eyre::eyre!("invalid schema JSON: fields must be an array"))?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for entry in raw_fields {
            let tuple = entry
                .as_array()
                .filter(|t| t.len() == 2 || t.len() == 3)
                .ok_or_else(|| {
                    eyre::eyre!("invalid schema JSON: field must be [name, type] or [name, type, len]")
                })?;
            let fname = tuple[0]
                .as_str()
                .ok_or_else(|| eyre::eyre!("invalid schema JSON: field name must be a string"))?;
            let tname = tuple[1]
                .as_str()
                .ok_or_else(|| eyre::eyre!("invalid schema JSON: field type must be a string"))?;
            let len = if tuple.len() == 3 {
                tuple[2]
                    .as_u64()
                    .ok_or_else(|| eyre::eyre!("invalid schema JSON: field length must be a number"))?
                    as usize
            } else {
                1
            };
            fields.push(FieldDef::array(fname, FieldType::parse(tname)?, len));
        }
        Schema::intern(Some(name), fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDef> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Byte offset of field `idx` within a record buffer. For variable
    /// fields this is the offset of the u32 slot, not the payload.
    pub fn offset(&self, idx: usize) -> usize {
        self.offsets[idx]
    }

    /// Field indices of variable fields in slot order.
    pub fn var_order(&self) -> &[usize] {
        &self.var_order
    }

    pub fn var_count(&self) -> usize {
        self.var_order.len()
    }

    /// Position of a variable field within the slot order.
    pub fn var_position(&self, field_idx: usize) -> Option<usize> {
        self.var_order.iter().position(|&i| i == field_idx)
    }

    /// Smallest legal buffer for a record of this schema.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Packed element width, defined only for fully fixed schemas.
    /// Rounded up to the widest element so packed arrays stay aligned.
    pub fn stride(&self) -> Option<usize> {
        self.stride
    }

    pub fn is_fixed(&self) -> bool {
        self.stride.is_some()
    }

    /// Canonical `[name, fields]` JSON; the interning key.
    pub fn canonical_json(&self) -> &str {
        &self.canonical
    }

    /// 64-bit stable identifier: first 8 bytes of SHA-256 over the
    /// canonical JSON, interpreted big-endian.
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn synthetic_name(fields: &[FieldDef]) -> String {
    let mut out = String::from("{");
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&f.name);
        out.push(':');
        out.push_str(f.ty.name());
        if f.len > 1 {
            out.push('x');
            out.push_str(&f.len.to_string());
        }
    }
    out.push('}');
    out
}

fn canonical_json(name: &str, fields: &[FieldDef]) -> String {
    let fields_json: Vec<serde_json::Value> = fields
        .iter()
        .map(|f| {
            if f.len == 1 {
                json!([f.name, f.ty.name()])
            } else {
                json!([f.name, f.ty.name(), f.len])
            }
        })
        .collect();
    json!([name, fields_json]).to_string()
}

fn schema_id_of(canonical: &str) -> u64 {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(first)
}

//! # Record Access
//!
//! A record is `(schema, byte buffer)`; every accessor reads or writes
//! the buffer in place. Three views exist:
//!
//! - [`Record`] owns its buffer and supports the full surface including
//!   variable-field writes that resize it.
//! - [`RecordView`] borrows immutably for zero-copy reads (log cursors,
//!   flat-list slots).
//! - [`RecordMut`] borrows mutably for in-place fixed-field writes into
//!   storage someone else owns (flat-list slots); it cannot resize.
//!
//! ## Variable Fields
//!
//! Each variable field's u32 slot stores the offset where its payload
//! begins; a payload ends at the next slot's offset or at the buffer end.
//! Writing a different-sized payload shifts the tail and adjusts every
//! later slot by the delta, so earlier and later fields keep their
//! values. Observers holding `as_bytes()` must re-read after such a
//! write; the buffer may have been reallocated.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use std::sync::Arc;

use crate::records::array::{ArrayMut, ArrayView};
use crate::records::schema::Schema;
use crate::types::{read_scalar, write_scalar, FieldType, Value};

fn read_slot(buf: &[u8], off: usize) -> usize {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]) as usize
}

fn write_slot(buf: &mut [u8], off: usize, value: usize) {
    buf[off..off + 4].copy_from_slice(&(value as u32).to_le_bytes());
}

fn resolve(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .index_of(name)
        .ok_or_else(|| eyre::eyre!("unknown field '{}'", name))
}

/// Payload byte range of variable field `idx`.
fn var_bounds(schema: &Schema, buf: &[u8], idx: usize) -> Result<(usize, usize)> {
    let pos = schema
        .var_position(idx)
        .ok_or_else(|| eyre::eyre!("field '{}' is not variable-width", schema.fields()[idx].name))?;
    let start = read_slot(buf, schema.offset(idx));
    let end = match schema.var_order().get(pos + 1) {
        Some(&next) => read_slot(buf, schema.offset(next)),
        None => buf.len(),
    };
    ensure!(
        start <= end && end <= buf.len(),
        "corrupt offset slot for field '{}': {}..{} in {} bytes",
        schema.fields()[idx].name,
        start,
        end,
        buf.len()
    );
    Ok((start, end))
}

fn get_field(schema: &Schema, buf: &[u8], idx: usize) -> Result<Value> {
    let field = &schema.fields()[idx];
    match field.ty {
        FieldType::Utf8 => {
            let (start, end) = var_bounds(schema, buf, idx)?;
            let s = std::str::from_utf8(&buf[start..end])
                .map_err(|e| eyre::eyre!("invalid UTF-8 in field '{}': {}", field.name, e))?;
            Ok(Value::Str(s.to_string()))
        }
        FieldType::Bytes => {
            let (start, end) = var_bounds(schema, buf, idx)?;
            Ok(Value::Bytes(buf[start..end].to_vec()))
        }
        _ if field.len > 1 => {
            let view = ArrayView::new(buf, field.ty, schema.offset(idx), field.len);
            Ok(Value::Array(view.to_vec()))
        }
        _ => Ok(read_scalar(field.ty, buf, schema.offset(idx))),
    }
}

fn str_field<'b>(schema: &Schema, buf: &'b [u8], idx: usize) -> Result<&'b str> {
    let field = &schema.fields()[idx];
    ensure!(
        field.ty == FieldType::Utf8,
        "field '{}' is {}, not Utf8",
        field.name,
        field.ty.name()
    );
    let (start, end) = var_bounds(schema, buf, idx)?;
    std::str::from_utf8(&buf[start..end])
        .map_err(|e| eyre::eyre!("invalid UTF-8 in field '{}': {}", field.name, e))
}

fn bytes_field<'b>(schema: &Schema, buf: &'b [u8], idx: usize) -> Result<&'b [u8]> {
    let field = &schema.fields()[idx];
    ensure!(
        field.ty == FieldType::Bytes,
        "field '{}' is {}, not Bytes",
        field.name,
        field.ty.name()
    );
    let (start, end) = var_bounds(schema, buf, idx)?;
    Ok(&buf[start..end])
}

fn array_field<'b>(schema: &Schema, buf: &'b [u8], idx: usize) -> Result<ArrayView<'b>> {
    let field = &schema.fields()[idx];
    ensure!(
        field.len > 1,
        "field '{}' is not an inline array",
        field.name
    );
    Ok(ArrayView::new(buf, field.ty, schema.offset(idx), field.len))
}

fn to_values(schema: &Schema, buf: &[u8]) -> Result<HashMap<String, Value>> {
    let mut out = HashMap::with_capacity(schema.field_count());
    for idx in 0..schema.field_count() {
        out.insert(
            schema.fields()[idx].name.clone(),
            get_field(schema, buf, idx)?,
        );
    }
    Ok(out)
}

/// An owned record: schema plus backing buffer.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    buf: Vec<u8>,
}

impl Record {
    /// Allocates a default buffer: all fixed fields zeroed, every
    /// variable payload empty (offset slots point at the buffer end).
    pub fn new(schema: &Arc<Schema>) -> Record {
        let size = schema.stride().unwrap_or_else(|| schema.min_size());
        let mut buf = vec![0u8; size];
        for &idx in schema.var_order() {
            write_slot(&mut buf, schema.offset(idx), size);
        }
        Record {
            schema: schema.clone(),
            buf,
        }
    }

    /// Adopts an existing buffer without copying it.
    pub fn from_bytes(schema: &Arc<Schema>, buf: Vec<u8>) -> Result<Record> {
        ensure!(
            buf.len() >= schema.min_size(),
            "buffer too small: {} bytes, record requires {}",
            buf.len(),
            schema.min_size()
        );
        Ok(Record {
            schema: schema.clone(),
            buf,
        })
    }

    /// Default buffer plus the given field assignments.
    pub fn with_values(schema: &Arc<Schema>, values: &[(&str, Value)]) -> Result<Record> {
        let mut record = Record::new(schema);
        for (name, value) in values {
            record.set(name, value)?;
        }
        Ok(record)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The live backing bytes. Invalidated by any variable-field write.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn view(&self) -> RecordView<'_> {
        RecordView {
            schema: &self.schema,
            buf: &self.buf,
        }
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        get_field(&self.schema, &self.buf, resolve(&self.schema, name)?)
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_u64(&self, name: &str) -> Result<u64> {
        self.get(name)?.as_u64()
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.get(name)?.as_f64()
    }

    pub fn get_f32(&self, name: &str) -> Result<f32> {
        Ok(self.get(name)?.as_f64()? as f32)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.get(name)?.as_bool()
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        str_field(&self.schema, &self.buf, resolve(&self.schema, name)?)
    }

    pub fn get_bytes(&self, name: &str) -> Result<&[u8]> {
        bytes_field(&self.schema, &self.buf, resolve(&self.schema, name)?)
    }

    pub fn get_array(&self, name: &str) -> Result<ArrayView<'_>> {
        array_field(&self.schema, &self.buf, resolve(&self.schema, name)?)
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        let schema = self.schema.clone();
        let idx = resolve(&schema, name)?;
        let field = &schema.fields()[idx];
        match field.ty {
            FieldType::Utf8 => self.write_var(idx, value.as_str()?.as_bytes()),
            FieldType::Bytes => self.write_var(idx, value.as_byte_slice()?),
            _ if field.len > 1 => match value {
                Value::Array(items) => {
                    ArrayMut::new(&mut self.buf, field.ty, schema.offset(idx), field.len)
                        .fill_from(items)
                }
                other => bail!(
                    "field '{}' is an inline array, cannot assign {:?}",
                    field.name,
                    other
                ),
            },
            _ => write_scalar(field.ty, &mut self.buf, schema.offset(idx), value),
        }
    }

    pub fn set_str(&mut self, name: &str, value: &str) -> Result<()> {
        let idx = resolve(&self.schema, name)?;
        ensure!(
            self.schema.fields()[idx].ty == FieldType::Utf8,
            "field '{}' is {}, not Utf8",
            name,
            self.schema.fields()[idx].ty.name()
        );
        self.write_var(idx, value.as_bytes())
    }

    pub fn set_bytes(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let idx = resolve(&self.schema, name)?;
        ensure!(
            self.schema.fields()[idx].ty == FieldType::Bytes,
            "field '{}' is {}, not Bytes",
            name,
            self.schema.fields()[idx].ty.name()
        );
        self.write_var(idx, value)
    }

    pub fn array_mut(&mut self, name: &str) -> Result<ArrayMut<'_>> {
        let idx = resolve(&self.schema, name)?;
        let field = &self.schema.fields()[idx];
        ensure!(
            field.len > 1,
            "field '{}' is not an inline array",
            field.name
        );
        Ok(ArrayMut::new(
            &mut self.buf,
            field.ty,
            self.schema.offset(idx),
            field.len,
        ))
    }

    pub fn to_values(&self) -> Result<HashMap<String, Value>> {
        to_values(&self.schema, &self.buf)
    }

    /// Replaces the payload of variable field `idx`, resizing the buffer
    /// and fixing up every later offset slot when the length changes.
    fn write_var(&mut self, idx: usize, payload: &[u8]) -> Result<()> {
        let schema = self.schema.clone();
        let (start, end) = var_bounds(&schema, &self.buf, idx)?;
        let old_len = end - start;
        let new_len = payload.len();
        let pos = schema.var_position(idx).expect("checked by var_bounds");

        if new_len > old_len {
            let delta = new_len - old_len;
            let old_total = self.buf.len();
            self.buf.resize(old_total + delta, 0);
            self.buf.copy_within(end..old_total, end + delta);
            for &later in &schema.var_order()[pos + 1..] {
                let slot = schema.offset(later);
                let v = read_slot(&self.buf, slot);
                write_slot(&mut self.buf, slot, v + delta);
            }
        } else if new_len < old_len {
            let delta = old_len - new_len;
            self.buf.copy_within(end.., end - delta);
            self.buf.truncate(self.buf.len() - delta);
            for &later in &schema.var_order()[pos + 1..] {
                let slot = schema.offset(later);
                let v = read_slot(&self.buf, slot);
                write_slot(&mut self.buf, slot, v - delta);
            }
        }

        self.buf[start..start + new_len].copy_from_slice(payload);
        Ok(())
    }
}

/// Zero-copy read view over record bytes someone else owns.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    schema: &'a Arc<Schema>,
    buf: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// Wraps bytes whose length the caller has already validated
    /// (flat-list slots are always exactly one stride).
    pub(crate) fn over(schema: &'a Arc<Schema>, buf: &'a [u8]) -> RecordView<'a> {
        RecordView { schema, buf }
    }

    pub fn new(schema: &'a Arc<Schema>, buf: &'a [u8]) -> Result<RecordView<'a>> {
        ensure!(
            buf.len() >= schema.min_size(),
            "buffer too small: {} bytes, record requires {}",
            buf.len(),
            schema.min_size()
        );
        Ok(RecordView { schema, buf })
    }

    pub fn schema(&self) -> &'a Arc<Schema> {
        self.schema
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        get_field(self.schema, self.buf, resolve(self.schema, name)?)
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_u64(&self, name: &str) -> Result<u64> {
        self.get(name)?.as_u64()
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.get(name)?.as_f64()
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.get(name)?.as_bool()
    }

    pub fn get_str(&self, name: &str) -> Result<&'a str> {
        str_field(self.schema, self.buf, resolve(self.schema, name)?)
    }

    pub fn get_bytes(&self, name: &str) -> Result<&'a [u8]> {
        bytes_field(self.schema, self.buf, resolve(self.schema, name)?)
    }

    pub fn get_array(&self, name: &str) -> Result<ArrayView<'a>> {
        array_field(self.schema, self.buf, resolve(self.schema, name)?)
    }

    pub fn to_values(&self) -> Result<HashMap<String, Value>> {
        to_values(self.schema, self.buf)
    }

    /// Copies the viewed bytes into an owned record.
    pub fn to_record(&self) -> Record {
        Record {
            schema: self.schema.clone(),
            buf: self.buf.to_vec(),
        }
    }
}

/// Mutable view for in-place fixed-field writes into borrowed storage.
/// Variable fields cannot be written through it: that would resize a
/// buffer this view does not own.
#[derive(Debug)]
pub struct RecordMut<'a> {
    schema: &'a Arc<Schema>,
    buf: &'a mut [u8],
}

impl<'a> RecordMut<'a> {
    pub(crate) fn over(schema: &'a Arc<Schema>, buf: &'a mut [u8]) -> RecordMut<'a> {
        RecordMut { schema, buf }
    }

    pub fn new(schema: &'a Arc<Schema>, buf: &'a mut [u8]) -> Result<RecordMut<'a>> {
        ensure!(
            buf.len() >= schema.min_size(),
            "buffer too small: {} bytes, record requires {}",
            buf.len(),
            schema.min_size()
        );
        Ok(RecordMut { schema, buf })
    }

    pub fn schema(&self) -> &'a Arc<Schema> {
        self.schema
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        get_field(self.schema, self.buf, resolve(self.schema, name)?)
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        let idx = resolve(self.schema, name)?;
        let field = &self.schema.fields()[idx];
        if field.ty.is_variable() {
            bail!(
                "field '{}' is variable-width and cannot be written through a borrowed slot",
                field.name
            );
        }
        if field.len > 1 {
            match value {
                Value::Array(items) => {
                    ArrayMut::new(self.buf, field.ty, self.schema.offset(idx), field.len)
                        .fill_from(items)
                }
                other => bail!(
                    "field '{}' is an inline array, cannot assign {:?}",
                    field.name,
                    other
                ),
            }
        } else {
            write_scalar(field.ty, self.buf, self.schema.offset(idx), value)
        }
    }
}

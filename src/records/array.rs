//! # Inline Array Field Access
//!
//! Fixed-length array fields are stored as `len` consecutive elements at
//! the field's offset. The views here translate index access through the
//! per-type scalar codec, so they behave identically on any host and for
//! the sub-word float formats that have no native machine type.

use eyre::{ensure, Result};

use crate::types::{read_scalar, write_scalar, FieldType, Value};

/// Read-only view over one inline array field.
#[derive(Debug, Clone, Copy)]
pub struct ArrayView<'a> {
    buf: &'a [u8],
    ty: FieldType,
    offset: usize,
    len: usize,
}

impl<'a> ArrayView<'a> {
    pub(crate) fn new(buf: &'a [u8], ty: FieldType, offset: usize, len: usize) -> Self {
        Self {
            buf,
            ty,
            offset,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn elem_size(&self) -> usize {
        self.ty.fixed_size().unwrap_or(0)
    }

    pub fn byte_offset(&self) -> usize {
        self.offset
    }

    pub fn byte_len(&self) -> usize {
        self.len * self.elem_size()
    }

    pub fn get(&self, idx: usize) -> Result<Value> {
        ensure!(
            idx < self.len,
            "array index {} out of bounds for length {}",
            idx,
            self.len
        );
        Ok(read_scalar(
            self.ty,
            self.buf,
            self.offset + idx * self.elem_size(),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len).map(move |i| read_scalar(self.ty, self.buf, self.offset + i * self.elem_size()))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }
}

/// Mutable view over one inline array field.
#[derive(Debug)]
pub struct ArrayMut<'a> {
    buf: &'a mut [u8],
    ty: FieldType,
    offset: usize,
    len: usize,
}

impl<'a> ArrayMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8], ty: FieldType, offset: usize, len: usize) -> Self {
        Self {
            buf,
            ty,
            offset,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn elem_size(&self) -> usize {
        self.ty.fixed_size().unwrap_or(0)
    }

    pub fn get(&self, idx: usize) -> Result<Value> {
        ensure!(
            idx < self.len,
            "array index {} out of bounds for length {}",
            idx,
            self.len
        );
        Ok(read_scalar(
            self.ty,
            self.buf,
            self.offset + idx * self.elem_size(),
        ))
    }

    pub fn set(&mut self, idx: usize, value: &Value) -> Result<()> {
        ensure!(
            idx < self.len,
            "array index {} out of bounds for length {}",
            idx,
            self.len
        );
        let off = self.offset + idx * self.elem_size();
        write_scalar(self.ty, self.buf, off, value)
    }

    /// Writes up to `len` elements from `values`; extras are ignored and
    /// unwritten trailing elements keep their previous contents.
    pub fn fill_from(&mut self, values: &[Value]) -> Result<()> {
        for (idx, value) in values.iter().take(self.len).enumerate() {
            self.set(idx, value)?;
        }
        Ok(())
    }
}

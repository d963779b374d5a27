// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human-readable rendering of decoded views.
//!
//! Rendering is a pure function of `(descriptor, bytes)`: it walks the
//! ordered field list and formats each value. Integers print in hex,
//! byte-sized character data prints as a character when it falls in the
//! readable ASCII range, arrays print bracketed.

use crate::facade::{ArrayView, StructView, Value};
use cdecode_types::FieldType;
use std::fmt::{Display, Formatter, Result as FmtResult};

const FIRST_READABLE_CHAR: i64 = 32;
const LAST_READABLE_CHAR: i64 = 126;

fn is_readable_char(value: i64) -> bool {
    (FIRST_READABLE_CHAR..=LAST_READABLE_CHAR).contains(&value)
}

fn char_like(ty: &FieldType) -> bool {
    matches!(ty, FieldType::Leaf(leaf) if leaf.is_char_like())
}

fn write_scalar(f: &mut Formatter<'_>, value: &Value, char_like: bool) -> FmtResult {
    match value {
        Value::Int(v) if char_like && is_readable_char(*v) => {
            write!(f, "'{}'", *v as u8 as char)
        }
        Value::Int(v) => {
            if *v < 0 {
                write!(f, "-0x{:x}", v.unsigned_abs())
            } else {
                write!(f, "0x{v:x}")
            }
        }
        Value::Uint(v) if char_like && is_readable_char(*v as i64) => {
            write!(f, "'{}'", *v as u8 as char)
        }
        Value::Uint(v) => write!(f, "0x{v:x}"),
        Value::Float(v) => write!(f, "{v}"),
        Value::Bool(v) => write!(f, "{v}"),
        Value::Pointer(v) => write!(f, "0x{v:x}"),
        Value::Aggregate(_) | Value::Array(_) => unreachable!("scalar rendering only"),
    }
}

fn write_array(f: &mut Formatter<'_>, array: &ArrayView, char_like: bool, indent: usize) -> FmtResult {
    f.write_str("[")?;
    for index in 0..array.len() {
        if index > 0 {
            f.write_str(", ")?;
        }
        match array.at(index) {
            Ok(Value::Aggregate(view)) => write_fields(f, &view, indent + 1)?,
            Ok(Value::Array(inner)) => write_array(f, &inner, char_like, indent)?,
            Ok(value) => write_scalar(f, &value, char_like)?,
            Err(_) => f.write_str("<out of bounds>")?,
        }
    }
    f.write_str("]")
}

fn write_fields(f: &mut Formatter<'_>, view: &StructView, indent: usize) -> FmtResult {
    let pad = "\t".repeat(indent);
    f.write_str("{\n")?;
    for slot in view.fields() {
        match view.field(&slot.name) {
            Ok(Value::Aggregate(inner)) => {
                write!(f, "{pad}{} ", slot.name)?;
                write_fields(f, &inner, indent + 1)?;
                f.write_str("\n")?;
            }
            Ok(Value::Array(array)) => {
                write!(f, "{pad}{}: ", slot.name)?;
                write_array(f, &array, element_is_char_like(&slot.ty), indent)?;
                f.write_str("\n")?;
            }
            Ok(value) => {
                write!(f, "{pad}{}: ", slot.name)?;
                write_scalar(f, &value, char_like(&slot.ty))?;
                f.write_str("\n")?;
            }
            Err(err) => writeln!(f, "{pad}{}: <{err}>", slot.name)?,
        }
    }
    write!(f, "{}}}", "\t".repeat(indent.saturating_sub(1)))
}

fn element_is_char_like(ty: &FieldType) -> bool {
    match ty {
        FieldType::Array { element, .. } => element_is_char_like(element),
        other => char_like(other),
    }
}

impl Display for StructView {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} {} ", self.descriptor().kind, self.tag())?;
        write_fields(f, self, 1)
    }
}

#[cfg(test)]
mod test {
    use crate::convert::Converter;

    #[test]
    fn renders_scalars_arrays_and_nesting() {
        let mut conv = Converter::new();
        conv.add_source(
            "typedef struct { unsigned int a; char b; } Inner;\n\
             typedef struct { Inner in; short nums[2]; } Outer;",
        );

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.push(b'b');
        bytes.extend_from_slice(&7i16.to_le_bytes());
        bytes.extend_from_slice(&8i16.to_le_bytes());

        let view = conv.decode("Outer", &bytes, 0).unwrap();
        let rendered = view.to_string();

        assert!(rendered.starts_with("struct Outer {"));
        assert!(rendered.contains("a: 0xffffffff"));
        assert!(rendered.contains("b: 'b'"));
        assert!(rendered.contains("nums: [0x7, 0x8]"));
    }
}

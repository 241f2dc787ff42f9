//! Parser for a module's type-layout reflection section.
//!
//! The compiler emits one self-describing section per module. The format is
//! a flat little-endian record stream:
//!
//! ```text
//! section := magic:u32 ("DYSR") version:u16 record_count:u16 record*
//! record  := tag:u8 body
//! tag 0   := layout record
//!            name_len:u16 mangled_name kind:u8 flags:u8
//!            size:u32 stride:u32 align:u16 field_count:u16
//!            { name_len:u16 name offset:u32 } * field_count
//! tag 1   := metadata binding record
//!            metadata_address:u64 name_len:u16 mangled_name
//! ```
//!
//! Layout records carry the size/stride/alignment and field offsets of one
//! type; binding records associate a runtime metadata address with the
//! mangled name whose layout describes instances of that metadata. Parsing
//! is fully bounds checked; a malformed section is an error for the whole
//! section, never a partial index.

use crate::{
    reflection::layout::{FieldLayout, RecordKind, TypeLayout},
    Error, Result,
};

/// Expected magic at the start of a reflection section.
pub const REFLECTION_MAGIC: u32 = 0x5253_5944; // "DYSR" little endian

/// Highest section version this parser understands.
pub const REFLECTION_VERSION: u16 = 1;

/// Flag bit: values of this type can be moved with a byte copy.
const FLAG_BITWISE_TAKABLE: u8 = 0x01;

/// Everything one section declares.
#[derive(Debug, Default)]
pub struct ReflectionSection {
    /// (mangled name, layout) pairs in record order
    pub layouts: Vec<(String, TypeLayout)>,
    /// (metadata address, mangled name) pairs in record order
    pub bindings: Vec<(u64, String)>,
}

/// Cursor-based reader over a reflection section's bytes.
struct SectionCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SectionCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        SectionCursor { data, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(len).ok_or(Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_name(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Resolution("reflection record name is not UTF-8".into()))
    }
}

/// Parse one module's reflection section.
pub fn parse_section(data: &[u8]) -> Result<ReflectionSection> {
    let mut cursor = SectionCursor::new(data);

    let magic = cursor.read_u32()?;
    if magic != REFLECTION_MAGIC {
        return Err(Error::Resolution(format!(
            "bad reflection section magic {magic:#010x}"
        )));
    }
    let version = cursor.read_u16()?;
    if version > REFLECTION_VERSION {
        return Err(Error::Resolution(format!(
            "unsupported reflection section version {version}"
        )));
    }
    let record_count = cursor.read_u16()?;

    let mut section = ReflectionSection::default();
    for _ in 0..record_count {
        match cursor.read_u8()? {
            0 => {
                let name = cursor.read_name()?;
                let kind_tag = cursor.read_u8()?;
                let kind = RecordKind::from_tag(kind_tag).ok_or_else(|| {
                    Error::Resolution(format!("unknown layout record kind {kind_tag}"))
                })?;
                let flags = cursor.read_u8()?;
                let size = u64::from(cursor.read_u32()?);
                let stride = u64::from(cursor.read_u32()?);
                let alignment = u64::from(cursor.read_u16()?);
                let field_count = cursor.read_u16()?;

                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    let field_name = cursor.read_name()?;
                    let offset = u64::from(cursor.read_u32()?);
                    fields.push(FieldLayout {
                        name: field_name,
                        offset,
                    });
                }
                section.layouts.push((
                    name,
                    TypeLayout {
                        kind,
                        size,
                        stride,
                        alignment,
                        bitwise_takable: flags & FLAG_BITWISE_TAKABLE != 0,
                        fields,
                    },
                ));
            }
            1 => {
                let metadata_address = cursor.read_u64()?;
                let name = cursor.read_name()?;
                section.bindings.push((metadata_address, name));
            }
            tag => {
                return Err(Error::Resolution(format!(
                    "unknown reflection record tag {tag}"
                )))
            }
        }
    }
    Ok(section)
}

/// Serialize a section; test and fixture support for synthetic targets.
#[must_use]
pub fn build_section(layouts: &[(String, TypeLayout)], bindings: &[(u64, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&REFLECTION_MAGIC.to_le_bytes());
    out.extend_from_slice(&REFLECTION_VERSION.to_le_bytes());
    let count = u16::try_from(layouts.len() + bindings.len()).expect("section record count");
    out.extend_from_slice(&count.to_le_bytes());

    for (name, layout) in layouts {
        out.push(0);
        push_name(&mut out, name);
        out.push(match layout.kind {
            RecordKind::Tuple => 0,
            RecordKind::Struct => 1,
            RecordKind::ClassInstance => 2,
            RecordKind::Opaque => 3,
        });
        out.push(if layout.bitwise_takable { FLAG_BITWISE_TAKABLE } else { 0 });
        out.extend_from_slice(&(layout.size as u32).to_le_bytes());
        out.extend_from_slice(&(layout.stride as u32).to_le_bytes());
        out.extend_from_slice(&(layout.alignment as u16).to_le_bytes());
        out.extend_from_slice(&(layout.fields.len() as u16).to_le_bytes());
        for field in &layout.fields {
            push_name(&mut out, &field.name);
            out.extend_from_slice(&(field.offset as u32).to_le_bytes());
        }
    }
    for (address, name) in bindings {
        out.push(1);
        out.extend_from_slice(&address.to_le_bytes());
        push_name(&mut out, name);
    }
    out
}

fn push_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
}

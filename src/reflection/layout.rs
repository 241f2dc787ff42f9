//! Type layout descriptors recovered from reflection metadata.

/// Record category of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Tuple; fields are named by decimal index
    Tuple,
    /// Struct / record
    Struct,
    /// In-memory layout of a class instance
    ClassInstance,
    /// No record structure (scalars, opaque blobs)
    Opaque,
}

impl RecordKind {
    pub(crate) fn from_tag(tag: u8) -> Option<RecordKind> {
        match tag {
            0 => Some(RecordKind::Tuple),
            1 => Some(RecordKind::Struct),
            2 => Some(RecordKind::ClassInstance),
            3 => Some(RecordKind::Opaque),
            _ => None,
        }
    }
}

/// One field of a record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name; tuples use the decimal element index
    pub name: String,
    /// Byte offset from the start of the record
    pub offset: u64,
}

/// Size, stride, alignment, and fields of one type, as the target's
/// reflection metadata describes it. Pure binary-layout truth: no semantic
/// context is needed to produce or consume one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    /// Record category
    pub kind: RecordKind,
    /// Size in bytes
    pub size: u64,
    /// Stride in bytes (size rounded up to alignment)
    pub stride: u64,
    /// Alignment in bytes
    pub alignment: u64,
    /// Whether a value can be moved by a plain byte copy
    pub bitwise_takable: bool,
    /// Fields with byte offsets, for record-like layouts
    pub fields: Vec<FieldLayout>,
}

impl TypeLayout {
    /// Size in bits.
    #[must_use]
    pub fn bit_size(&self) -> u64 {
        self.size * 8
    }

    /// Alignment in bits.
    #[must_use]
    pub fn bit_alignment(&self) -> u64 {
        self.alignment * 8
    }

    /// Offset of the field with the given name.
    #[must_use]
    pub fn field_offset(&self, name: &str) -> Option<u64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.offset)
    }
}

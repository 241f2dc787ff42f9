//! ABI-level pointer knowledge: architecture enumeration, constant fixup
//! tables, and the pure functions that apply them.

mod arch;
mod fixup;

pub use arch::{Architecture, ByteOrder, CoreKind, PointerFixups, PointerWidth};
pub use fixup::{
    fixup_address, fixup_pointer_value, fixup_reference, is_tagged_pointer, mask_spare_bits,
    ReferenceStrategy,
};

//! Pull-based remote memory reader.
//!
//! [`MemoryReader`] is the single funnel through which every resolver touches
//! target memory: bounded byte reads, C string scans, pointer-sized words in
//! the target's byte order, and symbol-name resolution with an ambiguity
//! check. It also owns the "local buffer" override used for values that the
//! debugger has already materialized into host memory: while an override is
//! active, reads that fall entirely inside its range are copied from the host
//! buffer instead of being issued to the target.
//!
//! All reads are synchronous and uncancellable; the configured maximum read
//! size is the only backpressure against a hostile or corrupt target.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::{
    abi::{Architecture, ByteOrder},
    target::process::{SymbolCandidate, TargetProcess},
    Error, Result,
};

/// Default ceiling for a single remote read.
pub const DEFAULT_MAX_READ_SIZE: u64 = 16 * 1024 * 1024;

/// Maximum number of bytes scanned for a C string terminator.
pub const MAX_CSTRING_SCAN: u64 = 50 * 1024;

/// Host-memory override for a single target address range.
struct LocalBuffer {
    base: u64,
    bytes: Vec<u8>,
}

/// Reads bytes, strings, and pointer-sized words out of the target, and
/// resolves symbol names to addresses.
///
/// The reader is shared by every resolver a runtime owns; the local-buffer
/// override is interior state guarded by a mutex so that `&self` methods
/// suffice throughout.
pub struct MemoryReader {
    process: Arc<dyn TargetProcess>,
    max_read_size: u64,
    local_buffer: Mutex<Option<LocalBuffer>>,
}

impl MemoryReader {
    /// Create a reader over the given target with the default read ceiling.
    #[must_use]
    pub fn new(process: Arc<dyn TargetProcess>) -> Self {
        MemoryReader::with_max_read_size(process, DEFAULT_MAX_READ_SIZE)
    }

    /// Create a reader with an explicit read ceiling.
    #[must_use]
    pub fn with_max_read_size(process: Arc<dyn TargetProcess>, max_read_size: u64) -> Self {
        MemoryReader {
            process,
            max_read_size,
            local_buffer: Mutex::new(None),
        }
    }

    /// Architecture descriptor of the underlying target.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.process.architecture()
    }

    /// Pointer width of the target, in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> u64 {
        u64::from(self.process.architecture().pointer_bytes)
    }

    /// Access to the underlying target collaborator.
    #[must_use]
    pub fn process(&self) -> &Arc<dyn TargetProcess> {
        &self.process
    }

    /// Read exactly `len` bytes at `address`.
    ///
    /// Requests beyond the configured ceiling fail fast with
    /// [`Error::ReadTooLarge`]; a target that returns fewer bytes than asked
    /// for fails with [`Error::ShortRead`]. If a local-buffer override is
    /// active and the range falls entirely inside it, the bytes are copied
    /// from host memory without touching the target.
    pub fn read_bytes(&self, address: u64, len: u64) -> Result<Vec<u8>> {
        if len > self.max_read_size {
            debug!(address, len, "memory read exceeds maximum allowed size");
            return Err(Error::ReadTooLarge {
                requested: len,
                limit: self.max_read_size,
            });
        }
        let end = address.checked_add(len).ok_or(Error::OutOfBounds)?;

        if let Some(local) = self.local_buffer.lock().unwrap().as_ref() {
            let local_end = local.base + local.bytes.len() as u64;
            if address >= local.base && end <= local_end {
                // If this slice is wrong, the assumptions behind the
                // existential const-result path no longer hold.
                let start = (address - local.base) as usize;
                return Ok(local.bytes[start..start + len as usize].to_vec());
            }
        }

        trace!(address = format_args!("{address:#x}"), len, "remote read");

        let mut buf = vec![0u8; len as usize];
        let got = self
            .process
            .read_memory(address, &mut buf)
            .map_err(Error::TargetError)? as u64;
        if got < len {
            debug!(address, len, got, "memory read returned fewer bytes than asked for");
            return Err(Error::ShortRead {
                requested: len,
                got,
            });
        }
        Ok(buf)
    }

    /// Read one pointer-sized word at `address` in the target's byte order.
    pub fn read_pointer(&self, address: u64) -> Result<u64> {
        let size = self.pointer_size();
        let bytes = self.read_bytes(address, size)?;
        Ok(read_word(&bytes, self.process.architecture().byte_order))
    }

    /// Read a `u32` at `address` in the target's byte order.
    pub fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(read_word(&bytes, self.process.architecture().byte_order) as u32)
    }

    /// Read a NUL-terminated string at `address`.
    ///
    /// Scans in chunks up to [`MAX_CSTRING_SCAN`] bytes; an unterminated
    /// string within the limit is an error, not a truncation.
    pub fn read_c_string(&self, address: u64) -> Result<String> {
        const CHUNK: u64 = 256;

        let mut collected = Vec::new();
        let mut cursor = address;
        while collected.len() as u64 + CHUNK <= MAX_CSTRING_SCAN {
            let chunk = match self.read_bytes(cursor, CHUNK) {
                Ok(chunk) => chunk,
                // The scan window may run past the end of readable memory
                // while the terminator sits inside the readable part.
                Err(Error::ShortRead { got, .. }) if got > 0 => self.read_bytes(cursor, got)?,
                Err(err) => return Err(err),
            };
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                collected.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&collected).into_owned());
            }
            if (chunk.len() as u64) < CHUNK {
                return Err(Error::Resolution(format!(
                    "C string at {address:#x} runs past readable memory"
                )));
            }
            collected.extend_from_slice(&chunk);
            cursor = cursor.checked_add(CHUNK).ok_or(Error::OutOfBounds)?;
        }
        Err(Error::Resolution(format!(
            "C string at {address:#x} not terminated within {MAX_CSTRING_SCAN} bytes"
        )))
    }

    /// Resolve a symbol name to a single trustworthy address.
    ///
    /// Undefined candidates are filtered out first. A single survivor wins
    /// outright; when several definitions remain they must all agree on the
    /// pointer-sized value read from their respective addresses, otherwise
    /// resolution fails with [`Error::SymbolAmbiguous`].
    pub fn symbol_address(&self, name: &str) -> Result<u64> {
        debug_assert!(!name.is_empty());

        trace!(name, "asked to retrieve the address of symbol");

        let defined = self.defined_symbols(name);
        match defined.len() {
            0 => {
                debug!(name, "symbol resolution failed");
                Err(Error::SymbolNotFound(name.to_string()))
            }
            1 => {
                trace!(name, address = format_args!("{:#x}", defined[0]), "symbol resolved");
                Ok(defined[0])
            }
            _ => {
                // More than one definition: trust the address only if every
                // definition holds the same runtime value.
                let reference = self.read_pointer(defined[0])?;
                for &addr in &defined[1..] {
                    if self.read_pointer(addr)? != reference {
                        debug!(name, "symbol resolution failed: definitions disagree");
                        return Err(Error::SymbolAmbiguous(name.to_string()));
                    }
                }
                trace!(name, address = format_args!("{:#x}", defined[0]), "symbol resolved");
                Ok(defined[0])
            }
        }
    }

    /// All defined candidate addresses for a symbol, without the agreement
    /// check. The opaque-type resolver inspects each candidate separately.
    #[must_use]
    pub fn defined_symbols(&self, name: &str) -> Vec<u64> {
        self.process
            .symbols(name)
            .into_iter()
            .filter(SymbolCandidate::is_defined)
            .map(|c| c.address)
            .collect()
    }

    /// Register a host-memory override for `[base, base + bytes.len())`.
    ///
    /// At most one override may be active; this is a push/pop discipline, not
    /// a stack. Used for values the debugger materialized into its own
    /// memory, which must still be readable "as if" they lived in the target.
    pub fn push_local_buffer(&self, base: u64, bytes: Vec<u8>) -> Result<()> {
        let mut slot = self.local_buffer.lock().unwrap();
        if slot.is_some() {
            debug_assert!(false, "local buffer already active");
            return Err(Error::LocalBufferMisuse("push with an active override"));
        }
        *slot = Some(LocalBuffer { base, bytes });
        Ok(())
    }

    /// Release the active local-buffer override.
    pub fn pop_local_buffer(&self) -> Result<()> {
        let mut slot = self.local_buffer.lock().unwrap();
        if slot.is_none() {
            debug_assert!(false, "no local buffer active");
            return Err(Error::LocalBufferMisuse("pop without an active override"));
        }
        *slot = None;
        Ok(())
    }

    /// Run `f` with a local-buffer override active, releasing it on every
    /// exit path.
    pub fn with_local_buffer<T>(
        &self,
        base: u64,
        bytes: Vec<u8>,
        f: impl FnOnce(&MemoryReader) -> Result<T>,
    ) -> Result<T> {
        self.push_local_buffer(base, bytes)?;
        let result = f(self);
        self.pop_local_buffer()?;
        result
    }
}

impl SymbolCandidate {
    fn is_defined(&self) -> bool {
        self.defined
    }
}

/// Assemble an unsigned word from raw bytes in the given byte order.
fn read_word(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut value = 0u64;
    match order {
        ByteOrder::Little => {
            for &b in bytes.iter().rev() {
                value = (value << 8) | u64::from(b);
            }
        }
        ByteOrder::Big => {
            for &b in bytes {
                value = (value << 8) | u64::from(b);
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::CoreKind;
    use crate::target::process::FrameId;
    use std::collections::HashMap;

    struct FakeTarget {
        memory: HashMap<u64, Vec<u8>>,
        symbols: HashMap<String, Vec<SymbolCandidate>>,
    }

    impl FakeTarget {
        fn new() -> Self {
            FakeTarget {
                memory: HashMap::new(),
                symbols: HashMap::new(),
            }
        }

        fn map(mut self, address: u64, bytes: Vec<u8>) -> Self {
            self.memory.insert(address, bytes);
            self
        }
    }

    impl TargetProcess for FakeTarget {
        fn architecture(&self) -> Architecture {
            Architecture {
                core: CoreKind::X86_64,
                pointer_bytes: 8,
                byte_order: ByteOrder::Little,
                foreign_interop: false,
            }
        }

        fn read_memory(&self, address: u64, buf: &mut [u8]) -> std::result::Result<usize, String> {
            for (&base, bytes) in &self.memory {
                let end = base + bytes.len() as u64;
                if address >= base && address < end {
                    let start = (address - base) as usize;
                    let avail = bytes.len() - start;
                    let n = avail.min(buf.len());
                    buf[..n].copy_from_slice(&bytes[start..start + n]);
                    return Ok(n);
                }
            }
            Err(format!("unmapped address {address:#x}"))
        }

        fn symbols(&self, name: &str) -> Vec<SymbolCandidate> {
            self.symbols.get(name).cloned().unwrap_or_default()
        }

        fn frame_variable(&self, _frame: FrameId, _name: &str) -> Option<u64> {
            None
        }
    }

    #[test]
    fn read_bytes_roundtrip() {
        let target = FakeTarget::new().map(0x1000, vec![1, 2, 3, 4, 5]);
        let reader = MemoryReader::new(Arc::new(target));

        assert_eq!(reader.read_bytes(0x1000, 5).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.read_bytes(0x1002, 2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn read_too_large_fails_fast() {
        let target = FakeTarget::new().map(0x1000, vec![0; 64]);
        let reader = MemoryReader::with_max_read_size(Arc::new(target), 32);

        let err = reader.read_bytes(0x1000, 33).unwrap_err();
        assert!(matches!(err, Error::ReadTooLarge { requested: 33, limit: 32 }));
    }

    #[test]
    fn short_read_is_reported() {
        let target = FakeTarget::new().map(0x1000, vec![0xAA; 4]);
        let reader = MemoryReader::new(Arc::new(target));

        let err = reader.read_bytes(0x1000, 8).unwrap_err();
        assert!(matches!(err, Error::ShortRead { requested: 8, got: 4 }));
    }

    #[test]
    fn pointer_respects_byte_order() {
        let target = FakeTarget::new().map(0x2000, vec![0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]);
        let reader = MemoryReader::new(Arc::new(target));

        assert_eq!(reader.read_pointer(0x2000).unwrap(), 0x1234_5678);
    }

    #[test]
    fn c_string_scan() {
        let mut bytes = b"MangledName".to_vec();
        bytes.push(0);
        bytes.extend_from_slice(&[0xCC; 300]);
        let target = FakeTarget::new().map(0x3000, bytes);
        let reader = MemoryReader::new(Arc::new(target));

        assert_eq!(reader.read_c_string(0x3000).unwrap(), "MangledName");
    }

    #[test]
    fn c_string_at_the_edge_of_readable_memory() {
        // The terminated string fills the entire 4-byte region; the scan's
        // full chunk read comes back short and must not be fatal.
        let target = FakeTarget::new()
            .map(0x3000, b"abc\0".to_vec())
            .map(0x5000, b"xyz".to_vec());
        let reader = MemoryReader::new(Arc::new(target));

        assert_eq!(reader.read_c_string(0x3000).unwrap(), "abc");
        // No terminator anywhere in readable memory is still an error.
        assert!(reader.read_c_string(0x5000).is_err());
    }

    #[test]
    fn local_buffer_override_and_discipline() {
        let target = FakeTarget::new();
        let reader = MemoryReader::new(Arc::new(target));

        reader.push_local_buffer(0x8000, vec![9, 8, 7, 6]).unwrap();
        // Fully inside: host copy, no target read.
        assert_eq!(reader.read_bytes(0x8001, 2).unwrap(), vec![8, 7]);
        // Partially outside: falls through to the (unmapped) target.
        assert!(reader.read_bytes(0x8002, 8).is_err());

        assert!(matches!(
            reader.push_local_buffer(0x9000, vec![0]),
            Err(Error::LocalBufferMisuse(_))
        ));
        reader.pop_local_buffer().unwrap();
        assert!(matches!(
            reader.pop_local_buffer(),
            Err(Error::LocalBufferMisuse(_))
        ));
    }

    #[test]
    fn symbol_filtering_and_agreement() {
        let mut target = FakeTarget::new()
            .map(0x4000, 0x1111_2222_3333_4444u64.to_le_bytes().to_vec())
            .map(0x5000, 0x1111_2222_3333_4444u64.to_le_bytes().to_vec())
            .map(0x6000, 0xDEAD_BEEFu64.to_le_bytes().to_vec());
        target.symbols.insert(
            "agreeing".into(),
            vec![
                SymbolCandidate { address: 0x4000, defined: true },
                SymbolCandidate { address: 0x5000, defined: true },
                SymbolCandidate { address: 0x7000, defined: false },
            ],
        );
        target.symbols.insert(
            "disagreeing".into(),
            vec![
                SymbolCandidate { address: 0x4000, defined: true },
                SymbolCandidate { address: 0x6000, defined: true },
            ],
        );
        target.symbols.insert(
            "undefined_only".into(),
            vec![SymbolCandidate { address: 0x7000, defined: false }],
        );
        let reader = MemoryReader::new(Arc::new(target));

        assert_eq!(reader.symbol_address("agreeing").unwrap(), 0x4000);
        assert!(matches!(
            reader.symbol_address("disagreeing"),
            Err(Error::SymbolAmbiguous(_))
        ));
        assert!(matches!(
            reader.symbol_address("undefined_only"),
            Err(Error::SymbolNotFound(_))
        ));
        assert!(matches!(
            reader.symbol_address("missing"),
            Err(Error::SymbolNotFound(_))
        ));
    }
}

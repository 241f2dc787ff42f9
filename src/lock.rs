//! Access discipline for the shared scratch context.
//!
//! Resolution work takes the shared side, which always succeeds and can
//! overlap freely (the context's arena is append-only, so interning under
//! the shared side is sound). The exclusive side exists for one purpose:
//! the maintenance path that replaces a poisoned context wholesale. It is
//! strictly non-blocking; there is no way to wait for readers to drain, the
//! maintenance path polls [`ScratchCell::try_write`] and walks away when a
//! reader is live. Readers that outlive a replacement keep their snapshot
//! of the old context and finish against it.

use std::{
    ops::Deref,
    sync::{Arc, Mutex},
};

use tracing::trace;

use crate::types::ScratchContext;

struct CellState {
    current: Arc<ScratchContext>,
    readers: usize,
    writer: bool,
}

/// Holder of the current scratch context, mediating shared and exclusive
/// access.
pub struct ScratchCell {
    state: Mutex<CellState>,
}

impl ScratchCell {
    /// Create a cell around a fresh context.
    #[must_use]
    pub fn new() -> Self {
        ScratchCell::with_context(Arc::new(ScratchContext::new()))
    }

    /// Create a cell around an existing context.
    #[must_use]
    pub fn with_context(ctx: Arc<ScratchContext>) -> Self {
        ScratchCell {
            state: Mutex::new(CellState {
                current: ctx,
                readers: 0,
                writer: false,
            }),
        }
    }

    /// Take the shared side. Never blocks and never fails; the guard pins a
    /// snapshot of whichever context is current right now.
    #[must_use]
    pub fn read(&self) -> ScratchReader<'_> {
        let mut state = self.state.lock().unwrap();
        state.readers += 1;
        ScratchReader {
            cell: self,
            ctx: state.current.clone(),
        }
    }

    /// Try to take the exclusive side.
    ///
    /// Fails immediately when any reader or another writer is live. This is
    /// the only write entry point; nothing in the crate ever blocks waiting
    /// for the exclusive side.
    #[must_use]
    pub fn try_write(&self) -> Option<ScratchWriter<'_>> {
        let mut state = self.state.lock().unwrap();
        if state.readers > 0 || state.writer {
            trace!(readers = state.readers, "scratch context busy, writer backing off");
            return None;
        }
        state.writer = true;
        Some(ScratchWriter { cell: self })
    }

    /// Number of live shared guards.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.lock().unwrap().readers
    }

    /// A snapshot of the current context without taking a guard. For
    /// bookkeeping (cache keys, generation checks), not for resolution work.
    #[must_use]
    pub fn current(&self) -> Arc<ScratchContext> {
        self.state.lock().unwrap().current.clone()
    }
}

impl Default for ScratchCell {
    fn default() -> Self {
        ScratchCell::new()
    }
}

/// Shared guard over the scratch context.
///
/// Dereferences to the context it pinned at acquisition time, which stays
/// valid even if the cell is replaced underneath it.
pub struct ScratchReader<'a> {
    cell: &'a ScratchCell,
    ctx: Arc<ScratchContext>,
}

impl ScratchReader<'_> {
    /// The pinned context as a shareable handle.
    #[must_use]
    pub fn context(&self) -> &Arc<ScratchContext> {
        &self.ctx
    }
}

impl Deref for ScratchReader<'_> {
    type Target = ScratchContext;

    fn deref(&self) -> &ScratchContext {
        &self.ctx
    }
}

impl Drop for ScratchReader<'_> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock().unwrap();
        state.readers -= 1;
    }
}

/// Exclusive guard; the holder may replace the context wholesale.
pub struct ScratchWriter<'a> {
    cell: &'a ScratchCell,
}

impl ScratchWriter<'_> {
    /// Swap in a replacement context, returning the one it displaces.
    pub fn replace(&mut self, ctx: Arc<ScratchContext>) -> Arc<ScratchContext> {
        let mut state = self.cell.state.lock().unwrap();
        std::mem::replace(&mut state.current, ctx)
    }

    /// The context currently held by the cell.
    #[must_use]
    pub fn current(&self) -> Arc<ScratchContext> {
        self.cell.state.lock().unwrap().current.clone()
    }
}

impl Drop for ScratchWriter<'_> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock().unwrap();
        state.writer = false;
    }
}

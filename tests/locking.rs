//! Scratch lock contention scenarios.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

use dynscope::prelude::*;

#[test]
fn writer_polls_until_all_shared_holders_release() {
    const HOLDERS: usize = 8;

    let cell = Arc::new(ScratchCell::new());
    let barrier = Arc::new(Barrier::new(HOLDERS + 1));
    let live = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..HOLDERS {
        let cell = cell.clone();
        let barrier = barrier.clone();
        let live = live.clone();
        handles.push(thread::spawn(move || {
            let guard = cell.read();
            live.fetch_add(1, Ordering::SeqCst);
            barrier.wait();
            // Hold the shared side long enough for the writer to observe
            // contention at least once.
            thread::sleep(Duration::from_millis(20));
            live.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        }));
    }

    barrier.wait();
    // All holders are live: the exclusive side must refuse immediately.
    assert!(cell.try_write().is_none());

    // Poll the way the maintenance path does.
    let mut attempts = 0usize;
    let writer = loop {
        if let Some(writer) = cell.try_write() {
            break writer;
        }
        attempts += 1;
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(attempts > 0);
    drop(writer);

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn context_replacement_under_concurrent_readers() {
    let cell = Arc::new(ScratchCell::new());
    let old_generation = cell.current().generation();

    // A reader pins the old context across the replacement.
    let pinned = cell.read();
    assert_eq!(pinned.generation(), old_generation);

    let replaced = {
        let cell_for_thread = cell.clone();
        thread::spawn(move || {
            // Cannot replace while the reader is live.
            assert!(cell_for_thread.try_write().is_none());
        })
        .join()
        .unwrap();
        drop(pinned);

        let mut writer = cell.try_write().expect("no readers remain");
        writer.replace(Arc::new(ScratchContext::new()))
    };
    assert_eq!(replaced.generation(), old_generation);
    assert_ne!(cell.current().generation(), old_generation);
}

#[test]
fn shared_side_never_blocks_under_writer_polling() {
    let cell = Arc::new(ScratchCell::new());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cell = cell.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let guard = cell.read();
                let _ = guard.generation();
            }
        }));
    }
    for _ in 0..100 {
        // The writer may or may not get a slot; it must never block.
        if let Some(writer) = cell.try_write() {
            drop(writer);
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cell.reader_count(), 0);
}

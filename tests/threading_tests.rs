//! Thread Model Tests
//!
//! Tests for:
//! - Calls routed to the render thread run there, in order
//! - Frame pre/post-draw listeners and one-shot frame callbacks
//! - Writes from the caller are visible after sync

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::{server, threaded_server};
use parking_lot::Mutex;
use vesper::prelude::*;

// ============================================================================
// Render thread
// ============================================================================

#[test]
fn caller_is_not_the_render_thread() {
    let server = threaded_server();
    assert!(!server.is_on_render_thread());

    let single = common::server();
    assert!(single.is_on_render_thread());
}

#[test]
fn calls_run_on_render_thread_in_order() {
    let server = threaded_server();
    let log = Arc::new(Mutex::new(Vec::new()));
    let caller = thread::current().id();

    for i in 0..10 {
        let log = log.clone();
        server.call_on_render_thread(move || log.lock().push((i, thread::current().id())));
    }
    server.sync();

    let log = log.lock();
    assert_eq!(log.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    assert!(log.iter().all(|(_, id)| *id != caller));
}

#[test]
fn full_queue_blocks_instead_of_dropping() {
    // Capacity is 64; submit well past it.
    let server = threaded_server();
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..500 {
        let count = count.clone();
        server.call_on_render_thread(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }
    server.sync();
    assert_eq!(count.load(Ordering::SeqCst), 500);
}

// ============================================================================
// Frame signals
// ============================================================================

#[test]
fn frame_listeners_fire_every_frame() {
    let server = server();
    let pre = Arc::new(AtomicUsize::new(0));
    let post = Arc::new(AtomicUsize::new(0));
    {
        let pre = pre.clone();
        server.connect_frame_pre_draw(move || {
            pre.fetch_add(1, Ordering::SeqCst);
        });
        let post = post.clone();
        server.connect_frame_post_draw(move || {
            post.fetch_add(1, Ordering::SeqCst);
        });
    }
    for _ in 0..3 {
        server.force_draw(true, 1.0 / 60.0);
    }
    assert_eq!(pre.load(Ordering::SeqCst), 3);
    assert_eq!(post.load(Ordering::SeqCst), 3);
}

#[test]
fn frame_drawn_callback_fires_once() {
    let server = threaded_server();
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        server.request_frame_drawn_callback(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    server.force_draw(true, 1.0 / 60.0);
    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Shared state
// ============================================================================

#[test]
fn threaded_writes_are_visible_after_sync() {
    let server = threaded_server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 4, MultimeshTransformFormat::Transform2D, false, false);
    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(server.multimesh_get_buffer(mm).len(), 32);
    assert_eq!(server.get_frames_drawn(), 1);
}

#[test]
fn server_is_shareable_across_threads() {
    let server = Arc::new(threaded_server());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let server = server.clone();
            thread::spawn(move || server.material_create())
        })
        .collect();
    let mut rids: Vec<Rid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    rids.sort();
    rids.dedup();
    assert_eq!(rids.len(), 4);
    assert_eq!(server.debug_live_handles(RidKind::Material).len(), 4);
}

//! Tests for OwnedBuffer ownership and capacity semantics

use firefuse_structures::{BufferError, FreshnessCache, OwnedBuffer};
use std::thread;

#[test]
fn test_clones_then_partial_drop_keeps_buffer_readable() {
    let original = OwnedBuffer::create_owned(b"frame-bytes", 64).unwrap();
    let weak = original.downgrade();
    let clones: Vec<OwnedBuffer> = (0..8).map(|_| original.clone()).collect();
    assert_eq!(original.ref_count(), 9);

    drop(original);
    let mut clones = clones;
    let survivor = clones.pop().unwrap();
    drop(clones);

    assert!(weak.is_live());
    assert_eq!(survivor.ref_count(), 1);
    assert_eq!(&*survivor.data(), b"frame-bytes");

    drop(survivor);
    assert!(!weak.is_live(), "allocation must be released with the last owner");
}

#[test]
fn test_buffer_shared_across_threads_through_cache() {
    let cache = FreshnessCache::new();
    let frame = OwnedBuffer::adopt(vec![7u8; 1024]);
    let weak = frame.downgrade();
    cache.post(frame);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let view = cache.peek();
            thread::spawn(move || view.data().iter().map(|b| *b as usize).sum::<usize>())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 7 * 1024);
    }

    assert!(weak.is_live());
    cache.post(OwnedBuffer::empty());
    cache.get();
    assert!(!weak.is_live());
}

#[test]
fn test_reuse_for_smaller_and_larger_frames() {
    let buffer = OwnedBuffer::with_capacity(16);
    buffer.write_at(0, b"0123456789").unwrap();
    buffer.set_length(0).unwrap();
    buffer.write_at(0, b"abc").unwrap();
    assert_eq!(&*buffer.data(), b"abc");
    assert_eq!(buffer.capacity(), 16);

    let err = buffer.write_at(0, &[0u8; 17]).unwrap_err();
    assert_eq!(
        err,
        BufferError::Oversized {
            requested: 17,
            capacity: 16
        }
    );
    assert_eq!(&*buffer.data(), b"abc");
}

//! Tests for the FreshnessCache module
//!
//! Tests cover:
//! - Counting laws between posts and consuming reads
//! - Most-recent-wins overwrite
//! - Concurrent consumers always receive fully formed values

use firefuse_structures::{FreshnessCache, OwnedBuffer};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(test)]
mod test_counting_laws {
    use super::*;

    /// Small deterministic generator so the operation mix is reproducible.
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *seed >> 33
    }

    #[test]
    fn test_changed_reads_never_exceed_posts() {
        let cache: FreshnessCache<u64> = FreshnessCache::new();
        let mut seed = 0xF1EEu64;
        let mut posts = 0u64;
        let mut changed_reads = 0u64;
        let mut last_seen = 0u64;

        for step in 1..=5_000u64 {
            match lcg(&mut seed) % 3 {
                0 => {
                    cache.post(step);
                    posts += 1;
                }
                1 => {
                    let value = cache.get();
                    if value != last_seen {
                        changed_reads += 1;
                        last_seen = value;
                    }
                    assert!(!cache.is_fresh(), "get must leave the cache stale");
                }
                _ => {
                    let before = cache.is_fresh();
                    let first = cache.peek();
                    let second = cache.peek();
                    assert_eq!(first, second);
                    assert_eq!(before, cache.is_fresh());
                }
            }
            assert!(changed_reads <= posts);
        }
    }

    #[test]
    fn test_first_of_two_posts_is_unobservable() {
        let cache = FreshnessCache::with_value(String::from("initial"));
        assert_eq!(cache.get(), "initial");
        cache.post(String::from("orphan"));
        cache.post(String::from("winner"));
        assert_eq!(cache.peek(), "winner");
        assert_eq!(cache.get(), "winner");
        assert_eq!(cache.get(), "winner");
    }
}

#[cfg(test)]
mod test_concurrency {
    use super::*;

    #[test]
    fn test_consumers_see_whole_buffers() {
        let cache = Arc::new(FreshnessCache::with_value(OwnedBuffer::from("aaaa")));
        let producer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..500u32 {
                    let fill = if i % 2 == 0 { "bbbb" } else { "cccc" };
                    cache.post(OwnedBuffer::from(fill));
                }
            })
        };
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let buffer = cache.get();
                        let bytes = buffer.to_vec();
                        assert_eq!(bytes.len(), 4);
                        assert!(bytes.iter().all(|b| *b == bytes[0]));
                    }
                })
            })
            .collect();
        producer.join().unwrap();
        for consumer in consumers {
            consumer.join().unwrap();
        }
    }

    #[test]
    fn test_post_wakes_a_blocked_reader() {
        let cache = Arc::new(FreshnessCache::with_value(0u32));
        let reader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_blocking(None))
        };
        // Keep posting until the reader has registered and been released
        let mut next = 1;
        while !reader.is_finished() {
            cache.post(next);
            next += 1;
            thread::sleep(Duration::from_millis(5));
        }
        let value = reader.join().unwrap();
        assert!(value >= 1);
    }
}

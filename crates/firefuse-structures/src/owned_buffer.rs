use crate::error::BufferError;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::{Arc, Weak};

/// Backing allocation. `bytes.len()` is the allocated capacity and never changes
/// after construction; `length` is how much of it is readable.
#[derive(Default)]
struct Storage {
    bytes: Vec<u8>,
    length: usize,
}

/// A shared, reference-counted heap byte buffer.
///
/// Cloning an `OwnedBuffer` shares the allocation; the allocation is released when the last
/// handle is dropped. The logical `length` may move anywhere within `capacity` without
/// reallocating, which lets a writer reuse a buffer sized for the largest expected frame.
///
/// All handles observe mutations made through any of them. A producer that posts a buffer
/// to a [`crate::FreshnessCache`] must stop mutating it and start from a fresh buffer.
///
/// # Examples
/// ```
/// use firefuse_structures::OwnedBuffer;
///
/// let frame = OwnedBuffer::create_owned(b"jpeg", 64).unwrap();
/// let shared = frame.clone();
/// assert_eq!(shared.ref_count(), 2);
/// assert_eq!(&*shared.data(), b"jpeg");
/// assert_eq!(shared.capacity(), 64);
/// ```
#[derive(Clone, Default)]
pub struct OwnedBuffer {
    inner: Arc<RwLock<Storage>>,
}

/// Non-owning handle used to observe when the last [`OwnedBuffer`] owner is gone.
#[derive(Clone)]
pub struct WeakBuffer {
    inner: Weak<RwLock<Storage>>,
}

impl WeakBuffer {
    /// True while at least one owner still holds the allocation.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl OwnedBuffer {
    //region Constructors

    /// An empty buffer with no capacity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copies `data` into a fresh allocation of `capacity` bytes. The logical length is
    /// `data.len()`; the spare capacity allows later in-place growth.
    pub fn create_owned(data: &[u8], capacity: usize) -> Result<Self, BufferError> {
        if data.len() > capacity {
            return Err(BufferError::Oversized {
                requested: data.len(),
                capacity,
            });
        }
        let mut bytes = vec![0u8; capacity];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self::from_storage(Storage {
            bytes,
            length: data.len(),
        }))
    }

    /// Copies `data` into an allocation of exactly its size.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_storage(Storage {
            bytes: data.to_vec(),
            length: data.len(),
        })
    }

    /// Zero-filled allocation of `capacity` bytes with logical length 0.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(Storage {
            bytes: vec![0u8; capacity],
            length: 0,
        })
    }

    /// Takes ownership of caller memory without copying. Length and capacity are both
    /// `bytes.len()`.
    pub fn adopt(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::from_storage(Storage { bytes, length })
    }

    fn from_storage(storage: Storage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    //endregion

    //region Accessors

    /// Readable bytes, `[0, length)`.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.inner.read(), |s| &s.bytes[..s.length])
    }

    pub fn length(&self) -> usize {
        self.inner.read().length
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Copy of the readable bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// Up to `size` readable bytes starting at `offset`. Reading past the end yields fewer
    /// (possibly zero) bytes.
    pub fn read_at(&self, offset: usize, size: usize) -> Vec<u8> {
        let data = self.data();
        if offset >= data.len() {
            return Vec::new();
        }
        let end = offset.saturating_add(size).min(data.len());
        data[offset..end].to_vec()
    }

    /// Number of live handles sharing this allocation.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True when both handles share one allocation.
    pub fn ptr_eq(&self, other: &OwnedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    //endregion

    //region Mutation

    /// Moves the logical length within capacity. Never reallocates and never touches the
    /// bytes themselves.
    pub fn set_length(&self, length: usize) -> Result<(), BufferError> {
        let mut storage = self.inner.write();
        let capacity = storage.bytes.len();
        if length > capacity {
            return Err(BufferError::BadLength { length, capacity });
        }
        storage.length = length;
        Ok(())
    }

    /// Like [`Self::set_length`], but bytes exposed by growing are zeroed.
    pub fn truncate(&self, length: usize) -> Result<(), BufferError> {
        let mut storage = self.inner.write();
        let capacity = storage.bytes.len();
        if length > capacity {
            return Err(BufferError::BadLength { length, capacity });
        }
        let old = storage.length;
        if length > old {
            storage.bytes[old..length].fill(0);
        }
        storage.length = length;
        Ok(())
    }

    /// Writes `data` at `offset`, extending the logical length if the write ends past it.
    ///
    /// Writes that would end beyond capacity are rejected and leave the buffer untouched.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<usize, BufferError> {
        let mut storage = self.inner.write();
        let capacity = storage.bytes.len();
        let end = offset.checked_add(data.len()).unwrap_or(usize::MAX);
        if end > capacity {
            return Err(BufferError::Oversized {
                requested: end,
                capacity,
            });
        }
        storage.bytes[offset..end].copy_from_slice(data);
        if end > storage.length {
            storage.length = end;
        }
        Ok(data.len())
    }

    //endregion
}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.inner.read();
        f.debug_struct("OwnedBuffer")
            .field("length", &storage.length)
            .field("capacity", &storage.bytes.len())
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

impl From<Vec<u8>> for OwnedBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        OwnedBuffer::adopt(bytes)
    }
}

impl From<&[u8]> for OwnedBuffer {
    fn from(bytes: &[u8]) -> Self {
        OwnedBuffer::from_slice(bytes)
    }
}

impl From<&str> for OwnedBuffer {
    fn from(text: &str) -> Self {
        OwnedBuffer::from_slice(text.as_bytes())
    }
}

impl From<String> for OwnedBuffer {
    fn from(text: String) -> Self {
        OwnedBuffer::adopt(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_owned_over_allocates() {
        let buffer = OwnedBuffer::create_owned(b"abc", 10).unwrap();
        assert_eq!(buffer.length(), 3);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(&*buffer.data(), b"abc");
    }

    #[test]
    fn test_create_owned_rejects_small_capacity() {
        let result = OwnedBuffer::create_owned(b"abcdef", 2);
        assert_eq!(
            result.unwrap_err(),
            BufferError::Oversized {
                requested: 6,
                capacity: 2
            }
        );
    }

    #[test]
    fn test_adopt_keeps_bytes() {
        let buffer = OwnedBuffer::adopt(vec![1, 2, 3]);
        assert_eq!(buffer.length(), 3);
        assert_eq!(buffer.capacity(), 3);
        assert_eq!(buffer.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_set_length_stays_in_allocation() {
        let buffer = OwnedBuffer::create_owned(b"hello world", 32).unwrap();
        buffer.set_length(5).unwrap();
        assert_eq!(&*buffer.data(), b"hello");
        buffer.set_length(11).unwrap();
        assert_eq!(&*buffer.data(), b"hello world");
        assert_eq!(buffer.capacity(), 32);
        assert!(buffer.set_length(33).is_err());
        assert_eq!(buffer.length(), 11);
    }

    #[test]
    fn test_truncate_zero_fills_growth() {
        let buffer = OwnedBuffer::create_owned(b"abcd", 8).unwrap();
        buffer.truncate(2).unwrap();
        buffer.truncate(4).unwrap();
        assert_eq!(&*buffer.data(), &[b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_write_beyond_capacity_is_rejected() {
        let buffer = OwnedBuffer::create_owned(b"keep", 6).unwrap();
        let err = buffer.write_at(4, b"xyz").unwrap_err();
        assert_eq!(
            err,
            BufferError::Oversized {
                requested: 7,
                capacity: 6
            }
        );
        assert_eq!(&*buffer.data(), b"keep");
    }

    #[test]
    fn test_write_extends_length() {
        let buffer = OwnedBuffer::with_capacity(8);
        assert_eq!(buffer.write_at(0, b"ab").unwrap(), 2);
        assert_eq!(buffer.write_at(2, b"cd").unwrap(), 2);
        assert_eq!(&*buffer.data(), b"abcd");
        buffer.write_at(0, b"X").unwrap();
        assert_eq!(&*buffer.data(), b"Xbcd");
    }

    #[test]
    fn test_read_at_clamps() {
        let buffer = OwnedBuffer::from("0123456789");
        assert_eq!(buffer.read_at(8, 10), b"89".to_vec());
        assert!(buffer.read_at(10, 1).is_empty());
        assert!(buffer.read_at(usize::MAX, usize::MAX).is_empty());
    }

    #[test]
    fn test_clones_share_allocation() {
        let a = OwnedBuffer::create_owned(b"abc", 8).unwrap();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        b.write_at(0, b"z").unwrap();
        assert_eq!(&*a.data(), b"zbc");
    }
}

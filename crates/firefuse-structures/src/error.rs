use thiserror::Error;

/// Errors raised by [`crate::OwnedBuffer`] mutation.
///
/// A rejected operation never modifies the buffer.
///
/// # Examples
/// ```
/// use firefuse_structures::{BufferError, OwnedBuffer};
///
/// let buffer = OwnedBuffer::with_capacity(4);
/// let err = buffer.write_at(2, b"abc").unwrap_err();
/// assert!(matches!(err, BufferError::Oversized { .. }));
/// assert_eq!(buffer.length(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Write or resize would go past the allocated capacity
    #[error("Oversized: {requested} bytes requested, capacity is {capacity}")]
    Oversized { requested: usize, capacity: usize },

    /// Logical length must stay within capacity
    #[error("Bad length: {length} exceeds capacity {capacity}")]
    BadLength { length: usize, capacity: usize },
}

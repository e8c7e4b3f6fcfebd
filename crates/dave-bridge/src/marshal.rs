//! Host buffer marshaling.
//!
//! Host buffers are [`Bytes`]. Going native copies the bytes into an owned
//! vector so the engine never aliases host memory; coming back hands the
//! vector to the host without copying. Both directions preserve length and
//! content exactly, including empty buffers.
//!
//! Allocation failure aborts the process; nothing here returns an error.

use bytes::Bytes;

/// Largest media frame the adapters are exercised with.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Copies a host buffer into native memory.
pub fn to_native(buffer: impl AsRef<[u8]>) -> Vec<u8> {
    buffer.as_ref().to_vec()
}

/// Moves native bytes to the host.
pub fn to_host(bytes: Vec<u8>) -> Bytes {
    Bytes::from(bytes)
}

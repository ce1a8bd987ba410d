//! The unit of transfer between dataset backends, the caching engines, and
//! the processing algorithm.
//!
//! A [`Packet`] is an immutable binary blob: a contiguous byte payload plus
//! enough shape metadata to describe an image frame (width, height, channel
//! count, element size). Packets are produced once and never mutated;
//! cloning one is cheap because the payload is shared, not copied.
//!
//! An **empty packet** (zero-length payload) is the in-band signal for
//! "past the end of the stream" or "no data at this index". Engines never
//! cache empty packets; they propagate them to the consumer verbatim.

use anyhow::{ensure, Result};
use std::fmt;
use std::sync::Arc;

/// Shape metadata describing the layout of a packet's payload.
///
/// For image frames all four fields are meaningful; opaque blobs use the
/// degenerate shape `{len, 1, 1, 1}` produced by [`Packet::from_vec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketShape {
    /// Pixels per row.
    pub width: usize,
    /// Rows per frame.
    pub height: usize,
    /// Interleaved channels per pixel.
    pub channels: usize,
    /// Bytes per channel element (1 for 8-bit data, 2 for 16-bit, ...).
    pub elem_size: usize,
}

impl PacketShape {
    pub fn new(width: usize, height: usize, channels: usize, elem_size: usize) -> Self {
        Self {
            width,
            height,
            channels,
            elem_size,
        }
    }

    /// Total payload length implied by this shape, in bytes.
    pub fn byte_len(&self) -> usize {
        self.width * self.height * self.channels * self.elem_size
    }

    /// Bytes per pixel (all channels of one element).
    pub fn pixel_size(&self) -> usize {
        self.channels * self.elem_size
    }
}

/// One indexed binary artefact: a frame, a still image, a ground-truth
/// mask, or a result headed for the archive.
///
/// The payload is shared between clones, so handing a packet across a
/// thread boundary or keeping it past the next fetch never copies bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Arc<[u8]>,
    shape: PacketShape,
}

impl Packet {
    /// The empty packet: zero bytes, zero shape. Signals end-of-stream.
    pub fn empty() -> Self {
        Self {
            payload: Arc::from(Vec::new()),
            shape: PacketShape::new(0, 0, 0, 0),
        }
    }

    /// Wraps an opaque byte blob with the degenerate single-row shape.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let shape = PacketShape::new(bytes.len(), 1, 1, 1);
        Self {
            payload: Arc::from(bytes),
            shape,
        }
    }

    /// Wraps image bytes, validating the payload length against the shape.
    pub fn image(bytes: Vec<u8>, shape: PacketShape) -> Result<Self> {
        ensure!(
            bytes.len() == shape.byte_len(),
            "payload is {} bytes but shape {}x{}x{} ({}B elems) implies {}",
            bytes.len(),
            shape.width,
            shape.height,
            shape.channels,
            shape.elem_size,
            shape.byte_len()
        );
        Ok(Self {
            payload: Arc::from(bytes),
            shape,
        })
    }

    /// Rebinds existing payload bytes to a new shape of the same length.
    ///
    /// Used by transforms whose output is a pure re-indexing of the input
    /// (e.g. transpose produces a fresh buffer but pad/resize change the
    /// length and go through [`Packet::image`]).
    pub(crate) fn from_shared(payload: Arc<[u8]>, shape: PacketShape) -> Self {
        debug_assert_eq!(payload.len(), shape.byte_len());
        Self { payload, shape }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn shape(&self) -> PacketShape {
        self.shape
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("shape", &self.shape)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_packet_signals_end_of_stream() {
        let p = Packet::empty();
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
        assert_eq!(p.shape().byte_len(), 0);
    }

    #[test]
    fn blob_shape_is_degenerate() {
        let p = Packet::from_vec(vec![7u8; 12]);
        assert_eq!(p.len(), 12);
        assert_eq!(p.shape(), PacketShape::new(12, 1, 1, 1));
    }

    #[test]
    fn image_rejects_length_mismatch() {
        let shape = PacketShape::new(4, 4, 3, 1);
        assert!(Packet::image(vec![0u8; 10], shape).is_err());
        assert!(Packet::image(vec![0u8; 48], shape).is_ok());
    }

    #[test]
    fn clone_shares_payload() {
        let p = Packet::from_vec(vec![1, 2, 3]);
        let q = p.clone();
        assert_eq!(p, q);
        assert!(std::ptr::eq(p.bytes().as_ptr(), q.bytes().as_ptr()));
    }
}

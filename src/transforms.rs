//! Geometric normalisation transforms for image packets.
//!
//! All three transforms operate directly on the shaped byte payload, so
//! they work for any `channels x elem_size` combination (8-bit colour
//! frames, 16-bit masks, ...). Each validates the input payload against
//! its shape before touching it.

use crate::packet::{Packet, PacketShape};
use anyhow::{ensure, Result};

/// A stateless packet-to-packet operation.
pub trait Transform: Send + Sync {
    /// Applies the transformation to the input packet.
    fn apply(&self, input: Packet) -> Result<Packet>;
}

fn ensure_consistent(packet: &Packet) -> Result<PacketShape> {
    let shape = packet.shape();
    ensure!(
        packet.len() == shape.byte_len(),
        "packet payload ({} bytes) does not match its shape ({} bytes)",
        packet.len(),
        shape.byte_len()
    );
    ensure!(
        shape.pixel_size() > 0,
        "image transform applied to a packet without pixel layout"
    );
    Ok(shape)
}

// ============================================================================
// Transpose
// ============================================================================

/// Swaps the row and column axes of an image packet.
#[derive(Debug, Clone)]
pub struct Transpose;

impl Transform for Transpose {
    fn apply(&self, input: Packet) -> Result<Packet> {
        let shape = ensure_consistent(&input)?;
        let px = shape.pixel_size();
        let src = input.bytes();
        let mut out = vec![0u8; src.len()];
        // Output row `oy` is input column `oy`; output column `ox` is
        // input row `ox`. The output is `height x width`.
        for oy in 0..shape.width {
            for ox in 0..shape.height {
                let src_at = (ox * shape.width + oy) * px;
                let dst_at = (oy * shape.height + ox) * px;
                out[dst_at..dst_at + px].copy_from_slice(&src[src_at..src_at + px]);
            }
        }
        Packet::image(
            out,
            PacketShape::new(shape.height, shape.width, shape.channels, shape.elem_size),
        )
    }
}

// ============================================================================
// PadToFourChannels
// ============================================================================

/// Pads 3-channel pixels to 4 channels so rows are 4-byte aligned for
/// 8-bit data. The added channel is filled with the element's maximum
/// value, matching an opaque alpha plane.
#[derive(Debug, Clone)]
pub struct PadToFourChannels;

impl Transform for PadToFourChannels {
    fn apply(&self, input: Packet) -> Result<Packet> {
        let shape = ensure_consistent(&input)?;
        ensure!(
            shape.channels == 3,
            "channel padding expects 3-channel input, got {}",
            shape.channels
        );
        let e = shape.elem_size;
        let src_px = shape.pixel_size();
        let dst_px = 4 * e;
        let pixels = shape.width * shape.height;
        let src = input.bytes();
        let mut out = vec![0u8; pixels * dst_px];
        for p in 0..pixels {
            let s = p * src_px;
            let d = p * dst_px;
            out[d..d + src_px].copy_from_slice(&src[s..s + src_px]);
            out[d + src_px..d + dst_px].fill(u8::MAX);
        }
        Packet::image(
            out,
            PacketShape::new(shape.width, shape.height, 4, shape.elem_size),
        )
    }
}

// ============================================================================
// ResizeNearest
// ============================================================================

/// Resamples an image packet to a fixed size with nearest-neighbour
/// interpolation.
#[derive(Debug, Clone)]
pub struct ResizeNearest {
    width: usize,
    height: usize,
}

impl ResizeNearest {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        ensure!(
            width > 0 && height > 0,
            "target dimensions must be positive (got {}x{})",
            width,
            height
        );
        Ok(Self { width, height })
    }
}

impl Transform for ResizeNearest {
    fn apply(&self, input: Packet) -> Result<Packet> {
        let shape = ensure_consistent(&input)?;
        ensure!(
            shape.width > 0 && shape.height > 0,
            "cannot resize an empty image"
        );
        if (shape.width, shape.height) == (self.width, self.height) {
            return Ok(input);
        }
        let px = shape.pixel_size();
        let src = input.bytes();
        let mut out = vec![0u8; self.width * self.height * px];
        for y in 0..self.height {
            let sy = y * shape.height / self.height;
            let src_row = sy * shape.width * px;
            let dst_row = y * self.width * px;
            for x in 0..self.width {
                let sx = x * shape.width / self.width;
                let s = src_row + sx * px;
                let d = dst_row + x * px;
                out[d..d + px].copy_from_slice(&src[s..s + px]);
            }
        }
        Packet::image(
            out,
            PacketShape::new(self.width, self.height, shape.channels, shape.elem_size),
        )
    }
}

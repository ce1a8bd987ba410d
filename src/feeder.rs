//! Per-batch loader facade pairing an input precacher with a ground-truth
//! precacher.
//!
//! The facade owns the geometric normalisation of image packets: axis
//! transpose, 3-to-4 channel padding when the consumer wants 4-byte-aligned
//! rows, and nearest-neighbour resampling to the declared per-index size.
//! Normalisation runs inside the loader callbacks handed to each
//! precacher, so cached bytes are already in their final shape and are
//! never re-processed on a cache hit.

use crate::packet::Packet;
use crate::precacher::DataPrecacher;
use crate::transforms::{PadToFourChannels, ResizeNearest, Transform, Transpose};
use anyhow::Result;

/// Declared geometry for one packet index.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketLayout {
    /// The stored packet has its axes swapped and must be transposed back.
    pub transposed: bool,
    /// Expected `(width, height)` after normalisation; `None` accepts the
    /// packet at whatever size it was loaded.
    pub size: Option<(usize, usize)>,
}

/// Dataset-backend contract for one packet stream.
///
/// Implementations must be deterministic: `fetch(i)` yields the same bytes
/// for a given `i` every time, and the layout of a loaded packet must be
/// consistent with its shape metadata (violations are treated as hard
/// contract failures, not recoverable errors).
pub trait PacketSource: Send + 'static {
    /// Total number of packets in the stream.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads the raw packet at `idx`. An empty packet signals absence.
    fn fetch(&mut self, idx: u64) -> Packet;

    /// Declared geometry for the packet at `idx`.
    fn layout(&self, idx: u64) -> PacketLayout {
        let _ = idx;
        PacketLayout::default()
    }
}

/// Streams normalised input and ground-truth packets to the algorithm.
pub struct DataFeeder {
    input: DataPrecacher,
    gt: Option<DataPrecacher>,
}

impl DataFeeder {
    /// Builds a feeder over an input source and an optional ground-truth
    /// source. With `four_byte_aligned`, 3-channel image packets are
    /// padded to 4 channels during normalisation.
    pub fn new(
        input: Box<dyn PacketSource>,
        gt: Option<Box<dyn PacketSource>>,
        four_byte_aligned: bool,
    ) -> Self {
        Self {
            input: DataPrecacher::new(normalising_loader(input, four_byte_aligned)),
            gt: gt.map(|source| DataPrecacher::new(normalising_loader(source, four_byte_aligned))),
        }
    }

    /// Starts asynchronous precaching on both streams with `buffer_bytes`
    /// of scratch each.
    pub fn start(&mut self, buffer_bytes: usize) -> Result<()> {
        tracing::debug!(buffer_bytes, "starting data feeder");
        self.input.start(buffer_bytes)?;
        if let Some(gt) = &mut self.gt {
            gt.start(buffer_bytes)?;
        }
        Ok(())
    }

    /// Stops both precachers and clears their buffers.
    pub fn stop(&mut self) -> Result<()> {
        self.input.stop()?;
        if let Some(gt) = &mut self.gt {
            gt.stop()?;
        }
        Ok(())
    }

    /// Fetches the normalised input packet at `idx`.
    pub fn get_input(&mut self, idx: u64) -> Result<Packet> {
        self.input.get_packet(idx)
    }

    /// Fetches the normalised ground-truth packet at `idx`; empty when the
    /// feeder has no ground-truth source.
    pub fn get_gt(&mut self, idx: u64) -> Result<Packet> {
        match &mut self.gt {
            Some(gt) => gt.get_packet(idx),
            None => Ok(Packet::empty()),
        }
    }
}

/// Wraps a source into a precacher loader that yields final-shape packets.
fn normalising_loader(
    mut source: Box<dyn PacketSource>,
    four_byte_aligned: bool,
) -> impl FnMut(u64) -> Packet + Send + 'static {
    move |idx| {
        if idx >= source.len() {
            return Packet::empty();
        }
        let packet = source.fetch(idx);
        if packet.is_empty() {
            return packet;
        }
        let layout = source.layout(idx);
        normalise(packet, layout, four_byte_aligned)
            .expect("packet geometry violates the source contract")
    }
}

fn normalise(mut packet: Packet, layout: PacketLayout, four_byte_aligned: bool) -> Result<Packet> {
    if layout.transposed {
        packet = Transpose.apply(packet)?;
    }
    if four_byte_aligned && packet.shape().channels == 3 {
        packet = PadToFourChannels.apply(packet)?;
    }
    if let Some((width, height)) = layout.size {
        let shape = packet.shape();
        if (shape.width, shape.height) != (width, height) {
            packet = ResizeNearest::new(width, height)?.apply(packet)?;
        }
    }
    Ok(packet)
}

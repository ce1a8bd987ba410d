#![forbid(unsafe_code)]

pub mod feeder;
pub mod packet;
pub mod precacher;
pub mod transforms;
pub mod writer;

pub use feeder::{DataFeeder, PacketLayout, PacketSource};
pub use packet::{Packet, PacketShape};
pub use precacher::{DataPrecacher, LoaderCallback};
pub use transforms::Transform;
pub use writer::{DataWriter, PushResult, WriterConfig};

/// Ceiling applied to every byte-bounded buffer in the crate (precache
/// scratch, writer queue). Suggested sizes above this are clamped.
#[cfg(target_pointer_width = "64")]
pub(crate) const CACHE_MAX_BYTES: usize = 6 << 30;
#[cfg(not(target_pointer_width = "64"))]
pub(crate) const CACHE_MAX_BYTES: usize = 2 << 30;

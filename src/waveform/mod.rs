//! The waveform file (`CWF`): one variable-length, adaptively compressed
//! record per shot.

pub mod compress;
mod file;
pub mod record;

pub use compress::{Packet, Scheme};
pub use file::{OpenMode, WaveformFile};
pub use record::{ChannelWaveform, Validity, WaveformRecord};

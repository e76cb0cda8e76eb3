//! Reads and writes the four coordinated files produced by an airborne
//! topo-bathymetric lidar system: a waveform file (`.cwf`), a point file
//! (`.cpf`), a trajectory file (`.csf`), and an index file (`.cif`) that
//! lets a reader randomly access a shot's waveform and point records
//! without scanning either file.
//!
//! # Examples
//!
//! Creating a waveform file and its index, then reading a record back:
//!
//! ```
//! use czmil::waveform::{ChannelWaveform, OpenMode, Packet, Validity, WaveformFile, WaveformRecord};
//!
//! # fn main() -> czmil::Result<()> {
//! # let dir = std::env::temp_dir().join("czmil-doctest");
//! # std::fs::create_dir_all(&dir)?;
//! # let cwf_path = dir.join("flightline.cwf");
//! # let cif_path = dir.join("flightline.cif");
//! let mut file = WaveformFile::create(&cwf_path, &cif_path)?;
//! let channels = std::array::from_fn(|i| ChannelWaveform {
//!     packets: vec![Packet { index: 0, range: 120.0, samples: [200 + i as u16; 64] }],
//!     validity: Validity::Valid,
//! });
//! file.write_record(WaveformRecord {
//!     shot_id: 0,
//!     time_offset_micros: 100,
//!     scan_angle_degrees: 1.5,
//!     channels,
//!     trigger: [300; 64],
//! })?;
//! file.close()?;
//! # std::fs::remove_dir_all(&dir).ok();
//! # Ok(())
//! # }
//! ```

pub mod bitstream;
pub mod caf;
pub mod channel;
pub mod constants;
pub mod error;
pub mod header;
pub mod index;
pub mod manager;
pub mod point;
pub mod scale;
pub mod trajectory;
pub mod waveform;

pub use channel::Channel;
pub use error::{Error, Result};
pub use header::{FileKind, Header};

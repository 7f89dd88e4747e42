//! Traits through which the controller talks to the rest of the console.
//!
//! All of these are borrowed collaborators: the controller only writes to
//! the sinks and never stores them. The disc image is the one owned
//! collaborator, held as an `Option<M>` inside the controller.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::msf::Msf;
use crate::{Lba, TickCount};

/// Errors surfaced by a [`MediaSource`] implementation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to open disc image '{path}'")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("seek target LBA {lba} is outside the disc ({lba_count} sectors)")]
    SeekOutOfRange { lba: Lba, lba_count: Lba },
    #[error("failed to read sector at LBA {lba}")]
    Read {
        lba: Lba,
        #[source]
        source: io::Error,
    },
}

/// How [`MediaSource::read`] should present sector contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Full 2352-byte raw sectors, sync pattern included.
    RawSector,
    /// 2048-byte data payloads with sync, header and subheader stripped.
    DataSector,
}

/// A positionable disc image. Reads must complete synchronously; the
/// emulated device has no way to wait for I/O.
pub trait MediaSource: Sized {
    fn open(path: &Path) -> Result<Self, MediaError>;

    /// Moves the read head to the given linear block address.
    fn seek_lba(&mut self, lba: Lba) -> Result<(), MediaError>;

    fn seek_msf(&mut self, msf: Msf) -> Result<(), MediaError> {
        self.seek_lba(msf.to_lba())
    }

    /// Reads `sector_count` sectors starting at the current head position
    /// into `out`, advancing the head. Returns the number of sectors read.
    fn read(&mut self, mode: ReadMode, sector_count: u32, out: &mut [u8])
        -> Result<u32, MediaError>;

    /// Current head position as an absolute LBA.
    fn position_on_disc(&self) -> Lba;

    /// Current head position relative to the start of the current track.
    fn position_in_track(&self) -> Lba;

    fn track_number(&self) -> u32;

    fn track_count(&self) -> u32;

    /// Absolute MSF position at which the given track starts.
    fn track_start_msf(&self, track: u32) -> Msf;

    /// Total addressable sectors on the disc.
    fn lba_count(&self) -> Lba;

    /// The path the image was opened from; recorded in save states so the
    /// disc can be re-inserted on restore.
    fn file_name(&self) -> &str;
}

/// Receives the level of the controller's DMA request line.
pub trait DmaBus {
    fn set_request(&mut self, active: bool);
}

/// Receives edge-triggered interrupt requests on the controller's single
/// IRQ line.
pub trait IrqSink {
    fn request(&mut self);
}

/// Accepts mixed stereo samples at [`crate::AUDIO_SAMPLE_RATE`].
pub trait AudioSink {
    fn push_sample(&mut self, left: i16, right: i16);
}

/// The embedder's event scheduler.
pub trait TickSource {
    /// Returns the ticks elapsed since the previous call. The controller
    /// calls this at the top of every register write to bring itself up to
    /// date before the write changes device state.
    fn consume_elapsed(&mut self) -> TickCount;

    /// Requests a wakeup no later than `ticks` from now. Implementations
    /// should keep the earlier of this and any existing deadline.
    fn set_downcount(&mut self, ticks: TickCount);
}

/// Decodes the ADPCM payload of one XA sector into PCM.
///
/// The decode itself is pure; the predictor history lives in the
/// controller's `last_samples` array so it can travel with save states.
pub trait XaDecoder {
    /// Decodes a full raw sector into `out` (cleared by the caller).
    /// Output samples are interleaved left/right when the sector's coding
    /// info says stereo, planar-mono otherwise.
    fn decode_sector(&self, sector: &[u8], last_samples: &mut [i32; 4], out: &mut Vec<i16>);
}

/// Borrowed collaborators handed to every controller entry point that can
/// advance time or emit effects.
pub struct CdBus<'a> {
    pub scheduler: &'a mut dyn TickSource,
    pub irq: &'a mut dyn IrqSink,
    pub dma: &'a mut dyn DmaBus,
    pub audio: &'a mut dyn AudioSink,
    pub xa_decoder: &'a dyn XaDecoder,
}

//! Device model for the CD-ROM drive controller of a PlayStation-class
//! console.
//!
//! The crate owns everything behind the console's four memory-mapped CD
//! registers: the two-phase command state machine, seek/read scheduling, the
//! sector routing pipeline, the XA-ADPCM resampler, and the CDDA volume
//! mixer. The CPU, DMA engine, interrupt controller, SPU, scheduler, disc
//! image, and ADPCM sample decoder are supplied by the embedding emulator
//! through the traits in [`interface`].
//!
//! The controller is single-threaded and cooperatively scheduled: the
//! embedder serializes all entry points and drives time forward through
//! [`CdController::execute`] with elapsed tick counts. The device never
//! blocks; disc reads are expected to complete synchronously.

pub mod audio;
pub mod controller;
pub mod fifo;
pub mod interface;
pub mod msf;
pub mod num;
pub mod registers;
pub mod sector;
pub mod state;

pub use controller::CdController;
pub use interface::{
    AudioSink, CdBus, DmaBus, IrqSink, MediaError, MediaSource, ReadMode, TickSource, XaDecoder,
};
pub use msf::Msf;
pub use registers::IrqCode;
pub use state::{CdRomState, StateError};

/// Signed tick type used for all delay bookkeeping. Budgets may transiently
/// go negative when an `execute` call overshoots a deadline.
pub type TickCount = i32;

/// Linear block address: 0-based sector index from the start of the disc.
pub type Lba = u32;

/// Master clock rate of the host console, in ticks per second.
pub const MASTER_CLOCK: TickCount = 33_868_800;

/// Sectors (frames) per second at single speed.
pub const SECTORS_PER_SECOND: u32 = 75;

/// Sample rate the audio sink consumes, in Hz.
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Size of a raw sector as stored on disc.
pub const RAW_SECTOR_SIZE: usize = 2352;

/// Length of the sync pattern at the start of every raw data sector.
pub const SECTOR_SYNC_SIZE: usize = 12;

/// Payload size of a Mode 1 / Mode 2 Form 1 data sector.
pub const DATA_SECTOR_SIZE: usize = 2048;

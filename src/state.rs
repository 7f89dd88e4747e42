//! Save-state snapshot of the controller.
//!
//! The snapshot is one flat struct; its field order is the serialization
//! order, covering every observable field including FIFO contents and the
//! resampler rings. The disc itself is recorded as a file name plus head
//! position and re-opened on restore.

use bincode::{Decode, Encode};
use thiserror::Error;

use crate::audio::XaResampler;
use crate::controller::commands::{Command, CommandState};
use crate::controller::{DATA_FIFO_SIZE, PARAM_FIFO_SIZE, RESPONSE_FIFO_SIZE};
use crate::fifo::Fifo;
use crate::interface::MediaError;
use crate::msf::Msf;
use crate::registers::{HostStatus, ModeRegister, SecondaryStatus};
use crate::sector::{SectorHeader, SectorSubheader};
use crate::{Lba, TickCount};

/// Errors from [`crate::CdController::restore_state`].
#[derive(Debug, Error)]
pub enum StateError {
    /// The recorded disc image could not be re-opened or repositioned. The
    /// drive ejects; everything else in the snapshot is applied.
    #[error("failed to re-insert disc image '{path}' from save state")]
    MediaReopen {
        path: String,
        #[source]
        source: MediaError,
    },
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CdRomState {
    pub command: Command,
    pub command_state: CommandState,
    pub command_stage: u32,
    pub read_or_seek_remaining_ticks: TickCount,
    pub status: HostStatus,
    pub secondary_status: SecondaryStatus,
    pub mode: ModeRegister,
    pub interrupt_enable: u8,
    pub interrupt_flag: u8,
    pub pending_async_interrupt: u8,
    pub setloc_position: Msf,
    pub seek_position: Msf,
    pub setloc_pending: bool,
    pub read_after_seek: bool,
    pub play_after_seek: bool,
    pub muted: bool,
    pub adpcm_muted: bool,
    pub filter_file_number: u8,
    pub filter_channel_number: u8,
    pub last_sector_header: SectorHeader,
    pub last_sector_subheader: SectorSubheader,
    pub cd_audio_volume_matrix: [[u8; 2]; 2],
    pub next_cd_audio_volume_matrix: [[u8; 2]; 2],
    pub xa_last_samples: [i32; 4],
    pub xa_resampler: XaResampler,
    pub param_fifo: Fifo<PARAM_FIFO_SIZE>,
    pub response_fifo: Fifo<RESPONSE_FIFO_SIZE>,
    pub async_response_fifo: Fifo<RESPONSE_FIFO_SIZE>,
    pub data_fifo: Fifo<DATA_FIFO_SIZE>,
    pub sector_buffer: Vec<u8>,
    pub media_file_name: String,
    pub media_lba: Lba,
}

//! The drive controller proper: register file, interrupt plumbing, DMA
//! drain, and the glue between the command and motion state machines.
//!
//! The controller models the discrete microcontroller sitting between the
//! host CPU and the CD mechanism. The host sees four byte-wide registers;
//! ports 1-3 are multiplexed by the index in the low 2 bits of the status
//! register. Commands are acknowledged with INT3 after a modeled delay, and
//! multi-phase commands hold their completion interrupt until the host
//! acknowledges the previous one.

pub mod commands;
pub mod motion;

use std::path::Path;

use crate::audio::XaResampler;
use crate::fifo::Fifo;
use crate::interface::{CdBus, DmaBus, IrqSink, MediaSource};
use crate::msf::Msf;
use crate::num::GetBit;
use crate::registers::{
    request, HostStatus, IrqCode, ModeRegister, SecondaryStatus, INTERRUPT_REGISTER_MASK,
};
use crate::sector::{SectorHeader, SectorSubheader};
use crate::state::{CdRomState, StateError};
use crate::{TickCount, RAW_SECTOR_SIZE};

use self::commands::{Command, CommandState};

pub const PARAM_FIFO_SIZE: usize = 16;
pub const RESPONSE_FIFO_SIZE: usize = 16;
pub const DATA_FIFO_SIZE: usize = 4096;

/// Reset state of the volume matrix: both channels at unity, no crossfeed.
const INITIAL_VOLUME_MATRIX: [[u8; 2]; 2] = [[0x80, 0x00], [0x00, 0x80]];

/// Error reason byte for "no disc / drive not ready".
pub(crate) const ERROR_REASON_NOT_READY: u8 = 0x80;
/// Error reason byte for "bad track or parameter".
pub(crate) const ERROR_REASON_INVALID_ARGUMENT: u8 = 0x10;

/// The CD-ROM drive controller. `M` is the embedder's disc image type.
#[derive(Debug)]
pub struct CdController<M: MediaSource> {
    media: Option<M>,

    command: Command,
    command_state: CommandState,
    command_stage: u32,
    read_or_seek_remaining_ticks: TickCount,

    status: HostStatus,
    secondary_status: SecondaryStatus,
    mode: ModeRegister,

    interrupt_enable: u8,
    interrupt_flag: u8,
    pending_async_interrupt: u8,

    setloc_position: Msf,
    seek_position: Msf,
    setloc_pending: bool,
    read_after_seek: bool,
    play_after_seek: bool,

    muted: bool,
    adpcm_muted: bool,
    filter_file_number: u8,
    filter_channel_number: u8,

    last_sector_header: SectorHeader,
    last_sector_subheader: SectorSubheader,

    cd_audio_volume_matrix: [[u8; 2]; 2],
    next_cd_audio_volume_matrix: [[u8; 2]; 2],

    xa_last_samples: [i32; 4],
    xa_resampler: XaResampler,

    param_fifo: Fifo<PARAM_FIFO_SIZE>,
    response_fifo: Fifo<RESPONSE_FIFO_SIZE>,
    async_response_fifo: Fifo<RESPONSE_FIFO_SIZE>,
    data_fifo: Fifo<DATA_FIFO_SIZE>,
    sector_buffer: Vec<u8>,
}

impl<M: MediaSource> CdController<M> {
    #[must_use]
    pub fn new(media: Option<M>) -> Self {
        Self {
            media,
            command: Command::Sync,
            command_state: CommandState::Idle,
            command_stage: 0,
            read_or_seek_remaining_ticks: 0,
            status: HostStatus::default(),
            secondary_status: SecondaryStatus::default(),
            mode: ModeRegister::default(),
            interrupt_enable: INTERRUPT_REGISTER_MASK,
            interrupt_flag: 0,
            pending_async_interrupt: 0,
            setloc_position: Msf::ZERO,
            seek_position: Msf::ZERO,
            setloc_pending: false,
            read_after_seek: false,
            play_after_seek: false,
            muted: false,
            adpcm_muted: false,
            filter_file_number: 0,
            filter_channel_number: 0,
            last_sector_header: SectorHeader::default(),
            last_sector_subheader: SectorSubheader::default(),
            cd_audio_volume_matrix: INITIAL_VOLUME_MATRIX,
            next_cd_audio_volume_matrix: INITIAL_VOLUME_MATRIX,
            xa_last_samples: [0; 4],
            xa_resampler: XaResampler::new(),
            param_fifo: Fifo::new(),
            response_fifo: Fifo::new(),
            async_response_fifo: Fifo::new(),
            data_fifo: Fifo::new(),
            sector_buffer: Vec::with_capacity(RAW_SECTOR_SIZE),
        }
    }

    /// Hard reset: rewinds the disc and clears all controller state.
    pub fn reset(&mut self, bus: &mut CdBus<'_>) {
        if let Some(media) = &mut self.media {
            if let Err(err) = media.seek_lba(0) {
                log::error!("failed to rewind media during reset: {err}");
            }
        }

        self.soft_reset(bus);
    }

    /// Clears all controller state; the inserted disc (and its head
    /// position) is untouched.
    pub fn soft_reset(&mut self, bus: &mut CdBus<'_>) {
        let media = self.media.take();
        *self = Self::new(media);
        self.update_status_register(bus.dma);
    }

    pub fn insert_media(&mut self, media: M) {
        if self.media.is_some() {
            self.remove_media();
        }

        self.media = Some(media);
    }

    pub fn remove_media(&mut self) {
        if self.media.is_none() {
            return;
        }

        log::info!("removing disc");
        self.media = None;
    }

    #[must_use]
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    #[must_use]
    pub fn media(&self) -> Option<&M> {
        self.media.as_ref()
    }

    pub fn take_media(&mut self) -> Option<M> {
        self.media.take()
    }

    /// Advances the device by the scheduler's elapsed tick count.
    pub fn run(&mut self, bus: &mut CdBus<'_>) {
        let ticks = bus.scheduler.consume_elapsed();
        self.execute(ticks, bus);
    }

    /// Advances the device by `ticks`. Command completion is processed
    /// before motion completion when both expire within the same call.
    pub fn execute(&mut self, ticks: TickCount, bus: &mut CdBus<'_>) {
        if let CommandState::WaitForExecute { remaining } = self.command_state {
            let remaining = remaining - ticks;
            if remaining <= 0 {
                self.execute_command(bus);
            } else {
                self.command_state = CommandState::WaitForExecute { remaining };
                bus.scheduler.set_downcount(remaining);
            }
        }

        if self.secondary_status.is_active() {
            self.read_or_seek_remaining_ticks -= ticks;
            if self.read_or_seek_remaining_ticks <= 0 {
                if self.secondary_status.seeking() {
                    self.do_seek_complete(bus);
                } else {
                    self.do_sector_read(bus);
                }
            } else {
                bus.scheduler.set_downcount(self.read_or_seek_remaining_ticks);
            }
        }
    }

    pub fn read_register(&mut self, offset: u32, bus: &mut CdBus<'_>) -> u8 {
        match (offset, self.status.index()) {
            (0, _) => {
                log::trace!("status register read: 0x{:02X}", self.status.bits);
                self.status.bits
            }

            (1, _) => {
                if self.response_fifo.is_empty() {
                    log::debug!("response FIFO empty on read");
                    return 0xFF;
                }

                let value = self.response_fifo.pop();
                self.update_status_register(bus.dma);
                log::trace!("response FIFO read: 0x{value:02X}");
                value
            }

            (2, _) => {
                let value = self.data_fifo.pop();
                self.update_status_register(bus.dma);
                log::trace!("data FIFO read: 0x{value:02X}");
                value
            }

            (3, 0 | 2) => self.interrupt_enable | !INTERRUPT_REGISTER_MASK,
            (3, 1 | 3) => self.interrupt_flag | !INTERRUPT_REGISTER_MASK,

            _ => panic!(
                "unknown CD-ROM register read: offset={offset}, index={}",
                self.status.index()
            ),
        }
    }

    pub fn write_register(&mut self, offset: u32, value: u8, bus: &mut CdBus<'_>) {
        if offset == 0 {
            log::trace!("status register write: 0x{value:02X}");
            self.status.set_index(value);
            return;
        }

        // Bring the device up to date before the write changes its state.
        self.run(bus);

        match (offset, self.status.index()) {
            (1, 0) => {
                log::debug!("command register write: 0x{value:02X}");
                if self.command_state == CommandState::Idle {
                    let Some(command) = Command::from_byte(value) else {
                        panic!("unknown CD-ROM command 0x{value:02X}");
                    };
                    self.begin_command(command, bus);
                } else {
                    log::warn!(
                        "ignoring command register write (0x{value:02X}) in non-idle state"
                    );
                }
            }

            (1, 1) => log::warn!("sound map data out is not modeled (0x{value:02X})"),
            (1, 2) => log::warn!("sound map coding info is not modeled (0x{value:02X})"),
            (1, 3) => {
                log::debug!("right-to-left volume write: 0x{value:02X}");
                self.next_cd_audio_volume_matrix[1][0] = value;
            }

            (2, 0) => {
                if self.param_fifo.is_full() {
                    log::warn!("parameter FIFO overflow");
                    self.param_fifo.pop();
                }

                self.param_fifo.push(value);
                self.update_status_register(bus.dma);
            }

            (2, 1) => {
                log::debug!("interrupt enable write: 0x{value:02X}");
                self.interrupt_enable = value & INTERRUPT_REGISTER_MASK;
            }

            (2, 2) => {
                log::debug!("left-to-left volume write: 0x{value:02X}");
                self.next_cd_audio_volume_matrix[0][0] = value;
            }

            // This port shares the right-to-left cell with (1, 3); the
            // controller never routes a write to cell [1][1].
            (2, 3) => {
                log::debug!("right-to-left volume write: 0x{value:02X}");
                self.next_cd_audio_volume_matrix[1][0] = value;
            }

            (3, 0) => {
                log::debug!("request register write: 0x{value:02X}");
                if value & request::SMEN != 0 {
                    log::warn!("sound map enable requested; the sound map is not modeled");
                }

                if value & request::BFRD != 0 {
                    self.load_data_fifo();
                } else {
                    log::debug!("clearing data FIFO");
                    self.data_fifo.clear();
                }

                self.update_status_register(bus.dma);
            }

            (3, 1) => {
                log::debug!("interrupt flag write: 0x{value:02X}");
                self.interrupt_flag &= !(value & INTERRUPT_REGISTER_MASK);
                if self.interrupt_flag == 0 {
                    if let CommandState::WaitForIrqClear { next_stage_ticks } = self.command_state
                    {
                        self.command_state =
                            CommandState::WaitForExecute { remaining: next_stage_ticks };
                        bus.scheduler.set_downcount(next_stage_ticks);
                        self.update_status_register(bus.dma);
                    } else if self.has_pending_async_interrupt() {
                        self.deliver_async_interrupt(bus.irq);
                    }
                }

                // Bit 6 also clears the parameter FIFO.
                if value.bit(6) {
                    self.param_fifo.clear();
                    self.update_status_register(bus.dma);
                }
            }

            (3, 2) => {
                log::debug!("left-to-right volume write: 0x{value:02X}");
                self.next_cd_audio_volume_matrix[0][1] = value;
            }

            (3, 3) => {
                log::debug!("volume apply write: 0x{value:02X}");
                self.adpcm_muted = value.bit(0);
                if value.bit(5) {
                    self.cd_audio_volume_matrix = self.next_cd_audio_volume_matrix;
                }
            }

            _ => panic!(
                "unknown CD-ROM register write: offset={offset}, index={}, value=0x{value:02X}",
                self.status.index()
            ),
        }
    }

    /// Drains `words.len() * 4` bytes from the data FIFO into the caller's
    /// buffer. Shortfalls are zero-filled and logged; the guest drives all
    /// retries.
    pub fn dma_read(&mut self, words: &mut [u32]) {
        let words_in_fifo = self.data_fifo.len() / 4;
        if words_in_fifo < words.len() {
            log::error!(
                "DMA read of {} words with only {} bytes in the data FIFO",
                words.len(),
                self.data_fifo.len()
            );
        }

        for word in words.iter_mut() {
            let mut bytes = [0; 4];
            self.data_fifo.pop_slice(&mut bytes);
            *word = u32::from_le_bytes(bytes);
        }
    }

    pub(crate) fn update_status_register(&mut self, dma: &mut dyn DmaBus) {
        self.status.set(HostStatus::ADPBUSY, false);
        self.status.set(HostStatus::PRMEMPTY, self.param_fifo.is_empty());
        self.status.set(HostStatus::PRMWRDY, !self.param_fifo.is_full());
        self.status.set(HostStatus::RSLRRDY, !self.response_fifo.is_empty());
        self.status.set(HostStatus::DRQSTS, !self.data_fifo.is_empty());
        self.status.set(
            HostStatus::BUSYSTS,
            matches!(self.command_state, CommandState::WaitForExecute { .. }),
        );

        dma.set_request(self.status.data_request());
    }

    pub(crate) fn has_pending_interrupt(&self) -> bool {
        self.interrupt_flag != 0
    }

    pub(crate) fn has_pending_async_interrupt(&self) -> bool {
        self.pending_async_interrupt != 0
    }

    pub(crate) fn set_interrupt(&mut self, code: IrqCode, irq: &mut dyn IrqSink) {
        self.interrupt_flag = code as u8;
        irq.request();
    }

    /// Stages an asynchronous interrupt. It is delivered immediately unless
    /// the host still has flag bits to acknowledge, in which case it stays
    /// in the single pending slot until the flag register clears.
    pub(crate) fn set_async_interrupt(&mut self, code: IrqCode, irq: &mut dyn IrqSink) {
        assert_eq!(self.pending_async_interrupt, 0, "async interrupt already pending");
        self.pending_async_interrupt = code as u8;
        if !self.has_pending_interrupt() {
            self.deliver_async_interrupt(irq);
        }
    }

    pub(crate) fn cancel_async_interrupt(&mut self) {
        self.pending_async_interrupt = 0;
        self.async_response_fifo.clear();
    }

    pub(crate) fn deliver_async_interrupt(&mut self, irq: &mut dyn IrqSink) {
        debug_assert!(self.pending_async_interrupt != 0 && !self.has_pending_interrupt());
        log::debug!("delivering async interrupt {}", self.pending_async_interrupt);

        self.response_fifo.clear();
        self.response_fifo.push_from(&mut self.async_response_fifo);
        self.interrupt_flag = self.pending_async_interrupt;
        self.pending_async_interrupt = 0;
        irq.request();
    }

    pub(crate) fn send_ack_and_stat(&mut self, irq: &mut dyn IrqSink) {
        self.response_fifo.push(self.secondary_status.bits);
        self.set_interrupt(IrqCode::Ack, irq);
    }

    pub(crate) fn send_error_response(&mut self, reason: u8, irq: &mut dyn IrqSink) {
        self.response_fifo.push(self.secondary_status.bits | SecondaryStatus::ERROR);
        self.response_fifo.push(reason);
        self.set_interrupt(IrqCode::Error, irq);
    }

    pub(crate) fn send_async_error_response(&mut self, reason: u8, irq: &mut dyn IrqSink) {
        self.async_response_fifo.push(self.secondary_status.bits | SecondaryStatus::ERROR);
        self.async_response_fifo.push(reason);
        self.set_async_interrupt(IrqCode::Error, irq);
    }

    /// Snapshots every observable field, plus the disc's file name and head
    /// position so the disc can be re-inserted on restore.
    #[must_use]
    pub fn save_state(&self) -> CdRomState {
        let (media_file_name, media_lba) = match &self.media {
            Some(media) => (media.file_name().to_owned(), media.position_on_disc()),
            None => (String::new(), 0),
        };

        CdRomState {
            command: self.command,
            command_state: self.command_state,
            command_stage: self.command_stage,
            read_or_seek_remaining_ticks: self.read_or_seek_remaining_ticks,
            status: self.status,
            secondary_status: self.secondary_status,
            mode: self.mode,
            interrupt_enable: self.interrupt_enable,
            interrupt_flag: self.interrupt_flag,
            pending_async_interrupt: self.pending_async_interrupt,
            setloc_position: self.setloc_position,
            seek_position: self.seek_position,
            setloc_pending: self.setloc_pending,
            read_after_seek: self.read_after_seek,
            play_after_seek: self.play_after_seek,
            muted: self.muted,
            adpcm_muted: self.adpcm_muted,
            filter_file_number: self.filter_file_number,
            filter_channel_number: self.filter_channel_number,
            last_sector_header: self.last_sector_header,
            last_sector_subheader: self.last_sector_subheader,
            cd_audio_volume_matrix: self.cd_audio_volume_matrix,
            next_cd_audio_volume_matrix: self.next_cd_audio_volume_matrix,
            xa_last_samples: self.xa_last_samples,
            xa_resampler: self.xa_resampler.clone(),
            param_fifo: self.param_fifo.clone(),
            response_fifo: self.response_fifo.clone(),
            async_response_fifo: self.async_response_fifo.clone(),
            data_fifo: self.data_fifo.clone(),
            sector_buffer: self.sector_buffer.clone(),
            media_file_name,
            media_lba,
        }
    }

    /// Applies a snapshot. If the snapshot recorded a disc, that image is
    /// re-opened by file name and the head restored to the recorded LBA; on
    /// either failure the drive ejects and the error is returned, with all
    /// other state already applied.
    pub fn restore_state(
        &mut self,
        state: CdRomState,
        bus: &mut CdBus<'_>,
    ) -> Result<(), StateError> {
        self.command = state.command;
        self.command_state = state.command_state;
        self.command_stage = state.command_stage;
        self.read_or_seek_remaining_ticks = state.read_or_seek_remaining_ticks;
        self.status = state.status;
        self.secondary_status = state.secondary_status;
        self.mode = state.mode;
        self.interrupt_enable = state.interrupt_enable;
        self.interrupt_flag = state.interrupt_flag;
        self.pending_async_interrupt = state.pending_async_interrupt;
        self.setloc_position = state.setloc_position;
        self.seek_position = state.seek_position;
        self.setloc_pending = state.setloc_pending;
        self.read_after_seek = state.read_after_seek;
        self.play_after_seek = state.play_after_seek;
        self.muted = state.muted;
        self.adpcm_muted = state.adpcm_muted;
        self.filter_file_number = state.filter_file_number;
        self.filter_channel_number = state.filter_channel_number;
        self.last_sector_header = state.last_sector_header;
        self.last_sector_subheader = state.last_sector_subheader;
        self.cd_audio_volume_matrix = state.cd_audio_volume_matrix;
        self.next_cd_audio_volume_matrix = state.next_cd_audio_volume_matrix;
        self.xa_last_samples = state.xa_last_samples;
        self.xa_resampler = state.xa_resampler;
        self.param_fifo = state.param_fifo;
        self.response_fifo = state.response_fifo;
        self.async_response_fifo = state.async_response_fifo;
        self.data_fifo = state.data_fifo;
        self.sector_buffer = state.sector_buffer;

        if let CommandState::WaitForExecute { remaining } = self.command_state {
            bus.scheduler.set_downcount(remaining);
        }
        if self.secondary_status.is_active() {
            bus.scheduler.set_downcount(self.read_or_seek_remaining_ticks);
        }

        bus.dma.set_request(self.status.data_request());

        self.media = None;
        if state.media_file_name.is_empty() {
            return Ok(());
        }

        let reopened = M::open(Path::new(&state.media_file_name))
            .and_then(|mut media| media.seek_lba(state.media_lba).map(|()| media));
        match reopened {
            Ok(media) => {
                self.media = Some(media);
                Ok(())
            }
            Err(source) => {
                log::error!(
                    "failed to re-insert disc image '{}' from save state; ejecting",
                    state.media_file_name
                );
                Err(StateError::MediaReopen { path: state.media_file_name, source })
            }
        }
    }
}

//! Seek and read scheduling, and the per-sector routing pipeline.
//!
//! Motion runs on its own tick budget, independent of the command machine
//! but mutually constrained through the secondary status bits: at most one
//! of reading/seeking/playing is ever set. Completed data sectors raise an
//! asynchronous INT1 toward the host; audio sectors are consumed entirely
//! inside the drive and produce no CPU-visible interrupt.

use crate::audio;
use crate::interface::{CdBus, MediaSource, ReadMode};
use crate::registers::{IrqCode, SecondaryStatus};
use crate::sector::{SectorHeader, SectorSubheader};
use crate::{
    TickCount, DATA_SECTOR_SIZE, MASTER_CLOCK, RAW_SECTOR_SIZE, SECTORS_PER_SECOND,
    SECTOR_SYNC_SIZE,
};

use super::{CdController, ERROR_REASON_NOT_READY};

const SEEK_BASE_TICKS: TickCount = 20000;
const SEEK_TICKS_PER_LBA: TickCount = 100;

impl<M: MediaSource> CdController<M> {
    fn ticks_for_read(&self) -> TickCount {
        let sectors_per_second = if self.mode.double_speed() {
            2 * SECTORS_PER_SECOND
        } else {
            SECTORS_PER_SECOND
        };

        MASTER_CLOCK / sectors_per_second as TickCount
    }

    /// Starts reading data sectors (`cdda` false) or playing audio (`cdda`
    /// true). A pending setloc that does not match the current head
    /// position turns this into a seek with the appropriate after-seek
    /// latch; the read then starts from the seek completion path.
    pub(crate) fn begin_reading(&mut self, cdda: bool, bus: &mut CdBus<'_>) {
        log::debug!("starting {}", if cdda { "CDDA playback" } else { "reading" });

        if self.setloc_pending {
            let already_in_position = self
                .media
                .as_ref()
                .is_some_and(|media| media.position_on_disc() == self.setloc_position.to_lba());

            if !already_in_position {
                self.begin_seeking(bus);
                self.read_after_seek = !cdda;
                self.play_after_seek = cdda;
                return;
            }

            self.setloc_pending = false;
        }

        self.secondary_status.set(SecondaryStatus::MOTOR_ON, true);
        self.secondary_status.set(SecondaryStatus::SEEKING, false);
        self.secondary_status.set(SecondaryStatus::READING, !cdda);
        self.secondary_status.set(SecondaryStatus::PLAYING_CDDA, cdda);

        self.read_or_seek_remaining_ticks = self.ticks_for_read();
        bus.scheduler.set_downcount(self.read_or_seek_remaining_ticks);
    }

    pub(crate) fn begin_seeking(&mut self, bus: &mut CdBus<'_>) {
        if !self.setloc_pending {
            log::warn!("seeking without a pending setloc");
        }

        self.seek_position = self.setloc_position;
        self.setloc_pending = false;

        log::debug!("seeking to {}", self.seek_position);
        debug_assert!(!self.secondary_status.is_reading_or_playing());

        self.secondary_status.set(SecondaryStatus::MOTOR_ON, true);
        self.secondary_status.set(SecondaryStatus::SEEKING, true);

        let ticks = match &self.media {
            Some(media) => {
                let lba_diff = media.position_on_disc().abs_diff(self.seek_position.to_lba());
                SEEK_BASE_TICKS + lba_diff as TickCount * SEEK_TICKS_PER_LBA
            }
            None => SEEK_BASE_TICKS,
        };
        log::debug!("seek will take {ticks} ticks");

        self.read_or_seek_remaining_ticks = ticks;
        bus.scheduler.set_downcount(ticks);
    }

    pub(crate) fn stop_reading(&mut self) {
        if !self.secondary_status.is_active() {
            return;
        }

        log::debug!(
            "stopping {}",
            if self.secondary_status.seeking() {
                "seeking"
            } else if self.secondary_status.reading() {
                "reading"
            } else {
                "CDDA playback"
            }
        );

        self.secondary_status.set(SecondaryStatus::READING, false);
        self.secondary_status.set(SecondaryStatus::PLAYING_CDDA, false);
        self.secondary_status.set(SecondaryStatus::SEEKING, false);
        self.read_or_seek_remaining_ticks = 0;
    }

    pub(crate) fn do_seek_complete(&mut self, bus: &mut CdBus<'_>) {
        debug_assert!(self.secondary_status.seeking());
        self.secondary_status.set(SecondaryStatus::SEEKING, false);

        let target = self.seek_position.to_lba();
        let seek_ok = match &mut self.media {
            Some(media) => match media.seek_lba(target) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("seek to {} failed: {err}", self.seek_position);
                    false
                }
            },
            None => false,
        };

        if seek_ok {
            // Any latched follow-up motion starts before the completion is
            // reported, so the async stat already carries the new activity.
            if self.play_after_seek || self.read_after_seek {
                let cdda = self.play_after_seek;
                self.begin_reading(cdda, bus);
            }

            self.async_response_fifo.push(self.secondary_status.bits);
            self.set_async_interrupt(IrqCode::Complete, bus.irq);
            self.update_status_register(bus.dma);
        } else {
            self.send_async_error_response(ERROR_REASON_NOT_READY, bus.irq);
        }

        self.setloc_pending = false;
        self.read_after_seek = false;
        self.play_after_seek = false;
    }

    pub(crate) fn do_sector_read(&mut self, bus: &mut CdBus<'_>) {
        // A setloc issued mid-read takes effect at the next sector
        // boundary, retargeting the head before anything else happens.
        if self.setloc_pending {
            let needs_seek = self
                .media
                .as_ref()
                .is_some_and(|media| media.position_on_disc() != self.setloc_position.to_lba());

            if needs_seek {
                let was_cdda = self.secondary_status.playing_cdda();
                self.secondary_status.set(SecondaryStatus::READING, false);
                self.secondary_status.set(SecondaryStatus::PLAYING_CDDA, false);
                self.begin_seeking(bus);
                self.read_after_seek = !was_cdda;
                self.play_after_seek = was_cdda;
                return;
            }

            self.setloc_pending = false;
        }

        if self.has_pending_async_interrupt() {
            // The host never acknowledged the previous sector; it is lost.
            log::warn!("sector-ready interrupt was not delivered, dropping missed sector");
            self.cancel_async_interrupt();
        }
        if !self.sector_buffer.is_empty() {
            log::warn!("sector buffer was not consumed by the host");
        }

        assert!(!self.mode.ignore_bit(), "mode ignore bit is not modeled");

        self.sector_buffer.resize(RAW_SECTOR_SIZE, 0);
        let read_ok = match &mut self.media {
            Some(media) => match media.read(ReadMode::RawSector, 1, &mut self.sector_buffer) {
                Ok(count) if count >= 1 => true,
                Ok(_) => {
                    log::warn!("sector read past end of disc");
                    false
                }
                Err(err) => {
                    log::warn!("sector read failed: {err}");
                    false
                }
            },
            None => false,
        };

        if !read_ok {
            self.sector_buffer.clear();
            self.stop_reading();
            self.send_async_error_response(ERROR_REASON_NOT_READY, bus.irq);
            return;
        }

        self.last_sector_header = SectorHeader::from_raw(&self.sector_buffer);
        self.last_sector_subheader = SectorSubheader::from_raw(&self.sector_buffer);

        if self.secondary_status.reading() {
            self.process_data_sector(bus);
        } else if self.secondary_status.playing_cdda() {
            self.process_cdda_sector(bus);
        } else {
            panic!("sector read completed while neither reading nor playing");
        }

        self.read_or_seek_remaining_ticks += self.ticks_for_read();
        bus.scheduler.set_downcount(self.read_or_seek_remaining_ticks);
    }

    fn process_data_sector(&mut self, bus: &mut CdBus<'_>) {
        log::debug!(
            "read sector: mode {} submode 0x{:02X}",
            self.last_sector_header.sector_mode,
            self.last_sector_subheader.submode
        );

        let mut pass_to_cpu = true;
        if self.mode.xa_enable() && self.last_sector_header.sector_mode == 2 {
            let subheader = self.last_sector_subheader;

            if subheader.is_realtime() && subheader.is_audio() {
                if self.mode.xa_filter()
                    && (subheader.file_number != self.filter_file_number
                        || subheader.channel_number != self.filter_channel_number)
                {
                    log::debug!(
                        "dropping XA sector on filter mismatch (want {}/{}, got {}/{})",
                        self.filter_file_number,
                        self.filter_channel_number,
                        subheader.file_number,
                        subheader.channel_number
                    );
                } else {
                    self.process_xa_adpcm_sector(bus);
                }

                // Realtime audio sectors never reach the CPU.
                self.sector_buffer.clear();
                pass_to_cpu = false;
            }

            if subheader.is_eof() {
                log::warn!("end of CD-XA file");
            }
        }

        if pass_to_cpu {
            self.async_response_fifo.push(self.secondary_status.bits);
            self.set_async_interrupt(IrqCode::DataReady, bus.irq);
            self.update_status_register(bus.dma);
        }
    }

    fn process_xa_adpcm_sector(&mut self, bus: &mut CdBus<'_>) {
        let mut samples = Vec::with_capacity(self.last_sector_subheader.samples_per_sector());
        bus.xa_decoder.decode_sector(
            &self.sector_buffer,
            &mut self.xa_last_samples,
            &mut samples,
        );

        // The decoder's predictor history advances even while muted; only
        // the submission to the resampler stops.
        if self.muted || self.adpcm_muted {
            return;
        }

        self.xa_resampler.resample(
            &samples,
            self.last_sector_subheader.is_stereo(),
            self.last_sector_subheader.is_half_sample_rate(),
            &self.cd_audio_volume_matrix,
            bus.audio,
        );
    }

    fn process_cdda_sector(&mut self, bus: &mut CdBus<'_>) {
        log::debug!("read CDDA sector");

        if !self.muted {
            audio::mix_cdda_sector(&self.sector_buffer, &self.cd_audio_volume_matrix, bus.audio);
        }

        if self.mode.report_audio() {
            log::warn!("CDDA position reporting is not implemented");
        }

        self.sector_buffer.clear();
    }

    /// Copies the sector buffer into the data FIFO in response to a BFRD
    /// request: 2340 bytes when reading raw (sync stripped), 2048 when
    /// cooked (sync, header and subheader stripped).
    pub(crate) fn load_data_fifo(&mut self) {
        if self.sector_buffer.is_empty() {
            log::warn!("buffer load requested with an empty sector buffer");
            return;
        }

        if self.mode.read_raw_sector() {
            self.data_fifo.push_slice(&self.sector_buffer[SECTOR_SYNC_SIZE..RAW_SECTOR_SIZE]);
        } else {
            let payload_start = SECTOR_SYNC_SIZE + 12;
            self.data_fifo
                .push_slice(&self.sector_buffer[payload_start..payload_start + DATA_SECTOR_SIZE]);
        }

        log::debug!("loaded {} bytes into the data FIFO", self.data_fifo.len());
        self.sector_buffer.clear();
    }
}

//! The command state machine.
//!
//! Commands are written to port (1, 0) and acknowledged after a modeled
//! delay. Single-phase commands respond with INT3 (or INT5) and return to
//! idle; multi-phase commands additionally park in `WaitForIrqClear` until
//! the host acknowledges the flag register, then run a second stage after a
//! per-command delay.

use bincode::{Decode, Encode};

use crate::interface::{CdBus, MediaSource};
use crate::msf::{bcd_to_decimal, decimal_to_bcd, Msf};
use crate::registers::{IrqCode, SecondaryStatus};
use crate::TickCount;

use super::{CdController, ERROR_REASON_INVALID_ARGUMENT, ERROR_REASON_NOT_READY};

const DEFAULT_ACK_DELAY: TickCount = 4000;
const INIT_ACK_DELAY: TickCount = 60000;

const GETID_STAGE_TICKS: TickCount = 18000;
const INIT_STAGE_TICKS: TickCount = 8000;
const PAUSE_DOUBLE_SPEED_TICKS: TickCount = 2_000_000;
const PAUSE_SINGLE_SPEED_TICKS: TickCount = 1_000_000;
const PAUSE_IDLE_TICKS: TickCount = 7000;
const STOP_MOTOR_ON_TICKS: TickCount = 1_000_000;
const STOP_IDLE_TICKS: TickCount = 7000;

/// Licensed-disc identification pushed by GetID's second stage. The last
/// four bytes are the region string; the final byte is 0x49 ('I') on
/// European units.
const DISC_ID_RESPONSE: [u8; 8] = [0x02, 0x00, 0x20, 0x00, 0x53, 0x43, 0x45, 0x41];

/// Response to the no-disc GetID: idle drive, door closed, no disc.
const NO_DISC_ID_RESPONSE: [u8; 2] = [0x11, 0x80];

/// Controller firmware date/version reported by test subcommand 0x20.
const FIRMWARE_VERSION_RESPONSE: [u8; 4] = [0x94, 0x09, 0x19, 0xC0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Command {
    /// Opcode 0x00; also the idle placeholder between commands.
    Sync,
    Getstat,
    Setloc,
    Play,
    ReadN,
    Stop,
    Pause,
    Init,
    Mute,
    Demute,
    Setfilter,
    Setmode,
    GetlocL,
    GetlocP,
    GetTN,
    GetTD,
    SeekL,
    SeekP,
    Test,
    GetID,
    ReadS,
}

impl Command {
    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Sync),
            0x01 => Some(Self::Getstat),
            0x02 => Some(Self::Setloc),
            0x03 => Some(Self::Play),
            0x06 => Some(Self::ReadN),
            0x08 => Some(Self::Stop),
            0x09 => Some(Self::Pause),
            0x0A => Some(Self::Init),
            0x0B => Some(Self::Mute),
            0x0C => Some(Self::Demute),
            0x0D => Some(Self::Setfilter),
            0x0E => Some(Self::Setmode),
            0x10 => Some(Self::GetlocL),
            0x11 => Some(Self::GetlocP),
            0x13 => Some(Self::GetTN),
            0x14 => Some(Self::GetTD),
            0x15 => Some(Self::SeekL),
            0x16 => Some(Self::SeekP),
            0x19 => Some(Self::Test),
            0x1A => Some(Self::GetID),
            0x1B => Some(Self::ReadS),
            _ => None,
        }
    }
}

/// Where the command machine is between a command write and its final
/// interrupt. The tick budgets live inside the variants so that an armed
/// delay always exists exactly when the state says one should.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CommandState {
    Idle,
    /// Counting down to (the next stage of) command execution.
    WaitForExecute { remaining: TickCount },
    /// A multi-phase command waiting for the host to acknowledge the flag
    /// register; `next_stage_ticks` arms the next `WaitForExecute`.
    WaitForIrqClear { next_stage_ticks: TickCount },
}

fn ack_delay_for_command(command: Command) -> TickCount {
    // Init resets the whole drive and takes much longer to acknowledge.
    if command == Command::Init { INIT_ACK_DELAY } else { DEFAULT_ACK_DELAY }
}

impl<M: MediaSource> CdController<M> {
    pub(crate) fn begin_command(&mut self, command: Command, bus: &mut CdBus<'_>) {
        self.response_fifo.clear();

        self.command = command;
        self.command_stage = 0;

        let ack_delay = ack_delay_for_command(command);
        self.command_state = CommandState::WaitForExecute { remaining: ack_delay };
        bus.scheduler.set_downcount(ack_delay);
        self.update_status_register(bus.dma);
    }

    fn next_command_stage(&mut self, ticks: TickCount, bus: &mut CdBus<'_>) {
        self.command_state = CommandState::WaitForIrqClear { next_stage_ticks: ticks };
        self.command_stage += 1;
        self.update_status_register(bus.dma);
    }

    fn end_command(&mut self, bus: &mut CdBus<'_>) {
        self.param_fifo.clear();

        self.command_state = CommandState::Idle;
        self.command = Command::Sync;
        self.command_stage = 0;
        self.update_status_register(bus.dma);
    }

    pub(crate) fn execute_command(&mut self, bus: &mut CdBus<'_>) {
        log::debug!("executing command {:?} stage {}", self.command, self.command_stage);

        match self.command {
            Command::Sync => panic!("Sync command should never reach execution"),

            Command::Getstat => {
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::Test => {
                let subcommand = self.param_fifo.pop();
                self.execute_test_command(subcommand, bus);
            }

            Command::GetID => {
                if self.command_stage == 0 {
                    if self.has_media() {
                        self.send_ack_and_stat(bus.irq);
                        self.next_command_stage(GETID_STAGE_TICKS, bus);
                    } else {
                        self.response_fifo.push_slice(&NO_DISC_ID_RESPONSE);
                        self.set_interrupt(IrqCode::Error, bus.irq);
                        self.end_command(bus);
                    }
                } else {
                    self.response_fifo.push_slice(&DISC_ID_RESPONSE);
                    self.set_interrupt(IrqCode::Complete, bus.irq);
                    self.end_command(bus);
                }
            }

            Command::Setfilter => {
                let file = self.param_fifo.peek(0);
                let channel = self.param_fifo.peek(1);
                log::debug!("setfilter command: file {file}, channel {channel}");
                self.filter_file_number = file;
                self.filter_channel_number = channel;
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::Setmode => {
                let mode = self.param_fifo.peek(0);
                log::debug!("setmode command: 0x{mode:02X}");
                self.mode.bits = mode;
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::Setloc => {
                if self.secondary_status.is_active() {
                    log::warn!("setloc while reading/playing/seeking");
                }

                self.setloc_position = Msf {
                    minute: bcd_to_decimal(self.param_fifo.peek(0)),
                    second: bcd_to_decimal(self.param_fifo.peek(1)),
                    frame: bcd_to_decimal(self.param_fifo.peek(2)),
                };
                self.setloc_pending = true;
                log::debug!("setloc command: {}", self.setloc_position);
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::SeekL | Command::SeekP => {
                log::debug!("seek command");
                if self.has_media() {
                    self.stop_reading();
                    self.begin_seeking(bus);
                    self.send_ack_and_stat(bus.irq);
                } else {
                    self.send_error_response(ERROR_REASON_NOT_READY, bus.irq);
                }

                self.end_command(bus);
            }

            Command::ReadN | Command::ReadS => {
                log::debug!("read command");
                if self.has_media() {
                    self.stop_reading();
                    self.begin_reading(false, bus);
                    self.send_ack_and_stat(bus.irq);
                } else {
                    self.send_error_response(ERROR_REASON_NOT_READY, bus.irq);
                }

                self.end_command(bus);
            }

            Command::Play => {
                let mut track =
                    if self.param_fifo.is_empty() { 0 } else { self.param_fifo.peek(0) };
                log::debug!("play command, track {track}");

                let Some(media) = &self.media else {
                    self.send_error_response(ERROR_REASON_NOT_READY, bus.irq);
                    self.end_command(bus);
                    return;
                };

                // Track zero plays from the current position. An
                // out-of-range track restarts the one under the head.
                if track != 0 {
                    if u32::from(track) > media.track_count() {
                        track = media.track_number() as u8;
                    }

                    self.setloc_position = media.track_start_msf(u32::from(track));
                    self.setloc_pending = true;
                }

                self.begin_reading(true, bus);
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::Pause => {
                if self.command_stage == 0 {
                    let was_reading = self.secondary_status.is_reading_or_playing();
                    log::debug!("pause command");
                    self.send_ack_and_stat(bus.irq);
                    self.stop_reading();

                    let stage_ticks = if was_reading {
                        if self.mode.double_speed() {
                            PAUSE_DOUBLE_SPEED_TICKS
                        } else {
                            PAUSE_SINGLE_SPEED_TICKS
                        }
                    } else {
                        PAUSE_IDLE_TICKS
                    };
                    self.next_command_stage(stage_ticks, bus);
                } else {
                    self.response_fifo.push(self.secondary_status.bits);
                    self.set_interrupt(IrqCode::Complete, bus.irq);
                    self.end_command(bus);
                }
            }

            Command::Stop => {
                if self.command_stage == 0 {
                    let motor_was_on = self.secondary_status.motor_on();
                    log::debug!("stop command");
                    self.send_ack_and_stat(bus.irq);
                    self.stop_reading();
                    self.next_command_stage(
                        if motor_was_on { STOP_MOTOR_ON_TICKS } else { STOP_IDLE_TICKS },
                        bus,
                    );
                } else {
                    self.secondary_status.set(SecondaryStatus::MOTOR_ON, false);
                    self.response_fifo.push(self.secondary_status.bits);
                    self.set_interrupt(IrqCode::Complete, bus.irq);
                    self.end_command(bus);
                }
            }

            Command::Init => {
                if self.command_stage == 0 {
                    log::debug!("init command");
                    self.send_ack_and_stat(bus.irq);
                    self.stop_reading();
                    self.next_command_stage(INIT_STAGE_TICKS, bus);
                } else {
                    self.mode.bits = 0;
                    self.secondary_status.bits = 0;
                    self.secondary_status.set(SecondaryStatus::MOTOR_ON, true);
                    self.response_fifo.push(self.secondary_status.bits);
                    self.set_interrupt(IrqCode::Complete, bus.irq);
                    self.end_command(bus);
                }
            }

            Command::Mute => {
                log::debug!("mute command");
                self.muted = true;
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::Demute => {
                log::debug!("demute command");
                self.muted = false;
                self.send_ack_and_stat(bus.irq);
                self.end_command(bus);
            }

            Command::GetlocL => {
                log::debug!("getlocL command");
                self.response_fifo.push_slice(&self.last_sector_header.to_bytes());
                self.response_fifo.push_slice(&self.last_sector_subheader.to_bytes());
                self.set_interrupt(IrqCode::Ack, bus.irq);
                self.end_command(bus);
            }

            Command::GetlocP => {
                // Without sub-channel Q the track/index bytes are constants
                // and the in-track position mirrors the disc position.
                log::debug!("getlocP command");
                self.response_fifo.push(1);
                self.response_fifo.push(1);
                self.response_fifo.push(self.last_sector_header.minute);
                self.response_fifo.push(self.last_sector_header.second);
                self.response_fifo.push(self.last_sector_header.frame);
                self.response_fifo.push(self.last_sector_header.minute);
                self.response_fifo.push(self.last_sector_header.second);
                self.response_fifo.push(self.last_sector_header.frame);
                self.set_interrupt(IrqCode::Ack, bus.irq);
                self.end_command(bus);
            }

            Command::GetTN => {
                log::debug!("getTN command");
                match &self.media {
                    Some(media) => {
                        let first = decimal_to_bcd(media.track_number() as u8);
                        let count = decimal_to_bcd(media.track_count() as u8);
                        self.response_fifo.push(self.secondary_status.bits);
                        self.response_fifo.push(first);
                        self.response_fifo.push(count);
                        self.set_interrupt(IrqCode::Ack, bus.irq);
                    }
                    None => self.send_error_response(ERROR_REASON_NOT_READY, bus.irq),
                }

                self.end_command(bus);
            }

            Command::GetTD => {
                let track = bcd_to_decimal(self.param_fifo.peek(0));
                log::debug!("getTD command, track {track}");

                match &self.media {
                    None => self.send_error_response(ERROR_REASON_NOT_READY, bus.irq),
                    Some(media) if u32::from(track) > media.track_count() => {
                        self.send_error_response(ERROR_REASON_INVALID_ARGUMENT, bus.irq);
                    }
                    Some(media) => {
                        // Track zero reports the end of the disc.
                        let position = if track == 0 {
                            Msf::from_lba(media.lba_count())
                        } else {
                            media.track_start_msf(u32::from(track))
                        };

                        let minute = decimal_to_bcd(position.minute);
                        let second = decimal_to_bcd(position.second);
                        self.response_fifo.push(self.secondary_status.bits);
                        self.response_fifo.push(minute);
                        self.response_fifo.push(second);
                        self.set_interrupt(IrqCode::Ack, bus.irq);
                    }
                }

                self.end_command(bus);
            }
        }
    }

    fn execute_test_command(&mut self, subcommand: u8, bus: &mut CdBus<'_>) {
        match subcommand {
            0x20 => {
                log::debug!("test command: firmware date/version");
                self.response_fifo.push_slice(&FIRMWARE_VERSION_RESPONSE);
                self.set_interrupt(IrqCode::Ack, bus.irq);
            }

            0x22 => {
                log::debug!("test command: region ID string");
                self.response_fifo.push_slice(b"for U/C");
                self.set_interrupt(IrqCode::Ack, bus.irq);
            }

            _ => {
                log::warn!("unknown test subcommand 0x{subcommand:02X}");
            }
        }

        self.end_command(bus);
    }
}

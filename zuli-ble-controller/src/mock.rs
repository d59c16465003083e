//! In-memory smartplug that answers the command pipe protocol

use std::sync::{Mutex, PoisonError};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use zuli_proto::{Mode, Power, Schedule, Status, commands};

use crate::error::{ControllerError, Result};
use crate::pipe::CommandPipe;

#[derive(Debug, Clone)]
pub struct MockState {
    pub connected: bool,
    /// When false, transactions never complete
    pub responsive: bool,
    /// Answer every request with this status and no payload
    pub forced_status: Option<Status>,
    /// Requests answered once with a bare success header and no payload
    pub truncate_once: Vec<Vec<u8>>,
    /// `Some(brightness)` while on
    pub output: Option<u8>,
    pub mode: Mode,
    pub clock: NaiveDateTime,
    pub schedules: Vec<Schedule>,
    pub max_schedules: u8,
    /// Reported while the output is on; off reads as zero draw
    pub power: Power,
    /// Every packet written, oldest first
    pub received: Vec<Vec<u8>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: true,
            responsive: true,
            forced_status: None,
            truncate_once: Vec::new(),
            output: None,
            mode: Mode::Appliance,
            clock: NaiveDate::from_ymd_opt(2000, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            schedules: Vec::new(),
            max_schedules: 20,
            power: Power {
                irms_ma: 500,
                power_mw: 60_000,
                power_factor: 1000,
                voltage_mv: 120_000,
            },
            received: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct MockPlug {
    state: Mutex<MockState>,
}

impl MockPlug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MockState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// `None` means the request gets no answer at all
    fn handle(&self, packet: &[u8]) -> Option<Result<Vec<u8>>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.connected {
            return Some(Err(ControllerError::NotConnected));
        }
        state.received.push(packet.to_vec());
        if !state.responsive {
            return None;
        }
        if let Some(i) = state.truncate_once.iter().position(|p| p == packet) {
            state.truncate_once.remove(i);
            let command = packet.first().copied().unwrap_or_default();
            return Some(Ok(reply(command, Status::Success, &[])));
        }
        Some(Ok(respond(&mut state, packet)))
    }
}

impl CommandPipe for MockPlug {
    async fn transact(&self, packet: &[u8]) -> Result<Vec<u8>> {
        match self.handle(packet) {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn disconnect(&self) -> Result<()> {
        self.update(|s| s.connected = false);
        Ok(())
    }
}

fn reply(command: u8, status: Status, payload: &[u8]) -> Vec<u8> {
    let mut response = vec![command, status.to_byte()];
    response.extend_from_slice(payload);
    response
}

fn respond(state: &mut MockState, packet: &[u8]) -> Vec<u8> {
    let Some(&command) = packet.first() else {
        return reply(0, Status::BadLength, &[]);
    };
    if let Some(status) = state.forced_status {
        return reply(command, status, &[]);
    }

    let expected_len = match command {
        commands::ON => Some(9),
        commands::OFF => Some(4),
        commands::MODE_SET => Some(2),
        commands::CLOCK_SET => Some(9),
        commands::SCHEDULE_ADD => Some(11),
        commands::SCHEDULE_REMOVE => Some(9),
        commands::SCHEDULE_GET => Some(2),
        _ => None,
    };
    if expected_len.is_some_and(|len| packet.len() != len) {
        return reply(command, Status::BadLength, &[]);
    }

    match command {
        commands::ON => {
            let brightness = packet[5];
            if state.output == Some(brightness) {
                return reply(command, Status::AlreadySet, &[]);
            }
            state.output = Some(brightness);
            reply(command, Status::Success, &[])
        }
        commands::OFF => {
            if state.output.take().is_none() {
                return reply(command, Status::AlreadySet, &[]);
            }
            reply(command, Status::Success, &[])
        }
        commands::MODE_SET => match Mode::from_byte(packet[1]) {
            Some(mode) => {
                state.mode = mode;
                reply(command, Status::Success, &[])
            }
            None => reply(command, Status::InvalidParam, &[]),
        },
        commands::CLOCK_SET => {
            let year = i32::from(u16::from_be_bytes([packet[1], packet[2]]));
            let time = NaiveDate::from_ymd_opt(year, u32::from(packet[3]), u32::from(packet[4]))
                .and_then(|d| {
                    d.and_hms_opt(
                        u32::from(packet[6]),
                        u32::from(packet[7]),
                        u32::from(packet[8]),
                    )
                });
            match time {
                Some(time) => {
                    state.clock = time;
                    reply(command, Status::Success, &[])
                }
                None => reply(command, Status::InvalidParam, &[]),
            }
        }
        commands::CLOCK_GET => {
            let clock = state.clock;
            let year = (clock.year() as u16).to_be_bytes();
            reply(
                command,
                Status::Success,
                &[
                    year[0],
                    year[1],
                    clock.month() as u8,
                    clock.day() as u8,
                    clock.weekday().num_days_from_sunday() as u8 + 1,
                    clock.hour() as u8,
                    clock.minute() as u8,
                    clock.second() as u8,
                ],
            )
        }
        commands::POWER_READ => {
            let power = if state.output.is_some() {
                state.power
            } else {
                Power {
                    irms_ma: 0,
                    power_mw: 0,
                    power_factor: 0,
                    voltage_mv: state.power.voltage_mv,
                }
            };
            let mut payload = Vec::with_capacity(10);
            payload.extend_from_slice(&power.irms_ma.to_be_bytes());
            payload.extend_from_slice(&power.power_mw.to_be_bytes()[1..]);
            payload.extend_from_slice(&power.power_factor.to_be_bytes());
            payload.extend_from_slice(&power.voltage_mv.to_be_bytes()[1..]);
            reply(command, Status::Success, &payload)
        }
        commands::SCHEDULE_INFO_GET => reply(
            command,
            Status::Success,
            &[state.schedules.len() as u8, state.max_schedules],
        ),
        commands::SCHEDULE_GET => {
            let index = usize::from(packet[1]);
            match index.checked_sub(1).and_then(|i| state.schedules.get(i)) {
                Some(schedule) => reply(command, Status::Success, &schedule.to_bytes()),
                None => reply(command, Status::InvalidParam, &[]),
            }
        }
        commands::SCHEDULE_ADD => {
            if state.schedules.len() >= usize::from(state.max_schedules) {
                return reply(command, Status::InvalidParam, &[]);
            }
            let Ok(mut schedule) = Schedule::from_bytes(&packet[1..]) else {
                return reply(command, Status::InvalidParam, &[]);
            };
            let next_id = state
                .schedules
                .iter()
                .map(|s| s.schedule_id)
                .max()
                .map_or(1, |id| id.wrapping_add(1));
            schedule.id = next_id;
            schedule.schedule_id = next_id;
            state.schedules.push(schedule);
            reply(command, Status::Success, &[])
        }
        commands::SCHEDULE_REMOVE => {
            let wanted = &packet[2..9];
            match state
                .schedules
                .iter()
                .position(|s| s.without_id().as_slice() == wanted)
            {
                Some(i) => {
                    state.schedules.remove(i);
                    reply(command, Status::Success, &[])
                }
                None => reply(command, Status::InvalidParam, &[]),
            }
        }
        commands::SCHEDULE_REMOVE_ALL => {
            if packet.get(1..3) != Some(&[0xb4, 0x3c][..]) {
                return reply(command, Status::InvalidParam, &[]);
            }
            state.schedules.clear();
            reply(command, Status::Success, &[])
        }
        commands::ENERGY_READ_INFO => {
            reply(command, Status::Success, &[1, 0, 0, 0, 0, 0, 0])
        }
        commands::ENERGY_READ_LATCH => reply(command, Status::Success, &[0; 18]),
        commands::ENERGY_LATCH_RESET_ALL => reply(command, Status::Success, &[]),
        commands::RESET => {
            if packet != [commands::RESET, commands::RESET, 0, 0x59, 0x6a].as_slice() {
                return reply(command, Status::InvalidParam, &[]);
            }
            let received = std::mem::take(&mut state.received);
            *state = MockState {
                received,
                ..MockState::default()
            };
            reply(command, Status::Success, &[])
        }
        _ => reply(command, Status::InvalidParam, &[]),
    }
}

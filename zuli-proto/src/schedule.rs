//! Schedules stored on the plug

use std::fmt;
use std::io;

use chrono::{NaiveTime, Timelike};

use crate::{commands, invalid, require_len};

/// Encoded size of a schedule
pub const SCHEDULE_LEN: usize = 10;

const WEEKDAY_SYMBOLS: [char; 7] = ['M', 'T', 'W', 'T', 'F', 'S', 'S'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    On,
    Off,
}

impl ScheduleAction {
    fn to_byte(self) -> u8 {
        match self {
            Self::On => 1,
            Self::Off => 2,
        }
    }

    fn from_byte(b: u8) -> io::Result<Self> {
        match b {
            1 => Ok(Self::On),
            2 => Ok(Self::Off),
            other => Err(invalid(format!("unknown schedule action {other}"))),
        }
    }
}

/// A rule that turns the plug on or off at a time of day on selected
/// weekdays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: u8,
    pub action: ScheduleAction,
    pub time: NaiveTime,
    /// Monday first. The plug itself counts weeks from Sunday.
    pub weekdays: [bool; 7],
    pub enabled: bool,
    pub schedule_id: u8,
}

impl Schedule {
    /// An enabled schedule that fires every day
    pub fn new(time: NaiveTime, action: ScheduleAction) -> Self {
        Self {
            id: 0,
            action,
            time,
            weekdays: [true; 7],
            enabled: true,
            schedule_id: 0,
        }
    }

    pub fn with_weekdays(mut self, weekdays: [bool; 7]) -> Self {
        self.weekdays = weekdays;
        self
    }

    fn weekday_bits(&self) -> u8 {
        self.weekdays
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .fold(0u8, |bits, (i, _)| bits | 1 << ((i + 1) % 7))
    }

    pub fn to_bytes(&self) -> [u8; SCHEDULE_LEN] {
        [
            self.id,
            self.action.to_byte(),
            0,
            0,
            self.time.hour() as u8,
            self.time.minute() as u8,
            self.time.second() as u8,
            self.weekday_bits(),
            u8::from(self.enabled),
            self.schedule_id,
        ]
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        require_len(data, SCHEDULE_LEN, "schedule")?;
        let action = ScheduleAction::from_byte(data[1])?;
        let time = NaiveTime::from_hms_opt(
            u32::from(data[4]),
            u32::from(data[5]),
            u32::from(data[6]),
        )
        .ok_or_else(|| invalid("schedule holds an impossible time"))?;

        let mut weekdays = [false; 7];
        for (i, day) in weekdays.iter_mut().enumerate() {
            let flag = 1u8 << ((i + 1) % 7);
            *day = data[7] & flag == flag;
        }

        Ok(Self {
            id: data[0],
            action,
            time,
            weekdays,
            enabled: data[8] == 1,
            schedule_id: data[9],
        })
    }

    /// The schedule without its identifiers, as the remove command wants it
    pub fn without_id(&self) -> [u8; 7] {
        let raw = self.to_bytes();
        let mut trimmed = [0u8; 7];
        trimmed.copy_from_slice(&raw[1..8]);
        trimmed
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            ScheduleAction::On => "Turn On",
            ScheduleAction::Off => "Turn Off",
        };
        let days: Vec<String> = WEEKDAY_SYMBOLS
            .iter()
            .zip(self.weekdays)
            .map(|(sym, set)| if set { sym.to_string() } else { "-".to_string() })
            .collect();
        let enabled = if self.enabled { "Enabled" } else { "Disabled" };
        write!(
            f,
            "{action}  {}  at {} ({enabled})",
            days.join(" "),
            self.time.format("%H:%M:%S")
        )
    }
}

/// Number of stored schedules and how many the plug can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInfo {
    pub count: u8,
    pub max: u8,
}

pub fn encode_add_schedule(schedule: &Schedule) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + SCHEDULE_LEN);
    packet.push(commands::SCHEDULE_ADD);
    packet.extend_from_slice(&schedule.to_bytes());
    packet
}

/// Fetch the `index`th schedule, counting from 1. Indices shift whenever
/// schedules are added or removed.
pub fn encode_get_schedule(index: u8) -> Vec<u8> {
    vec![commands::SCHEDULE_GET, index]
}

pub fn decode_get_schedule(response: &[u8]) -> io::Result<Schedule> {
    require_len(response, 2 + SCHEDULE_LEN, "schedule")?;
    Schedule::from_bytes(&response[2..])
}

pub fn encode_get_schedule_info() -> Vec<u8> {
    vec![commands::SCHEDULE_INFO_GET, 0]
}

pub fn decode_get_schedule_info(response: &[u8]) -> io::Result<ScheduleInfo> {
    require_len(response, 4, "schedule info")?;
    Ok(ScheduleInfo {
        count: response[2],
        max: response[3],
    })
}

pub fn encode_remove_schedule(schedule: &Schedule) -> Vec<u8> {
    let mut packet = vec![commands::SCHEDULE_REMOVE, 0];
    packet.extend_from_slice(&schedule.without_id());
    packet
}

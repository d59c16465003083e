//! Zuli smartplug protocol - command packets and response decoding
//!
//! Requests are short byte packets starting with a command byte. Responses
//! echo the command byte at `[0]`, carry a status at `[1]` and any payload
//! after that. Multi-byte integers are big-endian.

use std::fmt;
use std::io;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

pub mod ble;
mod energy;
mod schedule;

pub use energy::{
    EnergyInfo, LatchData, decode_read_energy_info, decode_read_latch, encode_read_energy_info,
    encode_read_latch, encode_remove_all_schedules, encode_reset_all_latches, encode_reset_plug,
};
pub use schedule::{
    Schedule, ScheduleAction, ScheduleInfo, decode_get_schedule, decode_get_schedule_info,
    encode_add_schedule, encode_get_schedule, encode_get_schedule_info, encode_remove_schedule,
};

/// Command bytes understood by the smartplug
pub mod commands {
    pub const RESET: u8 = 2;
    pub const VERSION_READ: u8 = 6;
    pub const FLAGS_READ: u8 = 7;
    pub const CLOCK_SET: u8 = 8;
    pub const CLOCK_GET: u8 = 9;
    pub const NETWORK_SET: u8 = 10;
    pub const NETWORK_GET: u8 = 11;
    pub const MODE_SET: u8 = 16;
    pub const MODE_GET: u8 = 17;
    pub const ATTRIBUTE_SET: u8 = 21;
    pub const ATTRIBUTE_GET: u8 = 22;
    pub const ON: u8 = 23;
    pub const OFF: u8 = 24;
    pub const READ: u8 = 25;
    pub const POWER_READ: u8 = 32;
    pub const ENERGY_READ_INFO: u8 = 33;
    pub const ENERGY_READ_ACCUM: u8 = 34;
    pub const ENERGY_READ_LATCH: u8 = 35;
    pub const ENERGY_LATCH_RESET_ALL: u8 = 36;
    pub const SCHEDULE_INFO_GET: u8 = 48;
    pub const SCHEDULE_GET: u8 = 49;
    pub const SCHEDULE_ENABLE: u8 = 50;
    pub const SCHEDULE_ADD: u8 = 51;
    pub const SCHEDULE_REMOVE: u8 = 52;
    pub const SCHEDULE_REMOVE_ALL: u8 = 53;
    pub const DEFAULT_OUTPUT_SET: u8 = 80;
    pub const DEFAULT_OUTPUT_GET: u8 = 81;
    pub const BOOKMARK: u8 = 126;
    pub const BATCH: u8 = 127;
}

/// Status byte carried at offset 1 of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Busy,
    InvalidParam,
    AlreadySet,
    BadLength,
    Other(u8),
}

impl Status {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Success,
            5 => Self::Busy,
            6 => Self::InvalidParam,
            9 => Self::AlreadySet,
            15 => Self::BadLength,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Busy => 5,
            Self::InvalidParam => 6,
            Self::AlreadySet => 9,
            Self::BadLength => 15,
            Self::Other(b) => b,
        }
    }

    /// "Already set" is reported when the plug is already in the requested
    /// state, which is as good as success for the caller.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::AlreadySet)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Busy => write!(f, "busy"),
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::AlreadySet => write!(f, "already set"),
            Self::BadLength => write!(f, "bad length"),
            Self::Other(b) => write!(f, "status {b}"),
        }
    }
}

/// Operating mode of the plug's output stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// High power loads that must not be dimmed
    Appliance,
    /// Dimmable lamps; brightness in `encode_on` is honoured
    Dimmable,
}

impl Mode {
    fn to_byte(self) -> u8 {
        match self {
            Self::Appliance => 0,
            Self::Dimmable => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Appliance),
            1 => Some(Self::Dimmable),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Appliance => write!(f, "appliance"),
            Self::Dimmable => write!(f, "dimmable"),
        }
    }
}

/// Instantaneous power reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Power {
    pub irms_ma: u16,
    pub power_mw: u32,
    pub power_factor: u16,
    pub voltage_mv: u32,
}

impl Power {
    pub fn watts(&self) -> f64 {
        f64::from(self.power_mw) / 1000.0
    }

    pub fn amps(&self) -> f64 {
        f64::from(self.irms_ma) / 1000.0
    }

    pub fn volts(&self) -> f64 {
        f64::from(self.voltage_mv) / 1000.0
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} W ({:.3} A, {:.3} V, pf {})",
            self.watts(),
            self.amps(),
            self.volts(),
            self.power_factor
        )
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Fails with `InvalidData` if `response` is shorter than `len` bytes.
pub(crate) fn require_len(response: &[u8], len: usize, what: &str) -> io::Result<()> {
    if response.len() < len {
        return Err(invalid(format!(
            "{what} response too short ({} of {len} bytes)",
            response.len()
        )));
    }
    Ok(())
}

pub(crate) fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Status of any response
pub fn decode_response_status(response: &[u8]) -> io::Result<Status> {
    require_len(response, 2, "status")?;
    Ok(Status::from_byte(response[1]))
}

/// Turn the plug on. `brightness` is clamped to 0..=100; 0 means full
/// brightness and is ignored in appliance mode.
pub fn encode_on(brightness: u8) -> Vec<u8> {
    vec![commands::ON, 0, 0, 0, 0, brightness.min(100), 0, 0, 0]
}

pub fn encode_off() -> Vec<u8> {
    vec![commands::OFF, 0, 0, 0]
}

pub fn encode_set_mode(mode: Mode) -> Vec<u8> {
    vec![commands::MODE_SET, mode.to_byte()]
}

/// Set the plug clock. The clock drives schedules and is lost on power
/// cycles.
pub fn encode_set_clock(time: &NaiveDateTime) -> Vec<u8> {
    let year = (time.year().clamp(0, i32::from(u16::MAX)) as u16).to_be_bytes();
    // plug weeks start on Sunday = 1
    let weekday = time.weekday().num_days_from_sunday() as u8 + 1;
    vec![
        commands::CLOCK_SET,
        year[0],
        year[1],
        time.month() as u8,
        time.day() as u8,
        weekday,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    ]
}

pub fn encode_get_clock() -> Vec<u8> {
    vec![commands::CLOCK_GET]
}

pub fn decode_get_clock(response: &[u8]) -> io::Result<NaiveDateTime> {
    require_len(response, 10, "clock")?;
    let year = be_uint(&response[2..4]) as i32;
    NaiveDate::from_ymd_opt(year, u32::from(response[4]), u32::from(response[5]))
        .and_then(|date| {
            date.and_hms_opt(
                u32::from(response[7]),
                u32::from(response[8]),
                u32::from(response[9]),
            )
        })
        .ok_or_else(|| invalid("clock response holds an impossible date"))
}

pub fn encode_read_power() -> Vec<u8> {
    vec![commands::POWER_READ]
}

pub fn decode_read_power(response: &[u8]) -> io::Result<Power> {
    require_len(response, 12, "power")?;
    Ok(Power {
        irms_ma: be_uint(&response[2..4]) as u16,
        power_mw: be_uint(&response[4..7]) as u32,
        power_factor: be_uint(&response[7..9]) as u16,
        voltage_mv: be_uint(&response[9..12]) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_clamps_brightness() {
        assert_eq!(encode_on(40), vec![23, 0, 0, 0, 0, 40, 0, 0, 0]);
        assert_eq!(encode_on(250), vec![23, 0, 0, 0, 0, 100, 0, 0, 0]);
        assert_eq!(encode_off(), vec![24, 0, 0, 0]);
    }

    #[test]
    fn mode_bytes() {
        assert_eq!(encode_set_mode(Mode::Appliance), vec![16, 0]);
        assert_eq!(encode_set_mode(Mode::Dimmable), vec![16, 1]);
    }

    #[test]
    fn set_clock_uses_sunday_first_weekday() {
        // 2024-05-05 is a Sunday, 2024-05-11 a Saturday
        let sunday = NaiveDate::from_ymd_opt(2024, 5, 5)
            .unwrap()
            .and_hms_opt(7, 30, 15)
            .unwrap();
        assert_eq!(
            encode_set_clock(&sunday),
            vec![8, 0x07, 0xe8, 5, 5, 1, 7, 30, 15]
        );

        let saturday = NaiveDate::from_ymd_opt(2024, 5, 11)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(encode_set_clock(&saturday)[5], 7);
    }

    #[test]
    fn get_clock_decodes_response() {
        let response = [9, 0, 0x07, 0xe8, 12, 31, 3, 18, 4, 5];
        let time = decode_get_clock(&response).unwrap();
        assert_eq!(time.to_string(), "2024-12-31 18:04:05");
    }

    #[test]
    fn get_clock_rejects_bad_dates() {
        let response = [9, 0, 0x07, 0xe8, 13, 1, 3, 0, 0, 0];
        assert!(decode_get_clock(&response).is_err());
        assert!(decode_get_clock(&[9, 0, 0x07]).is_err());
    }

    #[test]
    fn power_decodes_big_endian_fields() {
        let response = [32, 0, 0x00, 0x69, 0x00, 0x30, 0x39, 0x03, 0xb6, 0x01, 0xd4, 0xc0];
        let power = decode_read_power(&response).unwrap();
        assert_eq!(
            power,
            Power {
                irms_ma: 105,
                power_mw: 12345,
                power_factor: 950,
                voltage_mv: 120000,
            }
        );
        assert_eq!(power.to_string(), "12.345 W (0.105 A, 120.000 V, pf 950)");
    }

    #[test]
    fn power_rejects_truncated_response() {
        let err = decode_read_power(&[32, 0, 1, 2]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn status_success_includes_already_set() {
        assert!(decode_response_status(&[23, 0]).unwrap().is_success());
        assert!(decode_response_status(&[23, 9]).unwrap().is_success());
        assert_eq!(decode_response_status(&[23, 5]).unwrap(), Status::Busy);
        assert!(!Status::Other(42).is_success());
        assert!(decode_response_status(&[23]).is_err());
    }
}

//! Energy metering, bulk removal and reset packets
//!
//! These were recovered from the vendor's Android app and have not been
//! confirmed against real hardware. The confirm codes guard destructive
//! commands against stray writes.

use std::io;

use crate::{be_uint, commands, require_len};

const CONFIRM_REMOVE_ALL: u16 = 46140;
const CONFIRM_RESET_LATCHES: u16 = 5693;
const CONFIRM_RESET: u16 = 22890;

/// Energy meter summary. Field meanings are not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyInfo {
    pub field_a: u8,
    pub field_b: u8,
    pub field_c: u16,
    pub field_d: u16,
}

/// One latched energy sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchData {
    pub value: u64,
    pub duration: u64,
    pub unix_time_sec: u32,
    pub unix_time_ms: u16,
}

pub fn encode_remove_all_schedules() -> Vec<u8> {
    let mut packet = vec![commands::SCHEDULE_REMOVE_ALL];
    packet.extend_from_slice(&CONFIRM_REMOVE_ALL.to_be_bytes());
    packet
}

pub fn encode_read_energy_info() -> Vec<u8> {
    vec![commands::ENERGY_READ_INFO, 0]
}

pub fn decode_read_energy_info(response: &[u8]) -> io::Result<EnergyInfo> {
    require_len(response, 9, "energy info")?;
    Ok(EnergyInfo {
        field_a: response[2],
        field_b: response[4],
        field_c: be_uint(&response[5..7]) as u16,
        field_d: be_uint(&response[7..9]) as u16,
    })
}

pub fn encode_read_latch(latch_id: u16) -> Vec<u8> {
    let mut packet = vec![commands::ENERGY_READ_LATCH, 0];
    packet.extend_from_slice(&latch_id.to_be_bytes());
    packet
}

pub fn decode_read_latch(response: &[u8]) -> io::Result<LatchData> {
    require_len(response, 20, "latch")?;
    Ok(LatchData {
        value: be_uint(&response[2..9]),
        duration: be_uint(&response[9..14]),
        unix_time_sec: be_uint(&response[14..18]) as u32,
        unix_time_ms: be_uint(&response[18..20]) as u16,
    })
}

pub fn encode_reset_all_latches(num_latches: u16) -> Vec<u8> {
    let mut packet = vec![commands::ENERGY_LATCH_RESET_ALL, 0];
    packet.extend_from_slice(&num_latches.to_be_bytes());
    packet.extend_from_slice(&CONFIRM_RESET_LATCHES.to_be_bytes());
    packet
}

/// Factory reset
pub fn encode_reset_plug() -> Vec<u8> {
    let mut packet = vec![commands::RESET, commands::RESET, 0];
    packet.extend_from_slice(&CONFIRM_RESET.to_be_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_codes() {
        assert_eq!(encode_remove_all_schedules(), vec![53, 0xb4, 0x3c]);
        assert_eq!(encode_reset_all_latches(4), vec![36, 0, 0, 4, 0x16, 0x3d]);
        assert_eq!(encode_reset_plug(), vec![2, 2, 0, 0x59, 0x6a]);
    }

    #[test]
    fn latch_request_and_response() {
        assert_eq!(encode_read_latch(0x0102), vec![35, 0, 1, 2]);

        let mut response = vec![35, 0];
        response.extend_from_slice(&[0, 0, 0, 0, 0, 0x01, 0x00]); // value
        response.extend_from_slice(&[0, 0, 0, 0x0e, 0x10]); // duration
        response.extend_from_slice(&0x6632_1f00u32.to_be_bytes());
        response.extend_from_slice(&250u16.to_be_bytes());
        let latch = decode_read_latch(&response).unwrap();
        assert_eq!(latch.value, 256);
        assert_eq!(latch.duration, 3600);
        assert_eq!(latch.unix_time_sec, 0x6632_1f00);
        assert_eq!(latch.unix_time_ms, 250);

        assert!(decode_read_latch(&response[..19]).is_err());
    }

    #[test]
    fn energy_info_skips_byte_three() {
        assert_eq!(encode_read_energy_info(), vec![33, 0]);
        let info = decode_read_energy_info(&[33, 0, 7, 0xff, 2, 0, 10, 1, 0]).unwrap();
        assert_eq!(
            info,
            EnergyInfo {
                field_a: 7,
                field_b: 2,
                field_c: 10,
                field_d: 256,
            }
        );
    }
}

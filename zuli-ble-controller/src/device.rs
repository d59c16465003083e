//! One smartplug and the operations it supports

use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use log::{debug, warn};
use zuli_proto::{
    EnergyInfo, LatchData, Mode, Power, Schedule, ScheduleInfo, decode_get_clock,
    decode_get_schedule, decode_get_schedule_info, decode_read_energy_info, decode_read_latch,
    decode_read_power, decode_response_status,
};

use crate::error::{ControllerError, Result};
use crate::pipe::CommandPipe;

/// Output stage as last commanded by us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Off,
    /// Brightness 0 means full brightness
    On { brightness: u8 },
}

/// What we last learned about a plug. Nothing here is read back on its own;
/// fields are updated as operations succeed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub output: Option<Output>,
    pub mode: Option<Mode>,
    pub power: Option<Power>,
    /// Plug clock minus host clock
    pub clock_offset: Option<TimeDelta>,
}

pub struct Device<P> {
    id: String,
    pipe: P,
    timeout: Duration,
    state: Mutex<DeviceState>,
}

impl<P: CommandPipe> Device<P> {
    pub fn new(id: impl Into<String>, pipe: P, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            pipe,
            timeout,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Platform address, or platform UUID where the address is hidden
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    pub fn state(&self) -> DeviceState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut DeviceState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub async fn is_connected(&self) -> bool {
        self.pipe.is_connected().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.pipe.disconnect().await
    }

    async fn send(&self, packet: &[u8]) -> Result<Vec<u8>> {
        debug!("{} <- {:02x?}", self.id, packet);
        let response = tokio::time::timeout(self.timeout, self.pipe.transact(packet))
            .await
            .map_err(|_| ControllerError::Timeout(self.timeout))??;
        debug!("{} -> {:02x?}", self.id, response);

        let status = decode_response_status(&response)?;
        if !status.is_success() {
            return Err(ControllerError::Rejected(status));
        }
        Ok(response)
    }

    async fn query<T>(&self, packet: &[u8], decode: fn(&[u8]) -> io::Result<T>) -> Result<T> {
        let response = self.send(packet).await?;
        Ok(decode(&response)?)
    }

    pub async fn on(&self, brightness: u8) -> Result<()> {
        self.send(&zuli_proto::encode_on(brightness)).await?;
        let brightness = brightness.min(100);
        self.update(|s| s.output = Some(Output::On { brightness }));
        Ok(())
    }

    pub async fn off(&self) -> Result<()> {
        self.send(&zuli_proto::encode_off()).await?;
        self.update(|s| s.output = Some(Output::Off));
        Ok(())
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.send(&zuli_proto::encode_set_mode(mode)).await?;
        self.update(|s| s.mode = Some(mode));
        Ok(())
    }

    /// Set the plug clock to the host's local time
    pub async fn sync_clock(&self) -> Result<()> {
        self.set_clock(Local::now().naive_local()).await
    }

    pub async fn set_clock(&self, time: NaiveDateTime) -> Result<()> {
        self.send(&zuli_proto::encode_set_clock(&time)).await?;
        let offset = time - Local::now().naive_local();
        // anything under a second is transit time, not drift
        let offset = if offset.num_seconds() == 0 {
            TimeDelta::zero()
        } else {
            offset
        };
        self.update(|s| s.clock_offset = Some(offset));
        Ok(())
    }

    pub async fn get_clock(&self) -> Result<NaiveDateTime> {
        let time = self
            .query(&zuli_proto::encode_get_clock(), decode_get_clock)
            .await?;
        let offset = time - Local::now().naive_local();
        self.update(|s| s.clock_offset = Some(offset));
        Ok(time)
    }

    pub async fn read_power(&self) -> Result<Power> {
        let power = self
            .query(&zuli_proto::encode_read_power(), decode_read_power)
            .await?;
        self.update(|s| s.power = Some(power));
        Ok(power)
    }

    pub async fn schedule_info(&self) -> Result<ScheduleInfo> {
        self.query(
            &zuli_proto::encode_get_schedule_info(),
            decode_get_schedule_info,
        )
        .await
    }

    /// Schedule at `index`, counting from 1
    pub async fn get_schedule(&self, index: u8) -> Result<Schedule> {
        self.query(&zuli_proto::encode_get_schedule(index), decode_get_schedule)
            .await
    }

    /// Every stored schedule with its plug index, in plug order. An entry
    /// that fails to read keeps its slot so indices still match
    /// `remove_schedule`.
    pub async fn schedules(&self) -> Result<Vec<(u8, Result<Schedule>)>> {
        let info = self.schedule_info().await?;
        let mut schedules = Vec::with_capacity(usize::from(info.count));
        for index in 1..=info.count {
            let schedule = self.get_schedule(index).await;
            if let Err(e) = &schedule {
                warn!("{}: reading schedule {index} failed: {e}", self.id);
            }
            schedules.push((index, schedule));
        }
        Ok(schedules)
    }

    pub async fn add_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.send(&zuli_proto::encode_add_schedule(schedule))
            .await
            .map(drop)
    }

    /// Remove the schedule at `index` (counting from 1). The plug removes
    /// by content, so the schedule is read first.
    pub async fn remove_schedule(&self, index: u8) -> Result<()> {
        let info = self.schedule_info().await?;
        if index == 0 || index > info.count {
            return Err(ControllerError::NoSuchSchedule {
                index,
                count: info.count,
            });
        }
        let schedule = self.get_schedule(index).await?;
        self.send(&zuli_proto::encode_remove_schedule(&schedule))
            .await
            .map(drop)
    }

    pub async fn remove_all_schedules(&self) -> Result<()> {
        self.send(&zuli_proto::encode_remove_all_schedules())
            .await
            .map(drop)
    }

    pub async fn read_energy_info(&self) -> Result<EnergyInfo> {
        self.query(
            &zuli_proto::encode_read_energy_info(),
            decode_read_energy_info,
        )
        .await
    }

    pub async fn read_latch(&self, latch_id: u16) -> Result<LatchData> {
        self.query(&zuli_proto::encode_read_latch(latch_id), decode_read_latch)
            .await
    }

    pub async fn reset_all_latches(&self, num_latches: u16) -> Result<()> {
        self.send(&zuli_proto::encode_reset_all_latches(num_latches))
            .await
            .map(drop)
    }

    /// Factory reset. Forgets schedules, mode and clock.
    pub async fn reset(&self) -> Result<()> {
        self.send(&zuli_proto::encode_reset_plug()).await?;
        self.update(|s| *s = DeviceState::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlug;
    use chrono::{NaiveDate, NaiveTime};
    use zuli_proto::{ScheduleAction, Status};

    fn device() -> Device<MockPlug> {
        Device::new("AA:BB:CC:00:00:01", MockPlug::new(), Duration::from_secs(1))
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn on_off_track_output() {
        let device = device();
        device.on(150).await.unwrap();
        assert_eq!(device.state().output, Some(Output::On { brightness: 100 }));
        assert_eq!(device.pipe().state().output, Some(100));

        device.off().await.unwrap();
        assert_eq!(device.state().output, Some(Output::Off));
        // already off is still a success
        device.off().await.unwrap();
        assert_eq!(device.pipe().state().output, None);
    }

    #[tokio::test]
    async fn rejected_status_is_an_error() {
        let device = device();
        device.pipe().update(|s| s.forced_status = Some(Status::Busy));
        match device.on(0).await {
            Err(ControllerError::Rejected(Status::Busy)) => {}
            other => panic!("expected busy rejection, got {other:?}"),
        }
        assert_eq!(device.state().output, None);
    }

    #[tokio::test]
    async fn clock_round_trip() {
        let device = device();
        let time = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(1, 59, 26)
            .unwrap();
        device.set_clock(time).await.unwrap();
        assert_eq!(device.pipe().state().clock, time);
        assert_eq!(device.get_clock().await.unwrap(), time);
        assert!(device.state().clock_offset.unwrap() < TimeDelta::zero());

        device.sync_clock().await.unwrap();
        assert_eq!(device.state().clock_offset, Some(TimeDelta::zero()));
    }

    #[tokio::test]
    async fn power_is_cached() {
        let device = device();
        device.on(0).await.unwrap();
        let power = device.read_power().await.unwrap();
        assert_eq!(power, device.pipe().state().power);
        assert_eq!(device.state().power, Some(power));
    }

    #[tokio::test]
    async fn schedules_add_list_remove() {
        let device = device();
        let wake = Schedule::new(at(7, 0), ScheduleAction::On);
        let sleep = Schedule::new(at(23, 0), ScheduleAction::Off)
            .with_weekdays([true, true, true, true, true, false, false]);
        device.add_schedule(&wake).await.unwrap();
        device.add_schedule(&sleep).await.unwrap();

        let listed = device.schedules().await.unwrap();
        assert_eq!(listed.len(), 2);
        let (index, second) = &listed[1];
        let second = second.as_ref().unwrap();
        assert_eq!(*index, 2);
        assert_eq!(second.time, at(23, 0));
        assert_eq!(second.weekdays, sleep.weekdays);

        device.remove_schedule(1).await.unwrap();
        let listed = device.schedules().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, 1);
        assert_eq!(listed[0].1.as_ref().unwrap().action, ScheduleAction::Off);

        match device.remove_schedule(4).await {
            Err(ControllerError::NoSuchSchedule { index: 4, count: 1 }) => {}
            other => panic!("expected missing schedule, got {other:?}"),
        }

        device.remove_all_schedules().await.unwrap();
        assert_eq!(device.schedule_info().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn unreadable_schedule_keeps_its_index() {
        let device = device();
        for hour in 1..=3 {
            device
                .add_schedule(&Schedule::new(at(hour, 0), ScheduleAction::On))
                .await
                .unwrap();
        }
        device
            .pipe()
            .update(|s| s.truncate_once.push(zuli_proto::encode_get_schedule(2)));

        let listed = device.schedules().await.unwrap();
        let indices: Vec<u8> = listed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(matches!(listed[1].1, Err(ControllerError::Malformed(_))));
        assert_eq!(listed[2].1.as_ref().unwrap().time, at(3, 0));

        // index 3 is still the 03:00 entry the listing showed
        device.remove_schedule(3).await.unwrap();
        let times: Vec<NaiveTime> = device
            .schedules()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, s)| s.unwrap().time)
            .collect();
        assert_eq!(times, vec![at(1, 0), at(2, 0)]);
    }

    #[tokio::test]
    async fn unresponsive_plug_times_out() {
        let device = Device::new("slow", MockPlug::new(), Duration::from_millis(20));
        device.pipe().update(|s| s.responsive = false);
        match device.read_power().await {
            Err(ControllerError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnected_plug_fails() {
        let device = device();
        device.disconnect().await.unwrap();
        assert!(!device.is_connected().await);
        assert!(matches!(
            device.off().await,
            Err(ControllerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn reset_forgets_state() {
        let device = device();
        device.set_mode(Mode::Dimmable).await.unwrap();
        device
            .add_schedule(&Schedule::new(at(6, 30), ScheduleAction::On))
            .await
            .unwrap();
        device.reset().await.unwrap();
        assert_eq!(device.state(), DeviceState::default());
        assert_eq!(device.schedule_info().await.unwrap().count, 0);
        assert_eq!(device.pipe().state().mode, Mode::Appliance);
    }

    #[tokio::test]
    async fn energy_reads() {
        let device = device();
        assert_eq!(device.read_energy_info().await.unwrap().field_a, 1);
        assert_eq!(device.read_latch(0).await.unwrap().value, 0);
        device.reset_all_latches(1).await.unwrap();
        assert_eq!(
            device.pipe().state().received.last().map(|p| p[0]),
            Some(zuli_proto::commands::ENERGY_LATCH_RESET_ALL)
        );
    }
}

//! Routes parsed commands to plug operations and prints the results

use std::io::{self, Write};
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::{Stream, StreamExt};
use log::debug;
use zuli_ble_controller::{CommandPipe, ControllerError, Device, Registry, fan_out};
use zuli_proto::{Mode, Power, Schedule};

use crate::command::{Command, Target};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(
        "argument {{{}}}: invalid choice: '{input}' (choose from {})",
        .choices.join(","),
        quoted(.choices)
    )]
    InvalidChoice { input: String, choices: Vec<String> },
    #[error("{0}")]
    Usage(#[from] clap::Error),
    #[error("no devices discovered yet")]
    NoDevices,
    #[error("no devices match {}", .0.join(" "))]
    NoMatch(Vec<String>),
    #[error("schedule numbers are per device; {0} devices selected, pick one with -d")]
    NotOneDevice(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn quoted(choices: &[String]) -> String {
    choices
        .iter()
        .map(|c| format!("'{c}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

async fn targets<P: CommandPipe>(
    registry: &Registry<P>,
    target: &Target,
) -> Result<Vec<Arc<Device<P>>>, DispatchError> {
    if registry.is_empty().await {
        return Err(DispatchError::NoDevices);
    }
    let devices = registry.select(&target.devices).await;
    if devices.is_empty() {
        return Err(DispatchError::NoMatch(target.devices.clone()));
    }
    Ok(devices)
}

/// One result per device; multi-line results get a header block
fn write_result<W: Write>(out: &mut W, id: &str, body: &str) -> io::Result<()> {
    if body.contains('\n') {
        writeln!(out, "\n==== {id} ====\n")?;
        writeln!(out, "{body}")
    } else {
        writeln!(out, "{id} : {body}")
    }
}

fn failure(e: &ControllerError) -> String {
    format!("Failure ({e})")
}

async fn report<T, S, W>(out: &mut W, mut results: S, render: impl Fn(T) -> String) -> io::Result<()>
where
    S: Stream<Item = (String, Result<T, ControllerError>)> + Unpin,
    W: Write,
{
    while let Some((id, result)) = results.next().await {
        let body = match result {
            Ok(value) => render(value),
            Err(e) => failure(&e),
        };
        write_result(out, &id, &body)?;
        out.flush()?;
    }
    Ok(())
}

fn success(_: ()) -> String {
    "Success".to_string()
}

/// Numbers are the plug's own indices, the ones `remove_schedule` takes
fn render_schedules(schedules: Vec<(u8, Result<Schedule, ControllerError>)>) -> String {
    if schedules.is_empty() {
        return "No schedules".to_string();
    }
    schedules
        .iter()
        .map(|(index, schedule)| match schedule {
            Ok(s) => format!("{index}. {s}"),
            Err(e) => format!("{index}. <unreadable: {e}>"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn dispatch<P, W>(
    registry: &Registry<P>,
    command: Command,
    out: &mut W,
) -> Result<Flow, DispatchError>
where
    P: CommandPipe,
    W: Write,
{
    debug!("dispatching {command:?}");
    match command {
        Command::Quit => return Ok(Flow::Quit),
        Command::Devices => {
            for id in registry.ids().await {
                writeln!(out, "{id}")?;
            }
        }
        Command::On { target, brightness } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.on(brightness).await });
            report(out, results, success).await?;
        }
        Command::Off { target } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.off().await });
            report(out, results, success).await?;
        }
        Command::Mode { target, mode } => {
            let devices = targets(registry, &target).await?;
            let mode: Mode = mode.into();
            let results = fan_out(&devices, |d| async move { d.set_mode(mode).await });
            report(out, results, success).await?;
        }
        Command::Power { target } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.read_power().await });
            report(out, results, |power: Power| power.to_string()).await?;
        }
        Command::Time { target } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.get_clock().await });
            report(out, results, |time: NaiveDateTime| {
                time.format("%Y-%m-%d %H:%M:%S").to_string()
            })
            .await?;
        }
        Command::Synctime { target } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.sync_clock().await });
            report(out, results, success).await?;
        }
        Command::Schedules { target } => {
            let devices = targets(registry, &target).await?;
            let results = fan_out(&devices, |d| async move { d.schedules().await });
            report(out, results, render_schedules).await?;
        }
        Command::RemoveSchedule { target, index } => {
            let devices = targets(registry, &target).await?;
            let [device] = devices.as_slice() else {
                return Err(DispatchError::NotOneDevice(devices.len()));
            };
            let body = match device.remove_schedule(index).await {
                Ok(()) => success(()),
                Err(e) => failure(&e),
            };
            write_result(out, device.id(), &body)?;
        }
        Command::AddSchedule {
            target,
            time,
            action,
            weekdays,
        } => {
            let devices = targets(registry, &target).await?;
            let mut schedule = Schedule::new(time, action.into());
            if let Some(weekdays) = weekdays {
                schedule = schedule.with_weekdays(weekdays.0);
            }
            let results = fan_out(&devices, |d| {
                let schedule = schedule.clone();
                async move { d.add_schedule(&schedule).await }
            });
            report(out, results, success).await?;
        }
    }
    Ok(Flow::Continue)
}

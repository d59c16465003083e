//! REPL line grammar

use chrono::NaiveTime;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use zuli_proto::{Mode, ScheduleAction};

use crate::dispatch::DispatchError;

#[derive(Parser, Debug)]
#[command(name = "zuli", no_binary_name = true, disable_help_subcommand = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Turn plugs on
    On {
        #[command(flatten)]
        target: Target,
        /// Brightness in percent, clamped to 0-100; 0 is full brightness.
        /// Ignored in appliance mode
        #[arg(default_value_t = 0, value_parser = parse_brightness, allow_negative_numbers = true)]
        brightness: u8,
    },
    /// Turn plugs off
    Off {
        #[command(flatten)]
        target: Target,
    },
    /// Set the operating mode
    Mode {
        #[command(flatten)]
        target: Target,
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Read the current power draw
    Power {
        #[command(flatten)]
        target: Target,
    },
    /// Read the plug clock
    Time {
        #[command(flatten)]
        target: Target,
    },
    /// Set the plug clock to this machine's local time
    Synctime {
        #[command(flatten)]
        target: Target,
    },
    /// List stored schedules
    Schedules {
        #[command(flatten)]
        target: Target,
    },
    /// Remove a schedule by its number in `schedules`
    #[command(name = "remove_schedule")]
    RemoveSchedule {
        #[command(flatten)]
        target: Target,
        index: u8,
    },
    /// Add a schedule
    #[command(name = "add_schedule")]
    AddSchedule {
        #[command(flatten)]
        target: Target,
        /// HH:MM or HH:MM:SS
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
        #[arg(value_enum)]
        action: ActionArg,
        /// Days to fire on, Monday first; '-' skips a day (e.g. MTWTF--)
        #[arg(short, long, value_parser = parse_weekdays)]
        weekdays: Option<Weekdays>,
    },
    /// List discovered plugs
    Devices,
    /// Close all connections and exit
    Quit,
}

/// Device selection shared by every plug command
#[derive(Args, Debug, Default, PartialEq)]
pub struct Target {
    /// Address or UUID prefixes of the plugs to address (default: all)
    #[arg(short = 'd', long = "devices", num_args = 1.., action = ArgAction::Append)]
    pub devices: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum ModeArg {
    Dimmable,
    Appliance,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dimmable => Mode::Dimmable,
            ModeArg::Appliance => Mode::Appliance,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum ActionArg {
    On,
    Off,
}

impl From<ActionArg> for ScheduleAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::On => ScheduleAction::On,
            ActionArg::Off => ScheduleAction::Off,
        }
    }
}

/// Monday-first day mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weekdays(pub [bool; 7]);

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("'{s}' is not a time of day (HH:MM or HH:MM:SS)"))
}

fn parse_brightness(s: &str) -> Result<u8, String> {
    let level: i64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a whole number"))?;
    Ok(level.clamp(0, 100) as u8)
}

fn parse_weekdays(s: &str) -> Result<Weekdays, String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() != 7 {
        return Err(format!("'{s}' must have one character per day, Monday first"));
    }
    let mut days = [false; 7];
    for (day, c) in days.iter_mut().zip(chars) {
        *day = c != '-';
    }
    Ok(Weekdays(days))
}

/// Command names in the order they are offered
pub fn choices() -> Vec<String> {
    Line::command()
        .get_subcommands()
        .map(|c| c.get_name().to_string())
        .collect()
}

/// Parses one whitespace-split REPL line
pub fn parse(tokens: &[&str]) -> Result<Command, DispatchError> {
    if let Some(first) = tokens.first() {
        let choices = choices();
        if !first.starts_with('-') && !choices.iter().any(|c| c == first) {
            return Err(DispatchError::InvalidChoice {
                input: first.to_string(),
                choices,
            });
        }
    }
    Ok(Line::try_parse_from(tokens)?.command)
}

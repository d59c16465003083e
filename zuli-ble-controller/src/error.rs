use std::time::Duration;

use zuli_proto::Status;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("bluetooth: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no bluetooth adapter at index {0}")]
    NoAdapter(usize),
    #[error("command pipe characteristic not found")]
    PipeNotFound,
    #[error("not connected")]
    NotConnected,
    #[error("malformed response: {0}")]
    Malformed(#[from] std::io::Error),
    #[error("plug answered {0}")]
    Rejected(Status),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("schedule {index} does not exist (plug has {count})")]
    NoSuchSchedule { index: u8, count: u8 },
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

//! Zuli BLE Controller
//!
//! Discovers Zuli smartplugs, keeps a connection open to each of them and
//! runs protocol operations against one or many plugs at once.
//!
//! # Example
//!
//! ```ignore
//! use zuli_ble_controller::{Session, SessionConfig, fan_out};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::start(&SessionConfig::default()).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     // Turn every plug on
//!     let devices = session.registry().select(&[]).await;
//!     let mut results = fan_out(&devices, |d| async move { d.on(0).await });
//!     while let Some((id, result)) = results.next().await {
//!         println!("{id}: {result:?}");
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

mod device;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod pipe;
mod registry;
mod session;

pub use device::{Device, DeviceState, Output};
pub use error::{ControllerError, Result};
pub use pipe::CommandPipe;
pub use registry::{Registry, fan_out};
pub use session::{BlePlug, Session, SessionConfig};

use std::future::Future;

use crate::error::Result;

/// A connection to one smartplug's command pipe.
///
/// A transaction writes one request packet (with response) and then reads
/// the reply from the same characteristic. Implementations do not retry.
pub trait CommandPipe: Send + Sync + 'static {
    fn transact(&self, packet: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

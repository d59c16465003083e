//! BLE session: adapter, background discovery and persistent connections

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::OnceCell;
use tokio::task::{JoinHandle, JoinSet};
use zuli_proto::ble::{COMMAND_PIPE, ZULI_SERVICE};

use crate::device::Device;
use crate::error::{ControllerError, Result};
use crate::pipe::CommandPipe;
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Index into the host's bluetooth adapters
    pub adapter_index: usize,
    /// Upper bound on a single command pipe transaction
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// A smartplug reached through btleplug
pub struct BlePlug {
    peripheral: Peripheral,
    command_pipe: OnceCell<Characteristic>,
    connecting: AtomicBool,
}

impl BlePlug {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            command_pipe: OnceCell::new(),
            connecting: AtomicBool::new(false),
        }
    }

    fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// Connects and resolves services. A second call while the first is
    /// still running returns `Ok(false)` immediately.
    async fn connect(&self) -> Result<bool> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let result = async {
            self.peripheral.connect().await?;
            self.peripheral.discover_services().await?;
            Ok::<_, ControllerError>(true)
        }
        .await;
        self.connecting.store(false, Ordering::Release);
        result
    }

    async fn command_pipe(&self) -> Result<&Characteristic> {
        self.command_pipe
            .get_or_try_init(|| async {
                self.peripheral
                    .characteristics()
                    .into_iter()
                    .find(|c| c.uuid == COMMAND_PIPE)
                    .ok_or(ControllerError::PipeNotFound)
            })
            .await
    }
}

impl CommandPipe for BlePlug {
    async fn transact(&self, packet: &[u8]) -> Result<Vec<u8>> {
        if !self.peripheral.is_connected().await? {
            return Err(ControllerError::NotConnected);
        }
        let pipe = self.command_pipe().await?;
        self.peripheral
            .write(pipe, packet, WriteType::WithResponse)
            .await?;
        Ok(self.peripheral.read(pipe).await?)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(self.peripheral.disconnect().await?)
    }
}

/// Platform address, or the platform's peripheral UUID where the address
/// is hidden (macOS reports all-zero addresses).
fn identifier(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address.into_inner() == [0u8; 6] {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

type Events = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Process-wide BLE state. Devices keep connecting in the background for as
/// long as the session lives; `close` is the only way to tear it down.
pub struct Session {
    adapter: Adapter,
    registry: Arc<Registry<BlePlug>>,
    discovery: JoinHandle<()>,
}

impl Session {
    pub async fn start(config: &SessionConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(ControllerError::NoAdapter(config.adapter_index))?;
        match adapter.adapter_info().await {
            Ok(info) => info!("using bluetooth adapter {info}"),
            Err(e) => debug!("adapter info unavailable: {e}"),
        }

        let events = adapter.events().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![ZULI_SERVICE],
            })
            .await?;

        let registry = Arc::new(Registry::new());
        let discovery = tokio::spawn(discover(
            adapter.clone(),
            events,
            registry.clone(),
            config.command_timeout,
        ));

        Ok(Self {
            adapter,
            registry,
            discovery,
        })
    }

    pub fn registry(&self) -> &Registry<BlePlug> {
        &self.registry
    }

    /// Stops discovery and disconnects every device
    pub async fn close(self) {
        self.discovery.abort();
        let _ = self.discovery.await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("stopping scan failed: {e}");
        }

        self.registry.disconnect_all().await;
    }
}

async fn discover(
    adapter: Adapter,
    events: Events,
    registry: Arc<Registry<BlePlug>>,
    timeout: Duration,
) {
    let (adapter, registry) = (&adapter, &registry);
    run_discovery(events, move |event| async move {
        let id = match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::DeviceDisconnected(id) => id,
            _ => return None,
        };
        match track(adapter, &id, registry, timeout).await {
            Ok(device) => device.map(connect),
            Err(e) => {
                debug!("ignoring {id:?}: {e}");
                None
            }
        }
    })
    .await;
}

/// Feeds events to `track` and runs the connects it asks for. Connect
/// tasks are owned by this loop: aborting it aborts them as well, so no
/// connection can complete after the session is closed.
async fn run_discovery<E, T, F, C>(mut events: impl Stream<Item = E> + Unpin, mut track: T)
where
    T: FnMut(E) -> F,
    F: Future<Output = Option<C>>,
    C: Future<Output = ()> + Send + 'static,
{
    let mut connects = JoinSet::new();
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if let Some(connect) = track(event).await {
                    connects.spawn(connect);
                }
            }
            Some(joined) = connects.join_next(), if !connects.is_empty() => {
                if let Err(e) = joined {
                    warn!("connect task failed: {e}");
                }
            }
        }
    }
    debug!("adapter event stream ended");
    while connects.join_next().await.is_some() {}
}

async fn connect(device: Arc<Device<BlePlug>>) {
    match device.pipe().connect().await {
        Ok(true) => info!("connected to {}", device.id()),
        Ok(false) => {}
        Err(e) => warn!("connecting to {} failed: {e}", device.id()),
    }
}

/// Registers a peripheral advertising the Zuli service. Returns the device
/// when it needs a connection attempt.
async fn track(
    adapter: &Adapter,
    id: &PeripheralId,
    registry: &Registry<BlePlug>,
    timeout: Duration,
) -> Result<Option<Arc<Device<BlePlug>>>> {
    let peripheral = adapter.peripheral(id).await?;
    let key = identifier(&peripheral);

    let device = match registry.get(&key).await {
        Some(device) => {
            if device.pipe().is_connecting() || device.is_connected().await {
                return Ok(None);
            }
            info!("{key} is not connected; reconnecting");
            device
        }
        None => {
            let advertised = peripheral
                .properties()
                .await?
                .is_some_and(|props| props.services.contains(&ZULI_SERVICE));
            if !advertised {
                return Ok(None);
            }
            info!("discovered smartplug {key}");
            registry
                .insert(Device::new(key, BlePlug::new(peripheral), timeout))
                .await
        }
    };
    Ok(Some(device))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn discovery_runs_requested_connects() {
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = connected.clone();
        run_discovery(stream::iter(0..4u8), move |n| {
            let counter = counter.clone();
            async move {
                (n % 2 == 0).then(|| async move {
                    counter.fetch_add(1, Ordering::AcqRel);
                })
            }
        })
        .await;
        assert_eq!(connected.load(Ordering::Acquire), 2);
    }

    #[tokio::test]
    async fn aborting_discovery_cancels_connects() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let events = stream::iter([1u8]).chain(stream::pending());
        let discovery = tokio::spawn(run_discovery(events, move |_| {
            let flag = flag.clone();
            async move {
                Some(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::Release);
                })
            }
        }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        discovery.abort();
        assert!(discovery.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::Acquire));
    }
}

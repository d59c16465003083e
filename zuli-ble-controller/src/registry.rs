//! Discovered devices, keyed by identifier

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::Stream;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use log::{debug, warn};
use tokio::sync::RwLock;

use crate::device::Device;
use crate::error::Result;
use crate::pipe::CommandPipe;

pub struct Registry<P> {
    devices: RwLock<BTreeMap<String, Arc<Device<P>>>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<P: CommandPipe> Registry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device, replacing any earlier device with the same identifier
    pub async fn insert(&self, device: Device<P>) -> Arc<Device<P>> {
        let device = Arc::new(device);
        self.devices
            .write()
            .await
            .insert(device.id().to_string(), device.clone());
        device
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Device<P>>> {
        self.devices.read().await.get(id).cloned()
    }

    /// Identifiers in sorted order
    pub async fn ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Devices whose identifier starts with any of `prefixes`, compared
    /// case-insensitively, in identifier order. No prefixes selects every
    /// device.
    pub async fn select(&self, prefixes: &[String]) -> Vec<Arc<Device<P>>> {
        let devices = self.devices.read().await;
        if prefixes.is_empty() {
            return devices.values().cloned().collect();
        }
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_lowercase()).collect();
        devices
            .iter()
            .filter(|(id, _)| {
                let id = id.to_lowercase();
                prefixes.iter().any(|p| id.starts_with(p.as_str()))
            })
            .map(|(_, device)| device.clone())
            .collect()
    }

    /// Removes and returns every device
    pub async fn drain(&self) -> Vec<Arc<Device<P>>> {
        std::mem::take(&mut *self.devices.write().await)
            .into_values()
            .collect()
    }

    /// Empties the registry and disconnects every device concurrently.
    /// Failures are logged; every device is still removed.
    pub async fn disconnect_all(&self) {
        let devices = self.drain().await;
        let results = join_all(devices.iter().map(|d| d.disconnect())).await;
        for (device, result) in devices.iter().zip(results) {
            match result {
                Ok(()) => debug!("{}: disconnected", device.id()),
                Err(e) => warn!("{}: disconnect failed: {e}", device.id()),
            }
        }
    }
}

/// Runs `op` against every device concurrently. Results come out in
/// completion order, tagged with the device identifier; one device failing
/// does not affect the others.
pub fn fan_out<P, T, F, Fut>(
    devices: &[Arc<Device<P>>],
    op: F,
) -> impl Stream<Item = (String, Result<T>)> + Unpin
where
    P: CommandPipe,
    F: Fn(Arc<Device<P>>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    devices
        .iter()
        .map(|device| {
            let id = device.id().to_string();
            let pending = op(device.clone());
            async move { (id, pending.await) }
        })
        .collect::<FuturesUnordered<_>>()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::mock::MockPlug;

    async fn registry(ids: &[&str]) -> Registry<MockPlug> {
        let registry = Registry::new();
        for id in ids {
            registry
                .insert(Device::new(*id, MockPlug::new(), Duration::from_secs(1)))
                .await;
        }
        registry
    }

    fn ids(devices: &[Arc<Device<MockPlug>>]) -> Vec<&str> {
        devices.iter().map(|d| d.id()).collect()
    }

    #[tokio::test]
    async fn select_by_prefix() {
        let registry = registry(&["C4:BE:84:00:11:22", "C4:BE:84:99:00:00", "F0:01:02:03:04:05"]).await;

        assert_eq!(registry.select(&[]).await.len(), 3);
        assert_eq!(
            ids(&registry.select(&["c4:be:84:9".to_string()]).await),
            vec!["C4:BE:84:99:00:00"]
        );
        assert_eq!(
            ids(&registry.select(&["C4".to_string(), "F0".to_string()]).await),
            vec!["C4:BE:84:00:11:22", "C4:BE:84:99:00:00", "F0:01:02:03:04:05"]
        );
        // overlapping prefixes do not duplicate
        assert_eq!(
            registry
                .select(&["C4".to_string(), "C4:BE".to_string()])
                .await
                .len(),
            2
        );
        assert!(registry.select(&["AB".to_string()]).await.is_empty());
    }

    #[tokio::test]
    async fn insert_replaces_and_drain_empties() {
        let registry = registry(&["A1", "B2"]).await;
        let old = registry.get("A1").await.unwrap();
        registry
            .insert(Device::new("A1", MockPlug::new(), Duration::from_secs(1)))
            .await;
        assert_eq!(registry.len().await, 2);
        assert!(!Arc::ptr_eq(&old, &registry.get("A1").await.unwrap()));

        assert_eq!(registry.drain().await.len(), 2);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_all_closes_every_pipe() {
        let registry = registry(&["A1", "B2", "C3"]).await;
        let devices = registry.select(&[]).await;
        // already gone; must not stop the others
        devices[1].pipe().update(|s| s.connected = false);

        registry.disconnect_all().await;

        assert!(registry.is_empty().await);
        for device in &devices {
            assert!(!device.pipe().state().connected, "{} still connected", device.id());
            assert!(!device.is_connected().await);
        }
    }

    #[tokio::test]
    async fn fan_out_reports_every_device() {
        let registry = registry(&["A1", "B2", "C3"]).await;
        registry
            .get("B2")
            .await
            .unwrap()
            .pipe()
            .update(|s| s.connected = false);

        let devices = registry.select(&[]).await;
        let mut results: Vec<(String, bool)> = fan_out(&devices, |d| async move { d.on(0).await })
            .map(|(id, result)| (id, result.is_ok()))
            .collect()
            .await;
        results.sort();
        assert_eq!(
            results,
            vec![
                ("A1".to_string(), true),
                ("B2".to_string(), false),
                ("C3".to_string(), true),
            ]
        );
    }
}

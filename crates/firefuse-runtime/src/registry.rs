use crate::error::RegistryError;
use firefuse_config::DeviceConfig;
use firefuse_io::DeviceEndpoint;
use firefuse_structures::paths::{canonicalize, endpoint_kind, EndpointKind};
use firefuse_vision::VisionEndpoint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// An endpoint found by [`EntityRegistry::resolve`].
#[derive(Clone)]
pub enum Entity {
    Vision(Arc<VisionEndpoint>),
    Device(Arc<DeviceEndpoint>),
}

/// Vision and device endpoints keyed by canonical path.
///
/// Entries live until [`EntityRegistry::clear`]. Handles are `Arc`s, so an entry removed by
/// `clear` stays valid for anyone still holding it.
#[derive(Default)]
pub struct EntityRegistry {
    vision: Mutex<HashMap<String, Arc<VisionEndpoint>>>,
    devices: Mutex<HashMap<String, Arc<DeviceEndpoint>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the endpoint addressed by `path`. When `create` is set a missing endpoint is
    /// created; otherwise it is reported as not found.
    pub fn resolve(&self, path: &str, create: bool) -> Result<Entity, RegistryError> {
        let key = canonicalize(path);
        match endpoint_kind(path) {
            Some(EndpointKind::Vision) => {
                let mut vision = self.vision.lock();
                if let Some(endpoint) = vision.get(&key) {
                    return Ok(Entity::Vision(Arc::clone(endpoint)));
                }
                if !create {
                    return Err(RegistryError::NotFound(key));
                }
                info!("[REGISTRY] Created vision endpoint {}", key);
                let endpoint = Arc::new(VisionEndpoint::new(&key));
                vision.insert(key, Arc::clone(&endpoint));
                Ok(Entity::Vision(endpoint))
            }
            Some(EndpointKind::Device) => {
                let mut devices = self.devices.lock();
                if let Some(endpoint) = devices.get(&key) {
                    return Ok(Entity::Device(Arc::clone(endpoint)));
                }
                if !create {
                    return Err(RegistryError::NotFound(key));
                }
                info!("[REGISTRY] Created unconfigured device endpoint {}", key);
                let endpoint = Arc::new(DeviceEndpoint::new(DeviceConfig {
                    path: key.clone(),
                    ..Default::default()
                }));
                devices.insert(key, Arc::clone(&endpoint));
                Ok(Entity::Device(endpoint))
            }
            None => Err(RegistryError::InvalidPath(path.to_string())),
        }
    }

    pub fn resolve_vision(
        &self,
        path: &str,
        create: bool,
    ) -> Result<Arc<VisionEndpoint>, RegistryError> {
        match self.resolve(path, create)? {
            Entity::Vision(endpoint) => Ok(endpoint),
            Entity::Device(_) => Err(RegistryError::InvalidPath(path.to_string())),
        }
    }

    pub fn resolve_device(
        &self,
        path: &str,
        create: bool,
    ) -> Result<Arc<DeviceEndpoint>, RegistryError> {
        match self.resolve(path, create)? {
            Entity::Device(endpoint) => Ok(endpoint),
            Entity::Vision(_) => Err(RegistryError::InvalidPath(path.to_string())),
        }
    }

    /// Registers a configured vision endpoint under its own path, replacing any previous one.
    pub fn insert_vision(&self, endpoint: Arc<VisionEndpoint>) {
        debug!("[REGISTRY] Registered vision endpoint {}", endpoint.path());
        self.vision
            .lock()
            .insert(endpoint.path().to_string(), endpoint);
    }

    /// Registers a configured device endpoint. A replaced endpoint is stopped.
    pub fn insert_device(&self, endpoint: Arc<DeviceEndpoint>) {
        debug!("[REGISTRY] Registered device endpoint {}", endpoint.path());
        let previous = self
            .devices
            .lock()
            .insert(endpoint.path().to_string(), endpoint);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Snapshot of the vision endpoints, sorted by path.
    pub fn vision_endpoints(&self) -> Vec<Arc<VisionEndpoint>> {
        let mut endpoints: Vec<_> = self.vision.lock().values().cloned().collect();
        endpoints.sort_by(|a, b| a.path().cmp(b.path()));
        endpoints
    }

    /// Snapshot of the device endpoints, sorted by path.
    pub fn devices(&self) -> Vec<Arc<DeviceEndpoint>> {
        let mut endpoints: Vec<_> = self.devices.lock().values().cloned().collect();
        endpoints.sort_by(|a, b| a.path().cmp(b.path()));
        endpoints
    }

    pub fn len(&self) -> usize {
        self.vision.lock().len() + self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every endpoint and stops device readers.
    pub fn clear(&self) {
        let vision: Vec<_> = self.vision.lock().drain().collect();
        let devices: Vec<_> = self.devices.lock().drain().collect();
        info!(
            "[REGISTRY] Cleared {} vision and {} device endpoints",
            vision.len(),
            devices.len()
        );
        for (_, device) in devices {
            device.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_creates_once() {
        let registry = EntityRegistry::new();
        let first = registry
            .resolve_vision("/cv/1/bgr/cve/edge/process.fire", true)
            .unwrap();
        let second = registry
            .resolve_vision("/sync/cv/1/bgr/cve/edge/firesight.json", false)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.path(), "/cv/1/bgr/cve/edge");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_without_create() {
        let registry = EntityRegistry::new();
        assert_eq!(
            registry.resolve("/cv/1/gray/cve/holes/save.fire", false).err(),
            Some(RegistryError::NotFound("/cv/1/gray/cve/holes".to_string()))
        );
        assert_eq!(
            registry.resolve("/cv/1/camera.jpg", true).err(),
            Some(RegistryError::InvalidPath("/cv/1/camera.jpg".to_string()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_device_kind_mismatch() {
        let registry = EntityRegistry::new();
        registry.resolve("/cnc/tinyg/gcode.fire", true).unwrap();
        assert!(matches!(
            registry.resolve_vision("/cnc/tinyg/gcode.fire", false),
            Err(RegistryError::InvalidPath(_))
        ));
        assert_eq!(registry.devices().len(), 1);
    }

    #[test]
    fn test_clear_keeps_outstanding_handles_valid() {
        let registry = EntityRegistry::new();
        let held = registry
            .resolve_vision("/cv/1/bgr/cve/edge", true)
            .unwrap();
        registry.resolve("/cnc/tinyg", true).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(&*held.pipeline().peek().data(), b"[]");
    }
}

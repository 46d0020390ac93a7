use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::value::Value;

/// Data type a resource declares for the readings it accepts.  The declared
/// type selects the payload decoder; types without a decoder are still valid
/// declarations but requests against them fail with 5.00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Int32,
    Float64,
    String,
    Binary,
    Uint64,
    Bool,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Int32 => "int32",
            ResourceType::Float64 => "float64",
            ResourceType::String => "string",
            ResourceType::Binary => "binary",
            ResourceType::Uint64 => "uint64",
            ResourceType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A named, typed data point owned by a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ResourceType,
}

/// Owned snapshot of a device and its resource list as of lookup time.  The
/// request that obtained it holds it exclusively and releases it by dropping
/// it, on success and failure paths alike.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// Interface consumed from the device-management core: device identity
/// lookups and reading ingestion.  Publishing is fire-and-forget; ingestion
/// failures are not surfaced back to the request that produced the reading.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn lookup_device(&self, name: &str) -> Option<DeviceSnapshot>;

    async fn publish_reading(&self, device: &str, resource: &str, value: Value);
}

/// A decoded value as accepted for ingestion, tagged with its owning device
/// and resource names.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device: String,
    pub resource: String,
    pub value: Value,
}

/// In-memory registry backend, seeded from a TOML device file.  Stands in for
/// the device-management core in the standalone binary and in tests; readings
/// are logged and retained for inspection.
#[derive(Default)]
pub struct MemoryRegistry {
    devices: HashMap<String, DeviceSnapshot>,
    published: Mutex<Vec<Reading>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, RegistryFileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: DeviceFile =
            toml::from_str(&contents).map_err(|source| RegistryFileError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let mut registry = Self::new();
        for device in file.devices {
            registry.add_device(device);
        }
        Ok(registry)
    }

    pub fn add_device(&mut self, device: DeviceSnapshot) {
        self.devices.insert(device.name.clone(), device);
    }

    /// Readings published so far, oldest first.
    pub async fn published(&self) -> Vec<Reading> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn lookup_device(&self, name: &str) -> Option<DeviceSnapshot> {
        self.devices.get(name).cloned()
    }

    async fn publish_reading(&self, device: &str, resource: &str, value: Value) {
        info!("Reading from {device}/{resource}: {value:?}");
        self.published.lock().await.push(Reading {
            device: device.to_string(),
            resource: resource.to_string(),
            value,
        });
    }
}

#[derive(Deserialize)]
struct DeviceFile {
    #[serde(default)]
    devices: Vec<DeviceSnapshot>,
}

#[derive(Debug, Error)]
pub enum RegistryFileError {
    #[error("cannot read device file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse device file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_snapshot_with_resources() {
        let mut registry = MemoryRegistry::new();
        registry.add_device(DeviceSnapshot {
            name: "dev1".to_string(),
            resources: vec![ResourceSpec {
                name: "temp".to_string(),
                data_type: ResourceType::Int32,
            }],
        });

        let snapshot = registry.lookup_device("dev1").await.unwrap();
        assert_eq!(snapshot.name, "dev1");
        assert_eq!(snapshot.resources[0].name, "temp");
        assert!(registry.lookup_device("nope").await.is_none());
    }

    #[tokio::test]
    async fn records_published_readings_in_order() {
        let registry = MemoryRegistry::new();
        registry
            .publish_reading("dev1", "temp", Value::Int32(1))
            .await;
        registry
            .publish_reading("dev1", "temp", Value::Int32(2))
            .await;

        let published = registry.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].value, Value::Int32(1));
        assert_eq!(published[1].value, Value::Int32(2));
    }

    #[test]
    fn parses_device_file() {
        let file: DeviceFile = toml::from_str(
            r#"
            [[devices]]
            name = "dev1"

            [[devices.resources]]
            name = "temp"
            type = "int32"

            [[devices.resources]]
            name = "label"
            type = "string"
            "#,
        )
        .unwrap();

        assert_eq!(file.devices.len(), 1);
        assert_eq!(file.devices[0].resources[1].data_type, ResourceType::String);
    }
}

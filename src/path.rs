use thiserror::Error;

use crate::registry::{DeviceRegistry, DeviceSnapshot, ResourceSpec};

/// First segment of every ingress path: `/a1r/{device-name}/{resource-name}`.
pub const RESOURCE_NAMESPACE: &str = "a1r";

/// Why a request URI did not resolve to a device resource.  All variants map
/// to 4.04.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("missing URI segment {0}")]
    MissingSegment(usize),

    #[error("invalid URI; expected first segment {RESOURCE_NAMESPACE}")]
    SegmentMismatch,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("extra URI segment")]
    ExtraSegment,
}

/// Successfully routed request target.  Owns the device snapshot obtained
/// from the registry; dropping the target releases the snapshot, which makes
/// release unconditional on every exit path of the request.
pub struct RoutedTarget {
    snapshot: DeviceSnapshot,
    resource_index: usize,
}

impl RoutedTarget {
    pub fn device_name(&self) -> &str {
        &self.snapshot.name
    }

    pub fn resource(&self) -> &ResourceSpec {
        // Index comes from a position() over this same list.
        &self.snapshot.resources[self.resource_index]
    }
}

/// Resolve a request URI path against the device registry.  The path must be
/// exactly `/{namespace}/{device}/{resource}`; empty segments are ignored,
/// and validation stops at the first failing segment so a device snapshot is
/// only acquired once the namespace matched.
pub async fn route<R: DeviceRegistry + ?Sized>(
    registry: &R,
    path: &str,
) -> Result<RoutedTarget, PathError> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    let namespace = segments.next().ok_or(PathError::MissingSegment(0))?;
    if namespace != RESOURCE_NAMESPACE {
        return Err(PathError::SegmentMismatch);
    }

    let device_name = segments.next().ok_or(PathError::MissingSegment(1))?;
    let snapshot = registry
        .lookup_device(device_name)
        .await
        .ok_or_else(|| PathError::DeviceNotFound(device_name.to_string()))?;

    let resource_name = segments.next().ok_or(PathError::MissingSegment(2))?;
    let resource_index = snapshot
        .resources
        .iter()
        .position(|r| r.name == resource_name)
        .ok_or_else(|| PathError::ResourceNotFound(resource_name.to_string()))?;

    if segments.next().is_some() {
        return Err(PathError::ExtraSegment);
    }

    Ok(RoutedTarget {
        snapshot,
        resource_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, ResourceType};

    fn registry() -> MemoryRegistry {
        let mut registry = MemoryRegistry::new();
        registry.add_device(DeviceSnapshot {
            name: "dev1".to_string(),
            resources: vec![
                ResourceSpec {
                    name: "temp".to_string(),
                    data_type: ResourceType::Int32,
                },
                ResourceSpec {
                    name: "label".to_string(),
                    data_type: ResourceType::String,
                },
            ],
        });
        registry
    }

    #[tokio::test]
    async fn resolves_exact_device_and_resource() {
        let registry = registry();
        let target = route(&registry, "a1r/dev1/temp").await.unwrap();
        assert_eq!(target.device_name(), "dev1");
        assert_eq!(target.resource().name, "temp");
        assert_eq!(target.resource().data_type, ResourceType::Int32);

        let target = route(&registry, "a1r/dev1/label").await.unwrap();
        assert_eq!(target.resource().data_type, ResourceType::String);
    }

    #[tokio::test]
    async fn namespace_mismatch_wins_regardless_of_rest() {
        let registry = registry();
        for path in ["x1r/dev1/temp", "A1R/dev1/temp", "other/nope/nothing"] {
            assert_eq!(
                route(&registry, path).await.err(),
                Some(PathError::SegmentMismatch)
            );
        }
    }

    #[tokio::test]
    async fn missing_segments_report_position() {
        let registry = registry();
        assert_eq!(
            route(&registry, "").await.err(),
            Some(PathError::MissingSegment(0))
        );
        assert_eq!(
            route(&registry, "a1r").await.err(),
            Some(PathError::MissingSegment(1))
        );
        assert_eq!(
            route(&registry, "a1r/dev1").await.err(),
            Some(PathError::MissingSegment(2))
        );
    }

    #[tokio::test]
    async fn extra_segment_rejected_even_when_prefix_is_valid() {
        let registry = registry();
        assert_eq!(
            route(&registry, "a1r/dev1/temp/more").await.err(),
            Some(PathError::ExtraSegment)
        );
    }

    #[tokio::test]
    async fn unknown_device_and_resource() {
        let registry = registry();
        assert_eq!(
            route(&registry, "a1r/unknown/temp").await.err(),
            Some(PathError::DeviceNotFound("unknown".to_string()))
        );
        assert_eq!(
            route(&registry, "a1r/dev1/humidity").await.err(),
            Some(PathError::ResourceNotFound("humidity".to_string()))
        );
    }

    #[tokio::test]
    async fn empty_segments_are_ignored() {
        let registry = registry();
        let target = route(&registry, "/a1r//dev1/temp/").await.unwrap();
        assert_eq!(target.device_name(), "dev1");
    }
}

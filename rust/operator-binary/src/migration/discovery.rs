//! Enumerates the objects of the source cluster that take part in a migration.
use std::collections::{BTreeSet, HashSet};

use snafu::{ResultExt, Snafu};
use stackable_operator::kube::{api::DynamicObject, ResourceExt};
use strum::{Display, EnumString};

use crate::{
    cluster::{self, DiscoveredGroup, DiscoveredResource, SourceCluster},
    crd::ResourceInfo,
};

/// API group whose resources are served by other groups as well and which is never migrated.
pub const LEGACY_EXTENSIONS_GROUP: &str = "extensions";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to list {kind} objects in {namespace}"))]
    ListNamespaced {
        source: cluster::Error,
        kind: String,
        namespace: String,
    },

    #[snafu(display("failed to list {kind} objects"))]
    ListClusterWide {
        source: cluster::Error,
        kind: String,
    },
}

/// The kinds that are migrated, by the `kind` of their API resource.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum MigratableKind {
    PersistentVolumeClaim,
    PersistentVolume,
    Deployment,
    StatefulSet,
    ConfigMap,
    Service,
    Secret,
}

impl MigratableKind {
    /// Returns the kind of `resource` if objects of it are migrated when served by `group`.
    pub fn for_resource(group: &str, resource: &DiscoveredResource) -> Option<Self> {
        let kind = resource.resource.kind.parse::<Self>().ok()?;
        if kind == Self::Deployment && group == LEGACY_EXTENSIONS_GROUP {
            return None;
        }
        Some(kind)
    }

    /// Whether objects of this kind describe storage that the storage driver replicates.
    pub fn is_volume(&self) -> bool {
        matches!(self, Self::PersistentVolumeClaim | Self::PersistentVolume)
    }
}

/// An object selected for migration, together with its status entry.
#[derive(Clone, Debug)]
pub struct MigratedObject {
    pub kind: MigratableKind,
    pub resource: DiscoveredResource,
    pub info: ResourceInfo,
    pub object: DynamicObject,
}

fn should_migrate(
    kind: MigratableKind,
    object: &DynamicObject,
    namespaces: &BTreeSet<String>,
) -> bool {
    match kind {
        // The API server service is owned by each cluster
        MigratableKind::Service => object.name_any() != "kubernetes",
        MigratableKind::PersistentVolume => object
            .data
            .pointer("/spec/claimRef/namespace")
            .and_then(|namespace| namespace.as_str())
            .is_some_and(|namespace| namespaces.contains(namespace)),
        _ => true,
    }
}

/// Identity used to recognize an object that is served by several versions of a group.
fn identity(kind: MigratableKind, object: &DynamicObject) -> String {
    object.uid().unwrap_or_else(|| {
        format!(
            "{kind}/{}/{}",
            object.namespace().unwrap_or_default(),
            object.name_any()
        )
    })
}

/// Collects the objects of one group version that are to be migrated.
///
/// `seen` holds the identities of the objects already collected for the same API group and is
/// updated, so that an object served by several versions of a group is only migrated once.
pub async fn collect_group(
    source: &dyn SourceCluster,
    group: &DiscoveredGroup,
    namespaces: &BTreeSet<String>,
    seen: &mut HashSet<String>,
) -> Result<Vec<MigratedObject>, Error> {
    let mut collected = Vec::new();

    for resource in &group.resources {
        let Some(kind) = MigratableKind::for_resource(&group.group, resource) else {
            continue;
        };
        let kind_name = &resource.resource.kind;

        let objects = if resource.namespaced {
            let mut objects = Vec::new();
            for namespace in namespaces {
                objects.extend(
                    source
                        .list(resource, Some(namespace))
                        .await
                        .context(ListNamespacedSnafu {
                            kind: kind_name,
                            namespace,
                        })?,
                );
            }
            objects
        } else {
            source
                .list(resource, None)
                .await
                .context(ListClusterWideSnafu { kind: kind_name })?
        };

        for object in objects {
            if !should_migrate(kind, &object, namespaces) || !seen.insert(identity(kind, &object))
            {
                continue;
            }
            let info = ResourceInfo::in_progress(
                object.name_any(),
                object.namespace().unwrap_or_default(),
                &group.group,
                &group.version,
                kind_name,
            );
            collected.push(MigratedObject {
                kind,
                resource: resource.clone(),
                info,
                object,
            });
        }
    }

    tracing::debug!(
        group = %group.group,
        version = %group.version,
        objects = collected.len(),
        "Collected objects to migrate"
    );
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        crd::{TransferStatus, CORE_GROUP},
        testing::{self, FakeSource},
    };

    fn namespaces() -> BTreeSet<String> {
        BTreeSet::from(["ns1".to_string()])
    }

    #[rstest]
    #[case("", "ConfigMap", Some(MigratableKind::ConfigMap))]
    #[case("", "PersistentVolume", Some(MigratableKind::PersistentVolume))]
    #[case("apps", "Deployment", Some(MigratableKind::Deployment))]
    #[case("extensions", "Deployment", None)]
    #[case("", "Pod", None)]
    #[case("apps", "ReplicaSet", None)]
    fn test_eligible_kinds(
        #[case] group: &str,
        #[case] kind: &str,
        #[case] expected: Option<MigratableKind>,
    ) {
        let resource = testing::core_resource(kind, "irrelevant", true);

        assert_eq!(MigratableKind::for_resource(group, &resource), expected);
    }

    #[tokio::test]
    async fn test_kubernetes_service_is_skipped() {
        let services = testing::core_resource("Service", "services", true);
        let source = FakeSource::default()
            .with_resource(services.clone())
            .with_object(
                &services,
                testing::object(&services, Some("ns1"), "kubernetes", json!({})),
            )
            .with_object(
                &services,
                testing::object(&services, Some("ns1"), "web", json!({})),
            );
        let group = source.discover().await.unwrap().remove(0);

        let collected = collect_group(&source, &group, &namespaces(), &mut HashSet::new())
            .await
            .unwrap();

        let names: Vec<_> = collected.iter().map(|o| o.info.name.as_str()).collect();
        assert_eq!(names, ["web"]);
    }

    #[tokio::test]
    async fn test_persistent_volumes_are_filtered_by_claim_namespace() {
        let volumes = testing::core_resource("PersistentVolume", "persistentvolumes", false);
        let bound_to = |namespace: &str| json!({"spec": {"claimRef": {"namespace": namespace}}});
        let source = FakeSource::default()
            .with_resource(volumes.clone())
            .with_object(&volumes, testing::object(&volumes, None, "pv-1", bound_to("ns1")))
            .with_object(&volumes, testing::object(&volumes, None, "pv-2", bound_to("ns2")))
            .with_object(&volumes, testing::object(&volumes, None, "pv-3", json!({"spec": {}})));
        let group = source.discover().await.unwrap().remove(0);

        let collected = collect_group(&source, &group, &namespaces(), &mut HashSet::new())
            .await
            .unwrap();

        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].info.name, "pv-1");
        assert_eq!(collected[0].info.namespace, "");
        assert_eq!(collected[0].kind, MigratableKind::PersistentVolume);
    }

    #[tokio::test]
    async fn test_objects_are_recorded_in_progress_with_core_group() {
        let config_maps = testing::core_resource("ConfigMap", "configmaps", true);
        let source = FakeSource::default()
            .with_resource(config_maps.clone())
            .with_object(
                &config_maps,
                testing::object(&config_maps, Some("ns1"), "cm1", json!({"data": {"a": "b"}})),
            )
            .with_object(
                &config_maps,
                testing::object(&config_maps, Some("other"), "cm2", json!({})),
            );
        let group = source.discover().await.unwrap().remove(0);

        let collected = collect_group(&source, &group, &namespaces(), &mut HashSet::new())
            .await
            .unwrap();

        assert_eq!(collected.len(), 1);
        let info = &collected[0].info;
        assert_eq!(info.group, CORE_GROUP);
        assert_eq!(info.version, "v1");
        assert_eq!(info.kind, "ConfigMap");
        assert_eq!(info.namespace, "ns1");
        assert_eq!(info.status, TransferStatus::InProgress);
    }

    #[tokio::test]
    async fn test_object_seen_in_earlier_version_is_kept_once() {
        let deployments = testing::apps_resource("Deployment", "deployments");
        let web = testing::object(&deployments, Some("ns1"), "web", json!({}));
        let source = FakeSource::default()
            .with_resource(deployments.clone())
            .with_object(&deployments, web);
        let group = source.discover().await.unwrap().remove(0);
        let mut seen = HashSet::new();

        let first = collect_group(&source, &group, &namespaces(), &mut seen)
            .await
            .unwrap();
        let second = collect_group(&source, &group, &namespaces(), &mut seen)
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}

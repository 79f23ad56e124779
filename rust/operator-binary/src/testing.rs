//! In-memory stand-ins for the cluster seams, shared by the unit tests.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use stackable_operator::kube::{
    self,
    api::DynamicObject,
    config::Kubeconfig,
    core::ErrorResponse,
    discovery::ApiResource,
    ResourceExt,
};

use crate::{
    cluster::{
        ClusterConnector, DestinationCluster, DiscoveredGroup, DiscoveredResource, Error,
        RecordStore, SourceCluster,
    },
    crd::{
        ClusterPair, ClusterPairSpec, ClusterPairStatus, Migration, MigrationSpec,
        PairingStatus, TransferStatus, VolumeInfo,
    },
};

pub const SOURCE_NAMESPACE: &str = "ns1";

pub fn cluster_pair(name: &str) -> ClusterPair {
    ClusterPair::new(
        name,
        ClusterPairSpec {
            config: Kubeconfig::default(),
            options: BTreeMap::new(),
        },
    )
}

pub fn paired_cluster_pair(name: &str) -> ClusterPair {
    let mut pair = cluster_pair(name);
    pair.status = Some(ClusterPairStatus {
        scheduler_status: PairingStatus::Ready,
        storage_status: PairingStatus::Ready,
        remote_storage_id: "remote-storage".to_string(),
    });
    pair
}

pub fn migration(cluster_pair: &str, include_resources: bool) -> Migration {
    let mut migration = Migration::new(
        "move-ns1",
        MigrationSpec {
            cluster_pair: cluster_pair.to_string(),
            namespaces: BTreeSet::from([SOURCE_NAMESPACE.to_string()]),
            include_resources,
            ..MigrationSpec::default()
        },
    );
    migration.metadata.namespace = Some("default".to_string());
    migration
}

pub fn volume(name: &str, status: TransferStatus) -> VolumeInfo {
    VolumeInfo {
        volume: name.to_string(),
        persistent_volume_claim: Some(format!("{name}-claim")),
        namespace: Some(SOURCE_NAMESPACE.to_string()),
        status,
        reason: String::new(),
    }
}

pub fn core_resource(kind: &str, plural: &str, namespaced: bool) -> DiscoveredResource {
    DiscoveredResource {
        resource: ApiResource {
            group: String::new(),
            version: "v1".to_string(),
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        },
        namespaced,
    }
}

pub fn apps_resource(kind: &str, plural: &str) -> DiscoveredResource {
    DiscoveredResource {
        resource: ApiResource {
            group: "apps".to_string(),
            version: "v1".to_string(),
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        },
        namespaced: true,
    }
}

/// An object as returned by a list call against the source cluster.
pub fn object(
    resource: &DiscoveredResource,
    namespace: Option<&str>,
    name: &str,
    data: Value,
) -> DynamicObject {
    let mut object = DynamicObject::new(name, &resource.resource).data(data);
    object.metadata.namespace = namespace.map(str::to_string);
    object.metadata.uid = Some(format!(
        "{}-{}-{name}",
        resource.resource.kind,
        namespace.unwrap_or_default()
    ));
    object.metadata.resource_version = Some("4711".to_string());
    object
}

fn api_error(reason: &str, code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("rejected by the test cluster: {reason}"),
        reason: reason.to_string(),
        code,
    })
}

#[derive(Default)]
pub struct InMemoryRecords {
    pairs: Mutex<BTreeMap<String, ClusterPair>>,
    pair_updates: Mutex<Vec<ClusterPair>>,
    migration_updates: Mutex<Vec<Migration>>,
}

impl InMemoryRecords {
    pub fn with_pair(self, pair: ClusterPair) -> Self {
        self.pairs
            .lock()
            .unwrap()
            .insert(pair.name_any(), pair);
        self
    }

    pub fn pair_updates(&self) -> Vec<ClusterPair> {
        self.pair_updates.lock().unwrap().clone()
    }

    pub fn migration_updates(&self) -> Vec<Migration> {
        self.migration_updates.lock().unwrap().clone()
    }

    pub fn last_migration(&self) -> Migration {
        self.migration_updates()
            .pop()
            .expect("no migration status was persisted")
    }
}

#[async_trait]
impl RecordStore for InMemoryRecords {
    async fn get_cluster_pair(&self, name: &str) -> Result<Option<ClusterPair>, Error> {
        Ok(self.pairs.lock().unwrap().get(name).cloned())
    }

    async fn update_cluster_pair_status(&self, pair: &ClusterPair) -> Result<(), Error> {
        self.pair_updates.lock().unwrap().push(pair.clone());
        Ok(())
    }

    async fn update_migration_status(&self, migration: &Migration) -> Result<(), Error> {
        self.migration_updates.lock().unwrap().push(migration.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSource {
    groups: Vec<DiscoveredGroup>,
    objects: Vec<(DiscoveredResource, DynamicObject)>,
    namespace_labels: BTreeMap<String, BTreeMap<String, String>>,
    discoveries: AtomicUsize,
    failing_discovery: bool,
    failing_lists: bool,
}

impl FakeSource {
    pub fn with_resource(mut self, resource: DiscoveredResource) -> Self {
        let group = resource.resource.group.clone();
        let version = resource.resource.version.clone();
        match self
            .groups
            .iter_mut()
            .find(|g| g.group == group && g.version == version)
        {
            Some(existing) => existing.resources.push(resource),
            None => self.groups.push(DiscoveredGroup {
                group,
                version,
                resources: vec![resource],
            }),
        }
        self
    }

    pub fn with_object(mut self, resource: &DiscoveredResource, object: DynamicObject) -> Self {
        self.objects.push((resource.clone(), object));
        self
    }

    pub fn with_namespace_labels(mut self, namespace: &str, labels: &[(&str, &str)]) -> Self {
        self.namespace_labels.insert(
            namespace.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.failing_discovery = true;
        self
    }

    pub fn failing_lists(mut self) -> Self {
        self.failing_lists = true;
        self
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCluster for FakeSource {
    async fn discover(&self) -> Result<Vec<DiscoveredGroup>, Error> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if self.failing_discovery {
            return Err(Error::Discovery {
                source: api_error("ServiceUnavailable", 503),
            });
        }
        Ok(self.groups.clone())
    }

    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        if self.failing_lists {
            return Err(Error::ListObjects {
                source: api_error("Forbidden", 403),
                kind: resource.resource.kind.clone(),
            });
        }
        Ok(self
            .objects
            .iter()
            .filter(|(r, _)| r.resource == resource.resource)
            .filter(|(_, o)| namespace.is_none() || o.metadata.namespace.as_deref() == namespace)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, Error> {
        Ok(self
            .namespace_labels
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

type ObjectKey = (String, String, String);

fn object_key(resource: &DiscoveredResource, object: &DynamicObject) -> ObjectKey {
    (
        resource.resource.kind.clone(),
        object.namespace().unwrap_or_default(),
        object.name_any(),
    )
}

#[derive(Default)]
pub struct DestinationState {
    pub objects: BTreeMap<ObjectKey, DynamicObject>,
    pub namespaces: BTreeMap<String, BTreeMap<String, String>>,
    pub creates: Vec<ObjectKey>,
    pub deletes: Vec<ObjectKey>,
    /// Kinds whose creation is refused.
    pub rejected_kinds: BTreeSet<String>,
    /// Kinds whose deletion is acknowledged but the object stays around.
    pub sticky_kinds: BTreeSet<String>,
    pub reject_namespaces: bool,
}

/// A destination cluster that keeps objects in memory. Clones share their state.
#[derive(Clone, Default)]
pub struct FakeDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl FakeDestination {
    pub fn with_existing(self, resource: &DiscoveredResource, object: DynamicObject) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(object_key(resource, &object), object);
        self
    }

    pub fn rejecting(self, kind: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_kinds
            .insert(kind.to_string());
        self
    }

    pub fn sticky(self, kind: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .sticky_kinds
            .insert(kind.to_string());
        self
    }

    pub fn rejecting_namespaces(self) -> Self {
        self.state.lock().unwrap().reject_namespaces = true;
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap()
    }

    pub fn get(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state()
            .objects
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DestinationCluster for FakeDestination {
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.reject_namespaces {
            return Err(Error::CreateNamespace {
                source: api_error("Forbidden", 403),
                namespace: name.to_string(),
            });
        }
        state
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    async fn create(
        &self,
        resource: &DiscoveredResource,
        object: &DynamicObject,
    ) -> Result<(), Error> {
        let key = object_key(resource, object);
        let mut state = self.state();
        state.creates.push(key.clone());
        if state.rejected_kinds.contains(&key.0) {
            return Err(Error::CreateObject {
                source: api_error("Invalid", 422),
                kind: key.0,
                name: key.2,
            });
        }
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: key.0,
                name: key.2,
            });
        }
        state.objects.insert(key, object.clone());
        Ok(())
    }

    async fn delete(
        &self,
        resource: &DiscoveredResource,
        object: &DynamicObject,
    ) -> Result<(), Error> {
        let key = object_key(resource, object);
        let mut state = self.state();
        state.deletes.push(key.clone());
        if !state.sticky_kinds.contains(&key.0) {
            state.objects.remove(&key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub destination: FakeDestination,
    unreachable: bool,
}

impl FakeConnector {
    pub fn new(destination: FakeDestination) -> Self {
        Self {
            destination,
            unreachable: false,
        }
    }

    /// A connector whose remote cluster cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            destination: FakeDestination::default(),
            unreachable: true,
        }
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, pair: &ClusterPair) -> Result<Box<dyn DestinationCluster>, Error> {
        if self.unreachable {
            return Err(Error::RemoteClient {
                source: api_error("ServiceUnavailable", 503),
                pair: pair.name_any(),
            });
        }
        Ok(Box::new(self.destination.clone()))
    }
}

//! Seams between the migration engine and the Kubernetes clusters it talks to.
//!
//! The engine only sees these traits. [`kubernetes`] implements them on top of `kube` clients for
//! the cluster the operator runs in and for the remote cluster of a [`ClusterPair`].
use std::collections::BTreeMap;

use async_trait::async_trait;
use snafu::Snafu;
use stackable_operator::kube::{
    self,
    api::DynamicObject,
    config::KubeconfigError,
    discovery::ApiResource,
};

use crate::crd::{ClusterPair, Migration};

pub mod kubernetes;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to run API discovery"))]
    Discovery { source: kube::Error },

    #[snafu(display("failed to list {kind} objects"))]
    ListObjects { source: kube::Error, kind: String },

    #[snafu(display("failed to get namespace {namespace}"))]
    GetNamespace {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("failed to get ClusterPair {name}"))]
    GetClusterPair { source: kube::Error, name: String },

    #[snafu(display("failed to update the status of {kind} {name}"))]
    UpdateStatus {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to load the kubeconfig of ClusterPair {pair}"))]
    Kubeconfig {
        source: KubeconfigError,
        pair: String,
    },

    #[snafu(display("failed to build a client for the remote cluster of ClusterPair {pair}"))]
    RemoteClient { source: kube::Error, pair: String },

    #[snafu(display("failed to create namespace {namespace} on the destination cluster"))]
    CreateNamespace {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("{kind} {name} already exists on the destination cluster"))]
    AlreadyExists { kind: String, name: String },

    #[snafu(display("failed to create {kind} {name} on the destination cluster"))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to delete {kind} {name} on the destination cluster"))]
    DeleteObject {
        source: kube::Error,
        kind: String,
        name: String,
    },
}

/// One group version of the source cluster, as reported by API discovery.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredGroup {
    pub group: String,
    pub version: String,
    pub resources: Vec<DiscoveredResource>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredResource {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// The cluster the operator runs in, and that objects are migrated from.
#[async_trait]
pub trait SourceCluster: Send + Sync {
    async fn discover(&self) -> Result<Vec<DiscoveredGroup>, Error>;

    /// Lists all objects of a resource, within `namespace` or cluster wide if `None`.
    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error>;

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, Error>;
}

/// Read and status-write access to the custom resources driving the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_cluster_pair(&self, name: &str) -> Result<Option<ClusterPair>, Error>;

    async fn update_cluster_pair_status(&self, pair: &ClusterPair) -> Result<(), Error>;

    async fn update_migration_status(&self, migration: &Migration) -> Result<(), Error>;
}

/// Builds clients for the remote cluster of a [`ClusterPair`].
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, pair: &ClusterPair) -> Result<Box<dyn DestinationCluster>, Error>;
}

/// The cluster that objects are migrated to.
#[async_trait]
pub trait DestinationCluster: Send + Sync {
    /// Creates the namespace unless it exists already.
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Creates the object. Fails with [`Error::AlreadyExists`] if an object with the same name
    /// exists.
    async fn create(&self, resource: &DiscoveredResource, object: &DynamicObject)
        -> Result<(), Error>;

    async fn delete(&self, resource: &DiscoveredResource, object: &DynamicObject)
        -> Result<(), Error>;
}

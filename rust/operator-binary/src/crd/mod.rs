use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stackable_operator::{
    kube::{config::Kubeconfig, CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    utils::crds::raw_object_schema,
};
use strum::Display;

/// API group reported for objects of the Kubernetes core group, which has no name of its own.
pub const CORE_GROUP: &str = "core";

/// A trust relationship with one remote cluster. Migrations reference a pair by name and use its
/// connection configuration to reach the destination cluster.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "migration.stackable.tech",
    version = "v1alpha1",
    kind = "ClusterPair",
    plural = "clusterpairs",
    shortname = "cp",
    status = "ClusterPairStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairSpec {
    /// Kubeconfig used to connect to the remote cluster. The `currentContext` selects the
    /// cluster and user.
    #[schemars(schema_with = "raw_object_schema")]
    pub config: Kubeconfig,

    /// Storage driver specific pairing options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairStatus {
    /// Status of the pairing with the orchestration layer of the remote cluster.
    #[serde(default)]
    pub scheduler_status: PairingStatus,

    /// Status of the pairing with the storage driver of the remote cluster.
    #[serde(default)]
    pub storage_status: PairingStatus,

    /// Identifier of the paired remote storage, set once the driver confirmed the pairing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_storage_id: String,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum PairingStatus {
    #[default]
    Initial,
    Pending,
    Ready,
    Error,
    Degraded,
    Deleting,
}

impl ClusterPair {
    pub fn remote_storage_id(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.remote_storage_id.as_str())
            .unwrap_or_default()
    }

    /// Whether both the storage driver and the scheduler side of the pairing are ready.
    pub fn is_paired(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status.storage_status == PairingStatus::Ready
                && status.scheduler_status == PairingStatus::Ready
        })
    }

    pub fn status_mut(&mut self) -> &mut ClusterPairStatus {
        self.status.get_or_insert_with(ClusterPairStatus::default)
    }
}

/// A migration of volumes and, optionally, the resources owning them from this cluster to the
/// remote cluster of a [`ClusterPair`].
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "migration.stackable.tech",
    version = "v1alpha1",
    kind = "Migration",
    plural = "migrations",
    status = "MigrationStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Name of the [`ClusterPair`] to migrate to.
    pub cluster_pair: String,

    /// Namespaces whose volumes and resources are migrated.
    #[serde(default)]
    pub namespaces: BTreeSet<String>,

    /// Label selectors passed on to the storage driver to narrow down the volumes to migrate.
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,

    /// Whether resources other than volumes are migrated as well.
    #[serde(default)]
    pub include_resources: bool,

    /// Whether migrated Deployments and StatefulSets keep their replica count. If `false` they
    /// are scaled to zero and the original count is stored in the
    /// `migration.stackable.tech/migration-replicas` annotation.
    #[serde(default)]
    pub start_applications: bool,

    /// Storage driver specific migration options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<MigrationStage>,

    #[serde(default)]
    pub status: TransferStatus,

    // `None` until the storage driver has been asked to start the migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,

    #[serde(default)]
    pub resources: Vec<ResourceInfo>,

    /// Why the migration failed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Stages are ordered, a migration never moves to an earlier stage.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum MigrationStage {
    Initializing,
    Volumes,
    Applications,
    Final,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum TransferStatus {
    #[default]
    Pending,
    InProgress,
    Failed,
    Successful,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Successful)
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub volume: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub status: TransferStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub status: TransferStatus,
    #[serde(default)]
    pub reason: String,
}

impl ResourceInfo {
    pub fn in_progress(
        name: impl Into<String>,
        namespace: impl Into<String>,
        group: &str,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            group: normalize_group(group).to_string(),
            version: version.into(),
            kind: kind.into(),
            status: TransferStatus::InProgress,
            reason: String::new(),
        }
    }

    /// Whether both entries describe the same object. The empty group and [`CORE_GROUP`] are
    /// treated as the same group.
    pub fn describes_same_object(&self, other: &ResourceInfo) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && normalize_group(&self.group) == normalize_group(&other.group)
            && self.version == other.version
            && self.kind == other.kind
    }
}

pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        CORE_GROUP
    } else {
        group
    }
}

impl Migration {
    pub fn status_mut(&mut self) -> &mut MigrationStatus {
        self.status.get_or_insert_with(MigrationStatus::default)
    }

    pub fn stage(&self) -> Option<MigrationStage> {
        self.status.as_ref().and_then(|status| status.stage)
    }

    pub fn has_failed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.status == TransferStatus::Failed)
    }

    /// Moves the migration to `stage` with the given overall `status`.
    ///
    /// Requests to go back to an earlier stage are ignored, as is any change once the migration
    /// has failed.
    pub fn advance(&mut self, stage: MigrationStage, status: TransferStatus) {
        let name = self.name_any();
        let current = self.status_mut();
        if current.status == TransferStatus::Failed {
            return;
        }
        if current.stage.is_some_and(|current_stage| current_stage > stage) {
            tracing::warn!(
                migration = %name,
                current = ?current.stage,
                requested = %stage,
                "Refusing to move migration to an earlier stage"
            );
            return;
        }
        current.stage = Some(stage);
        current.status = status;
    }

    /// Records the outcome for the resource entry describing the same object as `target`.
    /// Objects without a matching entry are ignored.
    pub fn set_resource_status(
        &mut self,
        target: &ResourceInfo,
        status: TransferStatus,
        reason: impl Into<String>,
    ) {
        if let Some(info) = self
            .status_mut()
            .resources
            .iter_mut()
            .find(|info| info.describes_same_object(target))
        {
            info.status = status;
            info.reason = reason.into();
        }
    }
}

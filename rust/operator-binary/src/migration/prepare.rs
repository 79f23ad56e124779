//! Turns live objects of the source cluster into manifests that can be created on the
//! destination cluster.
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, kube::api::DynamicObject,
};

use super::{describe, discovery::MigratableKind, discovery::MigratedObject};
use crate::{
    crd::{Migration, TransferStatus},
    driver::{self, Driver},
};

/// Holds the replica count of a workload that was scaled down while being migrated.
pub const MIGRATION_REPLICAS_ANNOTATION: &str = "migration.stackable.tech/migration-replicas";

/// Replica count of a workload that does not set one.
const DEFAULT_REPLICAS: u64 = 1;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object has no spec to rewrite"))]
    MissingSpec,

    #[snafu(display("spec.replicas is not a non-negative integer: {value}"))]
    InvalidReplicas { value: Value },

    #[snafu(display("failed to rewrite the PersistentVolume for the destination cluster"))]
    RewritePersistentVolume { source: driver::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn spec_mut(object: &mut DynamicObject) -> Result<&mut Map<String, Value>> {
    object
        .data
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .context(MissingSpecSnafu)
}

/// Scales a workload down to zero and remembers its replica count in an annotation.
fn suspend_workload(object: &mut DynamicObject) -> Result<()> {
    let spec = spec_mut(object)?;
    let replicas = match spec.get("replicas") {
        None | Some(Value::Null) => DEFAULT_REPLICAS,
        Some(value) => value
            .as_u64()
            .with_context(|| InvalidReplicasSnafu {
                value: value.clone(),
            })?,
    };
    spec.insert("replicas".to_string(), Value::from(0));

    object
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            MIGRATION_REPLICAS_ANNOTATION.to_string(),
            replicas.to_string(),
        );
    Ok(())
}

/// Keeps only the metadata that identifies the object and that users attach to it.
fn strip_metadata(metadata: ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: metadata.name,
        namespace: metadata.namespace,
        labels: metadata.labels,
        annotations: metadata.annotations,
        ..ObjectMeta::default()
    }
}

pub async fn prepare_object(
    driver: &dyn Driver,
    kind: MigratableKind,
    mut object: DynamicObject,
    start_applications: bool,
) -> Result<DynamicObject> {
    if let Some(data) = object.data.as_object_mut() {
        data.remove("status");
    }

    match kind {
        MigratableKind::PersistentVolume => {
            // The claim and storage class are bound anew on the destination cluster
            let spec = spec_mut(&mut object)?;
            spec.remove("claimRef");
            spec.remove("storageClassName");
            object = driver
                .update_migrated_persistent_volume_spec(object)
                .await
                .context(RewritePersistentVolumeSnafu)?;
        }
        MigratableKind::Deployment | MigratableKind::StatefulSet if !start_applications => {
            suspend_workload(&mut object)?;
        }
        _ => {}
    }

    object.metadata = strip_metadata(object.metadata);
    Ok(object)
}

/// Prepares all collected objects. Objects that cannot be prepared are marked as failed on the
/// migration and left out of the result.
pub async fn prepare_objects(
    driver: &dyn Driver,
    migration: &mut Migration,
    objects: Vec<MigratedObject>,
) -> Vec<MigratedObject> {
    let start_applications = migration.spec.start_applications;
    let mut prepared = Vec::with_capacity(objects.len());

    for mut migrated in objects {
        match prepare_object(driver, migrated.kind, migrated.object, start_applications).await {
            Ok(object) => {
                migrated.object = object;
                prepared.push(migrated);
            }
            Err(err) => {
                tracing::warn!(
                    kind = %migrated.info.kind,
                    name = %migrated.info.name,
                    namespace = %migrated.info.namespace,
                    error = &err as &dyn std::error::Error,
                    "Failed to prepare resource for migration"
                );
                migration.set_resource_status(
                    &migrated.info,
                    TransferStatus::Failed,
                    format!("failed to prepare resource: {}", describe(&err)),
                );
            }
        }
    }

    prepared
}

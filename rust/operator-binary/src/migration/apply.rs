//! Creates prepared objects on the destination cluster.
use std::collections::BTreeSet;

use snafu::{ResultExt, Snafu};

use super::{describe, discovery::MigratedObject};
use crate::{
    cluster::{self, DestinationCluster, SourceCluster},
    crd::{Migration, TransferStatus},
};

const MIGRATED_REASON: &str = "Resource migrated successfully";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read the labels of source namespace {namespace}"))]
    NamespaceLabels {
        source: cluster::Error,
        namespace: String,
    },

    #[snafu(display("failed to create namespace {namespace} on the destination cluster"))]
    CreateNamespace {
        source: cluster::Error,
        namespace: String,
    },
}

/// Creates the migrated namespaces on the destination cluster with the labels they carry on the
/// source cluster. Namespaces that exist already are left as they are.
pub async fn ensure_namespaces(
    source: &dyn SourceCluster,
    destination: &dyn DestinationCluster,
    namespaces: &BTreeSet<String>,
) -> Result<(), Error> {
    for namespace in namespaces {
        let labels = source
            .namespace_labels(namespace)
            .await
            .context(NamespaceLabelsSnafu { namespace })?;
        destination
            .ensure_namespace(namespace, &labels)
            .await
            .context(CreateNamespaceSnafu { namespace })?;
    }
    Ok(())
}

async fn apply_object(
    destination: &dyn DestinationCluster,
    migrated: &MigratedObject,
) -> Result<(), cluster::Error> {
    let MigratedObject {
        kind,
        resource,
        object,
        ..
    } = migrated;

    match destination.create(resource, object).await {
        Err(cluster::Error::AlreadyExists { .. }) if kind.is_volume() => {
            // Volumes are bound to replicated storage and must not be recreated
            tracing::debug!(
                kind = %kind,
                name = %migrated.info.name,
                "Volume exists on destination"
            );
            Ok(())
        }
        Err(cluster::Error::AlreadyExists { .. }) => {
            destination.delete(resource, object).await?;
            destination.create(resource, object).await
        }
        result => result,
    }
}

/// Creates every object on the destination cluster and records the outcome per object.
/// Replacing an existing object is attempted once per pass.
pub async fn apply_objects(
    destination: &dyn DestinationCluster,
    migration: &mut Migration,
    objects: &[MigratedObject],
) {
    for migrated in objects {
        match apply_object(destination, migrated).await {
            Ok(()) => {
                migration.set_resource_status(
                    &migrated.info,
                    TransferStatus::Successful,
                    MIGRATED_REASON,
                );
            }
            Err(err) => {
                tracing::warn!(
                    kind = %migrated.info.kind,
                    name = %migrated.info.name,
                    namespace = %migrated.info.namespace,
                    error = &err as &dyn std::error::Error,
                    "Failed to apply resource to destination cluster"
                );
                migration.set_resource_status(
                    &migrated.info,
                    TransferStatus::Failed,
                    format!("failed to apply resource: {}", describe(&err)),
                );
            }
        }
    }
}

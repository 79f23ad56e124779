//! Drives a [`Migration`] through its stages.
//!
//! A migration starts in [`MigrationStage::Initializing`], hands the volumes over to the storage
//! driver in [`MigrationStage::Volumes`] and, if resources are included, recreates the objects
//! owning the volumes on the destination cluster in [`MigrationStage::Applications`]. Every pass
//! picks up where the persisted status left off, so a pass can stop at any point and be retried.
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::kube::ResourceExt;

use crate::{
    cluster::{self, ClusterConnector, RecordStore, SourceCluster},
    crd::{ClusterPair, Migration, MigrationStage, PairingStatus, TransferStatus, VolumeInfo},
    driver::{self, Driver},
    engine::{Change, ChangeHandler},
};

pub mod apply;
pub mod discovery;
pub mod prepare;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Migration {migration} does not name a ClusterPair"))]
    MissingClusterPair { migration: String },

    #[snafu(display("failed to look up ClusterPair {name}"))]
    GetClusterPair {
        source: cluster::Error,
        name: String,
    },

    #[snafu(display("ClusterPair {name} does not exist"))]
    ClusterPairNotFound { name: String },

    #[snafu(display("ClusterPair {name} is not paired yet"))]
    ClusterPairNotReady { name: String },

    #[snafu(display("the storage driver cannot pair ClusterPair {name}"))]
    PairingFailed { name: String },

    #[snafu(display("failed to start the volume migration"))]
    StartMigration { source: driver::Error },

    #[snafu(display("failed to get the status of the volume migration"))]
    GetMigrationStatus { source: driver::Error },

    #[snafu(display("failed to cancel the volume migration of {migration}"))]
    CancelMigration {
        source: driver::Error,
        migration: String,
    },

    #[snafu(display("failed to persist the status of Migration {migration}"))]
    PersistStatus {
        source: cluster::Error,
        migration: String,
    },

    #[snafu(display("failed to discover the resources of the source cluster"))]
    Discovery { source: cluster::Error },

    #[snafu(display("failed to collect the resources to migrate"))]
    CollectResources { source: discovery::Error },

    #[snafu(display("failed to connect to the destination cluster of ClusterPair {pair}"))]
    ConnectDestination {
        source: cluster::Error,
        pair: String,
    },

    #[snafu(display("failed to prepare the namespaces on the destination cluster"))]
    PrepareNamespaces { source: apply::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders an error together with all of its causes on one line.
pub(crate) fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub struct MigrationController {
    driver: Arc<dyn Driver>,
    records: Arc<dyn RecordStore>,
    source: Arc<dyn SourceCluster>,
    connector: Arc<dyn ClusterConnector>,
}

impl MigrationController {
    pub fn new(
        driver: Arc<dyn Driver>,
        records: Arc<dyn RecordStore>,
        source: Arc<dyn SourceCluster>,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            driver,
            records,
            source,
            connector,
        }
    }

    async fn persist(&self, migration: &Migration) -> Result<()> {
        self.records
            .update_migration_status(migration)
            .await
            .context(PersistStatusSnafu {
                migration: migration.name_any(),
            })
    }

    /// Ends the migration as failed. Used for errors that a retry cannot fix.
    async fn fail(&self, migration: &mut Migration, reason: String) -> Result<()> {
        tracing::warn!(migration = %migration.name_any(), %reason, "Migration failed");
        migration.advance(MigrationStage::Final, TransferStatus::Failed);
        migration.status_mut().reason = reason;
        self.persist(migration).await
    }

    async fn paired_cluster_pair(&self, migration: &Migration) -> Result<ClusterPair> {
        let name = &migration.spec.cluster_pair;
        let pair = self
            .records
            .get_cluster_pair(name)
            .await
            .context(GetClusterPairSnafu { name })?
            .context(ClusterPairNotFoundSnafu { name })?;
        let storage_failed = pair
            .status
            .as_ref()
            .is_some_and(|status| status.storage_status == PairingStatus::Error);
        ensure!(!storage_failed, PairingFailedSnafu { name });
        ensure!(pair.is_paired(), ClusterPairNotReadySnafu { name });
        Ok(pair)
    }

    async fn cancel(&self, migration: &Migration) -> Result<()> {
        let name = migration.name_any();
        match self.driver.cancel_migration(migration).await {
            Ok(()) => {
                tracing::info!(migration = %name, "Cancelled volume migration");
                Ok(())
            }
            Err(err) if err.is_not_supported() => {
                tracing::warn!(
                    migration = %name,
                    error = &err as &dyn std::error::Error,
                    "Storage driver cannot cancel the volume migration"
                );
                Ok(())
            }
            Err(err) => Err(err).context(CancelMigrationSnafu { migration: name }),
        }
    }

    async fn reconcile(&self, mut migration: Migration) -> Result<()> {
        let name = migration.name_any();
        ensure!(
            !migration.spec.cluster_pair.is_empty(),
            MissingClusterPairSnafu { migration: name }
        );
        if migration.has_failed() {
            tracing::debug!(migration = %name, "Migration has failed, nothing to do");
            return Ok(());
        }
        if migration.stage().is_none() {
            migration.advance(MigrationStage::Initializing, TransferStatus::Pending);
        }

        let stage = migration.stage();
        tracing::debug!(migration = %name, ?stage, "Reconciling migration");
        let result = match stage {
            None | Some(MigrationStage::Initializing | MigrationStage::Volumes) => {
                self.migrate_volumes(&mut migration).await
            }
            Some(MigrationStage::Applications) => self.migrate_resources(&mut migration).await,
            Some(MigrationStage::Final) => Ok(()),
        };
        match result {
            // A pair the driver cannot establish never becomes ready
            Err(err @ Error::PairingFailed { .. }) => {
                self.fail(&mut migration, describe(&err)).await
            }
            result => result,
        }
    }

    async fn migrate_volumes(&self, migration: &mut Migration) -> Result<()> {
        migration.advance(MigrationStage::Volumes, TransferStatus::InProgress);
        self.paired_cluster_pair(migration).await?;

        let started = migration
            .status
            .as_ref()
            .is_some_and(|status| status.volumes.is_some());
        if !started {
            match self.driver.start_migration(migration).await {
                Ok(volumes) => {
                    tracing::info!(
                        migration = %migration.name_any(),
                        volumes = volumes.len(),
                        "Started volume migration"
                    );
                    migration.status_mut().volumes = Some(volumes);
                    self.persist(migration).await?;
                }
                Err(err) if err.is_not_supported() => {
                    return self.fail(migration, describe(&err)).await;
                }
                Err(err) => return Err(err).context(StartMigrationSnafu),
            }
        }

        let volumes = match self.driver.get_migration_status(migration).await {
            Ok(volumes) => volumes,
            Err(err) if err.is_not_supported() => {
                return self.fail(migration, describe(&err)).await;
            }
            Err(err) => return Err(err).context(GetMigrationStatusSnafu),
        };
        let failed = count_volumes(&volumes, |status| status == TransferStatus::Failed);
        let unfinished = count_volumes(&volumes, |status| !status.is_terminal());
        migration.status_mut().volumes = Some(volumes);

        if failed > 0 {
            return self
                .fail(migration, format!("{failed} volumes failed to migrate"))
                .await;
        }
        if unfinished > 0 {
            tracing::debug!(
                migration = %migration.name_any(),
                unfinished,
                "Volume migration still in progress"
            );
            return self.persist(migration).await;
        }

        if migration.spec.include_resources {
            migration.advance(MigrationStage::Applications, TransferStatus::InProgress);
            self.persist(migration).await?;
            self.migrate_resources(migration).await
        } else {
            migration.advance(MigrationStage::Final, TransferStatus::Successful);
            self.persist(migration).await
        }
    }

    async fn migrate_resources(&self, migration: &mut Migration) -> Result<()> {
        let pair = self.paired_cluster_pair(migration).await?;
        let groups = self.source.discover().await.context(DiscoverySnafu)?;

        migration.status_mut().resources.clear();
        let namespaces = migration.spec.namespaces.clone();
        let mut seen: BTreeMap<String, HashSet<String>> = BTreeMap::new();
        let mut objects = Vec::new();
        for group in groups
            .iter()
            .filter(|group| group.group != discovery::LEGACY_EXTENSIONS_GROUP)
        {
            let collected = discovery::collect_group(
                self.source.as_ref(),
                group,
                &namespaces,
                seen.entry(group.group.clone()).or_default(),
            )
            .await
            .context(CollectResourcesSnafu)?;
            if collected.is_empty() {
                continue;
            }
            migration
                .status_mut()
                .resources
                .extend(collected.iter().map(|migrated| migrated.info.clone()));
            self.persist(migration).await?;
            objects.extend(collected);
        }

        let objects = prepare::prepare_objects(self.driver.as_ref(), migration, objects).await;

        let destination = self
            .connector
            .connect(&pair)
            .await
            .context(ConnectDestinationSnafu {
                pair: pair.name_any(),
            })?;
        apply::ensure_namespaces(self.source.as_ref(), destination.as_ref(), &namespaces)
            .await
            .context(PrepareNamespacesSnafu)?;
        apply::apply_objects(destination.as_ref(), migration, &objects).await;

        let resources = &migration.status_mut().resources;
        let total = resources.len();
        let failed = resources
            .iter()
            .filter(|info| info.status == TransferStatus::Failed)
            .count();
        if failed > 0 {
            self.fail(
                migration,
                format!("{failed} of {total} resources failed to migrate"),
            )
            .await
        } else {
            tracing::info!(
                migration = %migration.name_any(),
                resources = total,
                "Migration finished"
            );
            migration.advance(MigrationStage::Final, TransferStatus::Successful);
            self.persist(migration).await
        }
    }
}

fn count_volumes(volumes: &[VolumeInfo], predicate: impl Fn(TransferStatus) -> bool) -> usize {
    volumes
        .iter()
        .filter(|volume| predicate(volume.status))
        .count()
}

#[async_trait]
impl ChangeHandler<Migration> for MigrationController {
    type Error = Error;

    async fn handle(&self, change: Change<Migration>) -> Result<()> {
        match change {
            Change::Deleted(migration) => self.cancel(&migration).await,
            Change::Applied(migration) => self.reconcile(migration).await,
        }
    }
}

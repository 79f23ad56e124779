//! Establishes and releases the storage pairing of a [`ClusterPair`].
use std::sync::Arc;

use async_trait::async_trait;
use snafu::{ensure, ResultExt, Snafu};
use stackable_operator::kube::ResourceExt;

use crate::{
    cluster::{self, RecordStore},
    crd::{ClusterPair, PairingStatus},
    driver::{self, Driver},
    engine::{Change, ChangeHandler},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to pair the storage of ClusterPair {name}"))]
    CreatePair { source: driver::Error, name: String },

    #[snafu(display("the storage driver paired ClusterPair {name} without reporting a remote storage id"))]
    EmptyRemoteStorageId { name: String },

    #[snafu(display("failed to release the storage pairing of ClusterPair {name}"))]
    DeletePair { source: driver::Error, name: String },

    #[snafu(display("failed to persist the status of ClusterPair {name}"))]
    PersistStatus {
        source: cluster::Error,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct PairingController {
    driver: Arc<dyn Driver>,
    records: Arc<dyn RecordStore>,
}

impl PairingController {
    pub fn new(driver: Arc<dyn Driver>, records: Arc<dyn RecordStore>) -> Self {
        Self { driver, records }
    }

    async fn unpair(&self, pair: &ClusterPair) -> Result<()> {
        let name = pair.name_any();
        if pair.remote_storage_id().is_empty() {
            tracing::debug!(
                cluster_pair = %name,
                "ClusterPair was never paired, nothing to release"
            );
            return Ok(());
        }

        match self.driver.delete_pair(pair).await {
            Ok(()) => {
                tracing::info!(cluster_pair = %name, "Released storage pairing");
                Ok(())
            }
            Err(err) if err.is_not_supported() => {
                tracing::warn!(
                    cluster_pair = %name,
                    error = &err as &dyn std::error::Error,
                    "Storage driver cannot release the pairing, leaving it in place"
                );
                Ok(())
            }
            Err(err) => Err(err).context(DeletePairSnafu { name }),
        }
    }

    async fn pair(&self, mut pair: ClusterPair) -> Result<()> {
        let name = pair.name_any();
        let current = pair.status.clone().unwrap_or_default();
        let mut changed = false;

        if current.storage_status == PairingStatus::Initial {
            tracing::info!(cluster_pair = %name, "New ClusterPair, pairing storage");
            match self.driver.create_pair(&pair).await {
                Ok(remote_storage_id) => {
                    ensure!(
                        !remote_storage_id.is_empty(),
                        EmptyRemoteStorageIdSnafu { name }
                    );
                    let status = pair.status_mut();
                    status.storage_status = PairingStatus::Ready;
                    status.remote_storage_id = remote_storage_id;
                }
                Err(err) if err.is_not_supported() => {
                    tracing::warn!(
                        cluster_pair = %name,
                        error = &err as &dyn std::error::Error,
                        "Storage driver does not support pairing"
                    );
                    pair.status_mut().storage_status = PairingStatus::Error;
                }
                Err(err) => return Err(err).context(CreatePairSnafu { name }),
            }
            changed = true;
        }

        // TODO: check that the API server of the remote cluster is reachable before reporting
        // the scheduler side as ready
        if current.scheduler_status == PairingStatus::Initial {
            pair.status_mut().scheduler_status = PairingStatus::Ready;
            changed = true;
        }

        if changed {
            self.records
                .update_cluster_pair_status(&pair)
                .await
                .context(PersistStatusSnafu { name })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler<ClusterPair> for PairingController {
    type Error = Error;

    async fn handle(&self, change: Change<ClusterPair>) -> Result<()> {
        match change {
            Change::Deleted(pair) => self.unpair(&pair).await,
            Change::Applied(pair) => self.pair(pair).await,
        }
    }
}

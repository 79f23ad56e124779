//! Routes change notifications for the tracked custom resources to their state machines.
use std::sync::Arc;

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};

use crate::{
    cluster::{ClusterConnector, RecordStore, SourceCluster},
    crd::{ClusterPair, Migration},
    driver::Driver,
    migration::{self, MigrationController},
    pairing::{self, PairingController},
};

/// A change of one object, as seen by the state machine responsible for its kind.
#[derive(Clone, Debug)]
pub enum Change<K> {
    /// The object was created or updated, or a periodic resync is due.
    Applied(K),
    /// The object is being deleted.
    Deleted(K),
}

#[async_trait]
pub trait ChangeHandler<K: Send + 'static>: Send + Sync {
    type Error: Send;

    async fn handle(&self, change: Change<K>) -> Result<(), Self::Error>;
}

#[derive(Clone, Debug)]
pub enum Event {
    ClusterPair(Change<ClusterPair>),
    Migration(Change<Migration>),
}

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to handle ClusterPair change"))]
    ClusterPair { source: pairing::Error },

    #[snafu(display("failed to handle Migration change"))]
    Migration { source: migration::Error },
}

pub struct Engine {
    pairing: PairingController,
    migration: MigrationController,
}

impl Engine {
    pub fn new(
        driver: Arc<dyn Driver>,
        records: Arc<dyn RecordStore>,
        source: Arc<dyn SourceCluster>,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            pairing: PairingController::new(driver.clone(), records.clone()),
            migration: MigrationController::new(driver, records, source, connector),
        }
    }

    pub async fn dispatch(&self, event: Event) -> Result<(), Error> {
        match event {
            Event::ClusterPair(change) => self
                .pairing
                .handle(change)
                .await
                .context(ClusterPairSnafu),
            Event::Migration(change) => self
                .migration
                .handle(change)
                .await
                .context(MigrationSnafu),
        }
    }
}

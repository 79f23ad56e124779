//! Connects the [`Engine`] to the kube-rs controller runtime.
//!
//! Both custom resources carry a finalizer, so that the engine sees their deletion before the
//! object is gone and can release pairings or cancel volume migrations.
use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    kube::{
        runtime::{
            controller::Action,
            finalizer::{self, finalizer, Event as FinalizerEvent},
        },
        Api, ResourceExt,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{ClusterPair, Migration},
    engine::{self, Change, Engine, Event},
    OPERATOR_NAME,
};

pub const CLUSTER_PAIR_CONTROLLER_NAME: &str = "clusterpair";
pub const MIGRATION_CONTROLLER_NAME: &str = "migration";
pub const CLUSTER_PAIR_FULL_CONTROLLER_NAME: &str =
    concatcp!(CLUSTER_PAIR_CONTROLLER_NAME, '.', OPERATOR_NAME);
pub const MIGRATION_FULL_CONTROLLER_NAME: &str =
    concatcp!(MIGRATION_CONTROLLER_NAME, '.', OPERATOR_NAME);

pub const FINALIZER_NAME: &str = concatcp!(OPERATOR_NAME, "/finalizer");

/// Objects are revisited at least this often, which drives the polling of volume migrations.
const RESYNC_PERIOD: Duration = Duration::from_secs(30);
const ERROR_REQUEUE_PERIOD: Duration = Duration::from_secs(5);

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub engine: Engine,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to reconcile ClusterPair"))]
    ReconcileClusterPair {
        source: finalizer::Error<engine::Error>,
    },

    #[snafu(display("failed to reconcile Migration"))]
    ReconcileMigration {
        source: finalizer::Error<engine::Error>,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

fn change<K: Clone>(event: FinalizerEvent<K>) -> Change<K> {
    match event {
        FinalizerEvent::Apply(object) => Change::Applied(Arc::unwrap_or_clone(object)),
        FinalizerEvent::Cleanup(object) => Change::Deleted(Arc::unwrap_or_clone(object)),
    }
}

pub async fn reconcile_cluster_pair(pair: Arc<ClusterPair>, ctx: Arc<Ctx>) -> Result<Action> {
    tracing::info!(cluster_pair = %pair.name_any(), "Starting reconcile");
    let api = Api::<ClusterPair>::all(ctx.client.as_kube_client());
    let engine = &ctx.engine;

    finalizer(&api, FINALIZER_NAME, pair, |event| async move {
        engine
            .dispatch(Event::ClusterPair(change(event)))
            .await?;
        Ok::<_, engine::Error>(Action::requeue(RESYNC_PERIOD))
    })
    .await
    .context(ReconcileClusterPairSnafu)
}

pub async fn reconcile_migration(migration: Arc<Migration>, ctx: Arc<Ctx>) -> Result<Action> {
    tracing::info!(migration = %migration.name_any(), "Starting reconcile");
    let namespace = migration.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let api = Api::<Migration>::namespaced(ctx.client.as_kube_client(), &namespace);
    let engine = &ctx.engine;

    finalizer(&api, FINALIZER_NAME, migration, |event| async move {
        engine.dispatch(Event::Migration(change(event))).await?;
        Ok::<_, engine::Error>(Action::requeue(RESYNC_PERIOD))
    })
    .await
    .context(ReconcileMigrationSnafu)
}

pub fn error_policy<K>(_obj: Arc<K>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(ERROR_REQUEUE_PERIOD)
}

use std::sync::Arc;

use clap::Parser;
use futures::stream::StreamExt;
use stackable_operator::{
    cli::{Command, ProductOperatorRun},
    kube::{
        runtime::{
            events::{Recorder, Reporter},
            watcher, Controller,
        },
        Api, CustomResourceExt,
    },
    logging::controller::report_controller_reconciled,
    shared::yaml::SerializeOptions,
    YamlSchema,
};

use crate::{
    cluster::kubernetes::{KubeClusterConnector, KubeRecordStore, KubeSourceCluster},
    controller::{CLUSTER_PAIR_FULL_CONTROLLER_NAME, MIGRATION_FULL_CONTROLLER_NAME},
    crd::{ClusterPair, Migration},
    driver::DriverRegistry,
    engine::Engine,
};

mod cluster;
mod controller;
mod crd;
mod driver;
mod engine;
mod migration;
mod pairing;
#[cfg(test)]
mod testing;

const OPERATOR_NAME: &str = "migration.stackable.tech";

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<MigrationOperatorRun>,
}

#[derive(Parser)]
struct MigrationOperatorRun {
    /// Name of the storage driver that pairs clusters and replicates volumes.
    #[arg(long, env)]
    driver: String,

    #[clap(flatten)]
    common: ProductOperatorRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            ClusterPair::crd()
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())?;
            println!("---");
            Migration::crd()
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())?;
        }
        Command::Run(MigrationOperatorRun {
            driver,
            common:
                ProductOperatorRun {
                    watch_namespace,
                    tracing_target,
                    cluster_info_opts,
                    ..
                },
        }) => {
            stackable_operator::logging::initialize_logging(
                "MIGRATION_OPERATOR_LOG",
                "migration-operator",
                tracing_target,
            );
            tracing::info!(
                built_info.pkg_version = built_info::PKG_VERSION,
                built_info.git_version = built_info::GIT_VERSION,
                built_info.target = built_info::TARGET,
                built_info.built_time_utc = built_info::BUILT_TIME_UTC,
                built_info.rustc_version = built_info::RUSTC_VERSION,
                "Starting {description}",
                description = built_info::PKG_DESCRIPTION
            );

            let driver_name = driver;
            let driver = DriverRegistry::with_builtin_drivers()?.get(&driver_name)?;
            tracing::info!(driver = %driver_name, "Using storage driver");

            let client = stackable_operator::client::initialize_operator(
                Some(OPERATOR_NAME.to_string()),
                &cluster_info_opts,
            )
            .await?;
            let kube_client = client.as_kube_client();

            let engine = Engine::new(
                driver,
                Arc::new(KubeRecordStore::new(kube_client.clone())),
                Arc::new(KubeSourceCluster::new(kube_client.clone())),
                Arc::new(KubeClusterConnector),
            );
            let ctx = Arc::new(controller::Ctx {
                client: client.clone(),
                engine,
            });

            let cluster_pair_recorder = Arc::new(Recorder::new(kube_client.clone(), Reporter {
                controller: CLUSTER_PAIR_FULL_CONTROLLER_NAME.to_string(),
                instance: None,
            }));
            let cluster_pair_controller = Controller::new(
                Api::<ClusterPair>::all(kube_client.clone()),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(
                controller::reconcile_cluster_pair,
                controller::error_policy,
                ctx.clone(),
            )
            .for_each_concurrent(
                16, // concurrency limit
                move |result| {
                    // The event_recorder needs to be shared across all invocations, so that
                    // events are correctly aggregated
                    let event_recorder = cluster_pair_recorder.clone();
                    async move {
                        report_controller_reconciled(
                            &event_recorder,
                            CLUSTER_PAIR_FULL_CONTROLLER_NAME,
                            &result,
                        )
                        .await;
                    }
                },
            );

            let migration_recorder = Arc::new(Recorder::new(kube_client, Reporter {
                controller: MIGRATION_FULL_CONTROLLER_NAME.to_string(),
                instance: None,
            }));
            let migration_controller = Controller::new(
                watch_namespace.get_api::<Migration>(&client),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(controller::reconcile_migration, controller::error_policy, ctx)
            .for_each_concurrent(16, move |result| {
                let event_recorder = migration_recorder.clone();
                async move {
                    report_controller_reconciled(
                        &event_recorder,
                        MIGRATION_FULL_CONTROLLER_NAME,
                        &result,
                    )
                    .await;
                }
            });

            futures::future::join(cluster_pair_controller, migration_controller).await;
        }
    }

    Ok(())
}

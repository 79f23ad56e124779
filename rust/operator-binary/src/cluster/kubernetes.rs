use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use snafu::{OptionExt, ResultExt};
use stackable_operator::{
    k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta},
    kube::{
        self,
        api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
        config::{KubeConfigOptions, Kubeconfig},
        core::TypeMeta,
        discovery::{Discovery, Scope},
        Api, Client, Config, ResourceExt,
    },
};

use super::{
    ClusterConnector, CreateNamespaceSnafu, CreateObjectSnafu, DeleteObjectSnafu,
    DestinationCluster, DiscoveredGroup, DiscoveredResource, DiscoverySnafu, Error,
    GetClusterPairSnafu, GetNamespaceSnafu, KubeconfigSnafu, ListObjectsSnafu,
    ObjectHasNoNamespaceSnafu, RecordStore, RemoteClientSnafu, SourceCluster, UpdateStatusSnafu,
};
use crate::crd::{ClusterPair, Migration};

type Result<T, E = Error> = std::result::Result<T, E>;

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.reason == "AlreadyExists")
}

/// Status updates are merge patches of the whole `status` subtree.
fn status_patch<S: serde::Serialize>(status: &S) -> Patch<serde_json::Value> {
    Patch::Merge(json!({ "status": status }))
}

pub struct KubeRecordStore {
    client: Client,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get_cluster_pair(&self, name: &str) -> Result<Option<ClusterPair>> {
        Api::<ClusterPair>::all(self.client.clone())
            .get_opt(name)
            .await
            .context(GetClusterPairSnafu { name })
    }

    async fn update_cluster_pair_status(&self, pair: &ClusterPair) -> Result<()> {
        let name = pair.name_any();
        Api::<ClusterPair>::all(self.client.clone())
            .patch_status(&name, &PatchParams::default(), &status_patch(&pair.status))
            .await
            .context(UpdateStatusSnafu {
                kind: "ClusterPair",
                name: name.clone(),
            })?;
        Ok(())
    }

    async fn update_migration_status(&self, migration: &Migration) -> Result<()> {
        let name = migration.name_any();
        let namespace = migration.namespace().context(ObjectHasNoNamespaceSnafu)?;
        Api::<Migration>::namespaced(self.client.clone(), &namespace)
            .patch_status(
                &name,
                &PatchParams::default(),
                &status_patch(&migration.status),
            )
            .await
            .context(UpdateStatusSnafu {
                kind: "Migration",
                name: name.clone(),
            })?;
        Ok(())
    }
}

pub struct KubeSourceCluster {
    client: Client,
}

impl KubeSourceCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceCluster for KubeSourceCluster {
    async fn discover(&self) -> Result<Vec<DiscoveredGroup>> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .context(DiscoverySnafu)?;

        Ok(discovery
            .groups()
            .flat_map(|group| {
                group.versions().map(move |version| DiscoveredGroup {
                    group: group.name().to_string(),
                    version: version.to_string(),
                    resources: group
                        .versioned_resources(version)
                        .into_iter()
                        .map(|(resource, capabilities)| DiscoveredResource {
                            resource,
                            namespaced: matches!(capabilities.scope, Scope::Namespaced),
                        })
                        .collect(),
                })
            })
            .collect())
    }

    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let ar = &resource.resource;
        let api: Api<DynamicObject> = match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, ar),
            None => Api::all_with(self.client.clone(), ar),
        };
        let objects = api
            .list(&ListParams::default())
            .await
            .context(ListObjectsSnafu {
                kind: ar.kind.clone(),
            })?;

        // Items of a list response carry no type information of their own
        Ok(objects
            .items
            .into_iter()
            .map(|mut object| {
                object.types = Some(TypeMeta {
                    api_version: ar.api_version.clone(),
                    kind: ar.kind.clone(),
                });
                object
            })
            .collect())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let namespace = Api::<Namespace>::all(self.client.clone())
            .get_opt(namespace)
            .await
            .context(GetNamespaceSnafu { namespace })?;
        Ok(namespace
            .and_then(|namespace| namespace.metadata.labels)
            .unwrap_or_default())
    }
}

/// Connects to the remote cluster using the kubeconfig stored in the [`ClusterPair`].
pub struct KubeClusterConnector;

#[async_trait]
impl ClusterConnector for KubeClusterConnector {
    async fn connect(&self, pair: &ClusterPair) -> Result<Box<dyn DestinationCluster>> {
        let pair_name = pair.name_any();
        let kubeconfig: Kubeconfig = pair.spec.config.clone();
        let options = KubeConfigOptions {
            context: kubeconfig.current_context.clone(),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context(KubeconfigSnafu {
                pair: pair_name.clone(),
            })?;
        let client = Client::try_from(config).context(RemoteClientSnafu { pair: pair_name })?;

        Ok(Box::new(KubeDestinationCluster { client }))
    }
}

pub struct KubeDestinationCluster {
    client: Client,
}

impl KubeDestinationCluster {
    fn api(
        &self,
        resource: &DiscoveredResource,
        object: &DynamicObject,
    ) -> Result<Api<DynamicObject>> {
        if resource.namespaced {
            let namespace = object.namespace().context(ObjectHasNoNamespaceSnafu)?;
            Ok(Api::namespaced_with(
                self.client.clone(),
                &namespace,
                &resource.resource,
            ))
        } else {
            Ok(Api::all_with(self.client.clone(), &resource.resource))
        }
    }
}

#[async_trait]
impl DestinationCluster for KubeDestinationCluster {
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match Api::<Namespace>::all(self.client.clone())
            .create(&PostParams::default(), &namespace)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_already_exists(&err) => Ok(()),
            Err(err) => Err(err).context(CreateNamespaceSnafu { namespace: name }),
        }
    }

    async fn create(&self, resource: &DiscoveredResource, object: &DynamicObject) -> Result<()> {
        let kind = resource.resource.kind.clone();
        let name = object.name_any();
        match self
            .api(resource, object)?
            .create(&PostParams::default(), object)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_already_exists(&err) => Err(Error::AlreadyExists { kind, name }),
            Err(err) => Err(err).context(CreateObjectSnafu { kind, name }),
        }
    }

    async fn delete(&self, resource: &DiscoveredResource, object: &DynamicObject) -> Result<()> {
        let name = object.name_any();
        self.api(resource, object)?
            .delete(&name, &DeleteParams::default())
            .await
            .with_context(|_| DeleteObjectSnafu {
                kind: resource.resource.kind.clone(),
                name: name.clone(),
            })?;
        Ok(())
    }
}

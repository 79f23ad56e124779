use async_trait::async_trait;
use stackable_operator::kube::{api::DynamicObject, ResourceExt};

use super::{Driver, Error};
use crate::crd::{ClusterPair, Migration, VolumeInfo};

/// A driver that replicates nothing. Pairing always succeeds and migrations report no volumes,
/// which turns every migration into a migration of resources only.
pub struct NoopDriver;

impl NoopDriver {
    pub const NAME: &'static str = "noop";
}

#[async_trait]
impl Driver for NoopDriver {
    async fn create_pair(&self, pair: &ClusterPair) -> Result<String, Error> {
        let id = pair.uid().unwrap_or_else(|| pair.name_any());
        Ok(format!("{}-{id}", Self::NAME))
    }

    async fn delete_pair(&self, _pair: &ClusterPair) -> Result<(), Error> {
        Ok(())
    }

    async fn start_migration(&self, migration: &Migration) -> Result<Vec<VolumeInfo>, Error> {
        tracing::debug!(
            migration = %migration.name_any(),
            "noop driver does not replicate volumes"
        );
        Ok(Vec::new())
    }

    async fn get_migration_status(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>, Error> {
        Ok(Vec::new())
    }

    async fn cancel_migration(&self, _migration: &Migration) -> Result<(), Error> {
        Ok(())
    }

    async fn update_migrated_persistent_volume_spec(
        &self,
        object: DynamicObject,
    ) -> Result<DynamicObject, Error> {
        Ok(object)
    }
}

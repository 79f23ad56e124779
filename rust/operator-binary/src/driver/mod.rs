//! The contract between the migration engine and the storage backend that replicates volumes.
//!
//! Drivers are selected by name from a [`DriverRegistry`] that is built once at start-up and
//! handed to the controllers. A backend that cannot pair clusters or migrate volumes keeps the
//! default method implementations, which report [`Error::NotSupported`].
use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use snafu::Snafu;
use stackable_operator::kube::api::DynamicObject;

use crate::crd::{ClusterPair, Migration, VolumeInfo};

mod noop;
mod unsupported;

pub use noop::NoopDriver;
pub use unsupported::UnsupportedDriver;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("the storage driver does not support {operation}"))]
    NotSupported { operation: &'static str },

    #[snafu(display("the storage driver failed to {operation}: {message}"))]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[snafu(display("no storage driver named {name:?} is registered, available drivers: {available:?}"))]
    UnknownDriver {
        name: String,
        available: Vec<String>,
    },

    #[snafu(display("a storage driver named {name:?} is already registered"))]
    DuplicateDriver { name: String },
}

impl Error {
    /// Whether the driver lacks the capability altogether. Retrying such an operation never
    /// succeeds.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported { .. })
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    /// Pairs the local storage with the storage of the remote cluster and returns the identifier
    /// of the remote storage.
    async fn create_pair(&self, _pair: &ClusterPair) -> Result<String, Error> {
        NotSupportedSnafu {
            operation: "cluster pairing",
        }
        .fail()
    }

    /// Releases a pairing that was established by [`Driver::create_pair`].
    async fn delete_pair(&self, _pair: &ClusterPair) -> Result<(), Error> {
        NotSupportedSnafu {
            operation: "cluster pairing",
        }
        .fail()
    }

    /// Starts replicating all volumes selected by the migration. Must not wait for the
    /// replication to finish.
    async fn start_migration(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>, Error> {
        NotSupportedSnafu {
            operation: "volume migration",
        }
        .fail()
    }

    async fn get_migration_status(
        &self,
        _migration: &Migration,
    ) -> Result<Vec<VolumeInfo>, Error> {
        NotSupportedSnafu {
            operation: "volume migration",
        }
        .fail()
    }

    /// Aborts the replication started for the migration, on a best effort basis.
    async fn cancel_migration(&self, _migration: &Migration) -> Result<(), Error> {
        NotSupportedSnafu {
            operation: "volume migration",
        }
        .fail()
    }

    /// Rewrites a PersistentVolume manifest so that it refers to the replicated volume on the
    /// destination cluster.
    async fn update_migrated_persistent_volume_spec(
        &self,
        _object: DynamicObject,
    ) -> Result<DynamicObject, Error> {
        NotSupportedSnafu {
            operation: "volume migration",
        }
        .fail()
    }
}

#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// A registry containing the drivers that ship with the operator.
    pub fn with_builtin_drivers() -> Result<Self, Error> {
        let mut registry = Self::default();
        registry.register(NoopDriver::NAME, Arc::new(NoopDriver))?;
        registry.register(UnsupportedDriver::NAME, Arc::new(UnsupportedDriver))?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
    ) -> Result<(), Error> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return DuplicateDriverSnafu { name }.fail();
        }
        self.drivers.insert(name, driver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>, Error> {
        self.drivers.get(name).cloned().ok_or_else(|| Error::UnknownDriver {
            name: name.to_string(),
            available: self.drivers.keys().cloned().collect(),
        })
    }
}

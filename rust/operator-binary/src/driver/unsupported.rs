use async_trait::async_trait;

use super::Driver;

/// A driver for storage backends without replication support. Every pairing and migration
/// request is answered with [`super::Error::NotSupported`].
pub struct UnsupportedDriver;

impl UnsupportedDriver {
    pub const NAME: &'static str = "unsupported";
}

#[async_trait]
impl Driver for UnsupportedDriver {}

use async_trait::async_trait;

use crate::error::NetworkError;

/// Source of the opaque per-install token that authorizes analytics records.
#[async_trait]
pub trait DeviceTokenProvider: Send + Sync {
    async fn device_token(&self) -> Result<String, NetworkError>;
}

/// A token known up front, e.g. read from the command line.
#[derive(Debug, Clone)]
pub struct StaticDeviceToken(pub String);

#[async_trait]
impl DeviceTokenProvider for StaticDeviceToken {
    async fn device_token(&self) -> Result<String, NetworkError> {
        Ok(self.0.clone())
    }
}

/// Stand-in that issues a random alphanumeric token of a fixed length.
#[derive(Debug, Clone)]
pub struct RandomDeviceToken {
    pub length: usize,
}

impl Default for RandomDeviceToken {
    fn default() -> Self {
        Self { length: 64 }
    }
}

#[async_trait]
impl DeviceTokenProvider for RandomDeviceToken {
    async fn device_token(&self) -> Result<String, NetworkError> {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        Ok(rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect())
    }
}

//! Always-admit plugin. Not part of the configuration table in spec §6 —
//! useful for local development and exercising the rest of the gateway
//! without standing up a real credential source.

use super::AuthPlugin;

pub struct AllowAllPlugin;

impl AllowAllPlugin {
    pub fn init() -> Self {
        Self
    }
}

impl AuthPlugin for AllowAllPlugin {
    async fn validate_key(&self, _device_key: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

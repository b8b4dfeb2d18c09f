//! Static allowlist plugin backed by `DEVICE_KEYS` (comma-separated).

use std::collections::HashSet;

use super::AuthPlugin;

pub struct EnvListPlugin {
    keys: HashSet<String>,
}

impl EnvListPlugin {
    pub fn init(device_keys: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            keys: device_keys.iter().cloned().collect(),
        })
    }
}

impl AuthPlugin for EnvListPlugin {
    async fn validate_key(&self, device_key: &str) -> anyhow::Result<bool> {
        Ok(self.keys.contains(device_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validates_against_allowlist() {
        let plugin = EnvListPlugin::init(&["abc".to_string(), "def".to_string()]).unwrap();
        assert!(plugin.validate_key("abc").await.unwrap());
        assert!(!plugin.validate_key("xyz").await.unwrap());
    }
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallServiceConfig, CallServiceConfigBuilder, ServiceSettings, ANY_MARKER, ANY_MARKER_ALIAS};
use crate::errors::{Result, ServiceError};

/// Maps call types to their [`CallServiceConfig`].
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone)]
pub struct CallServiceConfigRegistry {
    configs: Arc<RwLock<HashMap<String, CallServiceConfig>>>,
}

impl Default for CallServiceConfigRegistry {
    /// Registry with the default config registered as the fallback
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(ANY_MARKER, CallServiceConfig::default());
        registry
    }
}

impl CallServiceConfigRegistry {
    /// Registry without any entry, not even a fallback
    pub fn empty() -> Self {
        Self {
            configs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or overwrite the config of a call type
    pub fn register(&self, call_type: impl Into<String>, config: CallServiceConfig) {
        let call_type: String = call_type.into();
        let call_type = normalize(&call_type).to_string();
        debug!("Registering call service config (call_type: {}, config: {:?})", call_type, config);
        self.configs.write().insert(call_type, config);
    }

    /// Build a config from the defaults and register it
    pub fn register_with<F>(&self, call_type: impl Into<String>, build: F)
    where
        F: FnOnce(CallServiceConfigBuilder) -> CallServiceConfigBuilder,
    {
        let config = build(CallServiceConfigBuilder::default()).build();
        self.register(call_type, config);
    }

    /// Config for a call type, else the fallback.
    ///
    /// Fails with [`ServiceError::ConfigNotFound`] when the fallback was
    /// never registered.
    pub fn get(&self, call_type: &str) -> Result<CallServiceConfig> {
        let configs = self.configs.read();
        configs
            .get(normalize(call_type))
            .or_else(|| configs.get(ANY_MARKER))
            .cloned()
            .ok_or_else(|| ServiceError::ConfigNotFound {
                call_type: call_type.to_string(),
            })
    }

    /// Patch the config of a call type.
    ///
    /// Starts from the registered entry (or the defaults when the type has
    /// none), so only the fields the updater sets change.
    pub fn update<F>(&self, call_type: impl Into<String>, patch: F) -> CallServiceConfig
    where
        F: FnOnce(CallServiceConfigBuilder) -> CallServiceConfigBuilder,
    {
        let call_type: String = call_type.into();
        let call_type = normalize(&call_type).to_string();
        let mut configs = self.configs.write();
        let current = configs.get(&call_type).cloned().unwrap_or_default();
        let updated = patch(CallServiceConfigBuilder::from(current)).build();
        debug!("Updated call service config (call_type: {}, config: {:?})", call_type, updated);
        configs.insert(call_type, updated.clone());
        updated
    }

    pub fn contains(&self, call_type: &str) -> bool {
        self.configs.read().contains_key(normalize(call_type))
    }

    /// Registered call types, sorted
    pub fn call_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.configs.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Registry from a TOML document; the `[settings]` table is ignored
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(ConfigFile::from_toml_str(source)?.into_parts().0)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ConfigFile::from_toml_file(path)?.into_parts().0)
    }
}

fn normalize(call_type: &str) -> &str {
    if call_type == ANY_MARKER_ALIAS {
        ANY_MARKER
    } else {
        call_type
    }
}

/// On-disk form of the service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub settings: ServiceSettings,
    pub types: HashMap<String, CallServiceConfig>,
}

impl ConfigFile {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ServiceError::config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Split into a registry holding every `[types.*]` table and the settings
    pub fn into_parts(self) -> (CallServiceConfigRegistry, ServiceSettings) {
        let registry = CallServiceConfigRegistry::empty();
        for (call_type, config) in self.types {
            registry.register(call_type, config);
        }
        (registry, self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioUsage;
    use crate::profile::ServiceClass;

    #[test]
    fn exact_match_wins_over_fallback() {
        let registry = CallServiceConfigRegistry::default();
        registry.register_with("livestream", |b| b.with_service_class(ServiceClass::LivestreamHost));

        assert_eq!(
            registry.get("livestream").unwrap().service_class,
            ServiceClass::LivestreamHost
        );
        assert_eq!(registry.get("default").unwrap().service_class, ServiceClass::Call);
    }

    #[test]
    fn alias_resolves_on_lookup() {
        let registry = CallServiceConfigRegistry::empty();
        assert!(!registry.contains(ANY_MARKER_ALIAS));

        registry.register_with(ANY_MARKER_ALIAS, |b| b.with_service_class(ServiceClass::AudioCall));

        assert!(registry.contains(ANY_MARKER_ALIAS));
        assert!(registry.contains(ANY_MARKER));
        assert_eq!(
            registry.get(ANY_MARKER_ALIAS).unwrap().service_class,
            ServiceClass::AudioCall
        );
        assert_eq!(registry.call_types(), vec![ANY_MARKER.to_string()]);
    }

    #[test]
    fn missing_fallback_is_config_not_found() {
        let registry = CallServiceConfigRegistry::empty();
        registry.register("livestream", CallServiceConfig::default());

        assert!(registry.get("livestream").is_ok());
        assert_eq!(
            registry.get("default").unwrap_err(),
            ServiceError::ConfigNotFound {
                call_type: "default".to_string()
            }
        );
    }

    #[test]
    fn update_preserves_untouched_fields() {
        let registry = CallServiceConfigRegistry::default();
        registry.register_with("audio_room", |b| {
            b.with_run_in_foreground(false)
                .with_audio_usage(AudioUsage::Media)
                .with_service_class(ServiceClass::AudioCall)
        });
        let before = registry.get("audio_room").unwrap();

        let after = registry.update("audio_room", |b| b.with_telecom(true));

        assert!(after.enable_telecom);
        assert_eq!(
            CallServiceConfig {
                enable_telecom: before.enable_telecom,
                ..after.clone()
            },
            before
        );
        assert_eq!(registry.get("audio_room").unwrap(), after);
    }

    #[test]
    fn update_of_unknown_type_starts_from_defaults() {
        let registry = CallServiceConfigRegistry::empty();
        let config = registry.update("new_type", |b| b.with_audio_usage(AudioUsage::Media));
        assert_eq!(
            config,
            CallServiceConfig {
                audio_usage: AudioUsage::Media,
                ..CallServiceConfig::default()
            }
        );
    }

    #[test]
    fn star_alias_registers_fallback() {
        let registry = CallServiceConfigRegistry::from_toml_str(
            "[types.\"*\"]\nservice_class = \"audio_call\"\n",
        )
        .unwrap();
        assert!(registry.contains(ANY_MARKER));
        assert_eq!(registry.get("anything").unwrap().service_class, ServiceClass::AudioCall);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = CallServiceConfigRegistry::from_toml_str("[types.x]\nservice_class = 5").unwrap_err();
        assert!(matches!(err, ServiceError::Config { .. }));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ConfigFile::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ServiceError::Config { .. }));
    }
}

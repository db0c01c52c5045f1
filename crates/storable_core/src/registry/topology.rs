//! The storage topology an activated registry serves.

use crate::backend::StorageBackend;
use crate::cache::{CacheDefinition, CacheLevel, CacheStore};
use crate::error::{CoreError, CoreResult};
use crate::metadata::EntityDescriptor;
use crate::registry::config::{ProviderConfig, RegistryConfig, UnitConfig};
use crate::registry::selector::AccessMode;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where an entity's records are cached for one provider.
#[derive(Debug, Clone)]
pub(crate) enum CacheAttachment {
    /// A store shared by every manager of the registry.
    Shared(Arc<dyn CacheStore>),
    /// A store each manager creates for itself.
    Local(CacheDefinition),
}

/// One activated storage unit.
#[derive(Debug)]
pub(crate) struct Unit {
    /// Unit name.
    pub(crate) name: String,
    /// Providers accepting writes, in configuration order.
    pub(crate) read_write: Vec<Arc<dyn StorageBackend>>,
    /// Read-only providers, in configuration order.
    pub(crate) read_only: Vec<Arc<dyn StorageBackend>>,
    /// Managed types and their descriptors.
    pub(crate) managed: HashMap<TypeId, Arc<EntityDescriptor>>,
    /// (provider, type) -> cache.
    pub(crate) attachments: HashMap<(String, TypeId), CacheAttachment>,
    /// Cleared when the registry shuts down.
    pub(crate) live: Arc<AtomicBool>,
}

impl Unit {
    /// Backends eligible for an access.
    ///
    /// Reads prefer the read-only providers and fall back to the read-write
    /// ones when the unit has none.
    pub(crate) fn pool(&self, mode: AccessMode) -> &[Arc<dyn StorageBackend>] {
        match mode {
            AccessMode::Write => &self.read_write,
            AccessMode::Read if self.read_only.is_empty() => &self.read_write,
            AccessMode::Read => &self.read_only,
        }
    }

    /// Fails once the registry has shut down.
    pub(crate) fn ensure_live(&self) -> CoreResult<()> {
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::illegal_state("backend registry is not active"))
        }
    }

    pub(crate) fn attachment(&self, provider: &str, type_id: TypeId) -> Option<&CacheAttachment> {
        self.attachments.get(&(provider.to_string(), type_id))
    }
}

/// Everything built by one successful activation.
#[derive(Debug)]
pub(crate) struct Topology {
    pub(crate) units: HashMap<String, Arc<Unit>>,
    pub(crate) default_unit: Option<String>,
    /// Backends in activation order.
    pub(crate) backends: Vec<Arc<dyn StorageBackend>>,
    pub(crate) shared_caches: Vec<Arc<dyn CacheStore>>,
    pub(crate) live: Arc<AtomicBool>,
}

/// Picks the cache id an entity uses behind one provider.
///
/// Levels are scanned from least to most specific (entity, schema, unit,
/// provider) and every level that names a cache overrides the previous one.
/// The registry-wide default applies when no level names one. Entities that
/// are not cacheable never get a cache.
pub(crate) fn resolve_cache_id<'c>(
    config: &'c RegistryConfig,
    unit: &'c UnitConfig,
    provider: &'c ProviderConfig,
    descriptor: &EntityDescriptor,
) -> Option<&'c str> {
    if !descriptor.is_cacheable() {
        return None;
    }
    let levels = [
        config.entity_caches.get(descriptor.name()),
        descriptor
            .schema()
            .and_then(|schema| unit.schema_caches.get(schema)),
        unit.cache.as_ref(),
        provider.cache.as_ref(),
    ];
    levels
        .into_iter()
        .flatten()
        .last()
        .or(config.default_cache.as_ref())
        .map(String::as_str)
}

/// Turns a cache id into an attachment.
pub(crate) fn attach(
    id: &str,
    definitions: &HashMap<String, CacheDefinition>,
    shared: &HashMap<String, Arc<dyn CacheStore>>,
) -> CoreResult<CacheAttachment> {
    let definition = definitions
        .get(id)
        .ok_or_else(|| CoreError::configuration(format!("unknown cache '{id}'")))?;
    match definition.level {
        CacheLevel::Local => Ok(CacheAttachment::Local(definition.clone())),
        CacheLevel::Shared => shared
            .get(id)
            .map(|store| CacheAttachment::Shared(Arc::clone(store)))
            .ok_or_else(|| CoreError::configuration(format!("cache '{id}' was not created"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DescriptorCache;
    use crate::test_entities::{Item, Tag};

    fn config() -> RegistryConfig {
        RegistryConfig::new()
            .cache(CacheDefinition::new("global"))
            .cache(CacheDefinition::new("entity"))
            .cache(CacheDefinition::new("schema"))
            .cache(CacheDefinition::new("unit"))
            .cache(CacheDefinition::new("provider"))
            .default_cache("global")
    }

    #[test]
    fn provider_level_wins() {
        let item = DescriptorCache::new().describe::<Item>().unwrap();
        let config = config().entity_cache("Item", "entity");
        let unit = UnitConfig::new("u").schema_cache("shop", "schema").cache("unit");
        let provider = ProviderConfig::new("p").cache("provider");
        assert_eq!(resolve_cache_id(&config, &unit, &provider, &item), Some("provider"));

        let provider = ProviderConfig::new("p");
        assert_eq!(resolve_cache_id(&config, &unit, &provider, &item), Some("unit"));

        let unit = UnitConfig::new("u").schema_cache("shop", "schema");
        assert_eq!(resolve_cache_id(&config, &unit, &provider, &item), Some("schema"));

        let unit = UnitConfig::new("u");
        assert_eq!(resolve_cache_id(&config, &unit, &provider, &item), Some("entity"));
    }

    #[test]
    fn default_cache_is_the_last_resort() {
        let tag = DescriptorCache::new().describe::<Tag>().unwrap();
        let config = config();
        let unit = UnitConfig::new("u").schema_cache("shop", "schema");
        let provider = ProviderConfig::new("p");
        assert_eq!(resolve_cache_id(&config, &unit, &provider, &tag), Some("global"));

        let bare = RegistryConfig::new();
        assert_eq!(resolve_cache_id(&bare, &unit, &provider, &tag), None);
    }

    #[test]
    fn attach_by_level() {
        let mut definitions = HashMap::new();
        definitions.insert("s".to_string(), CacheDefinition::new("s"));
        definitions.insert(
            "l".to_string(),
            CacheDefinition::new("l").level(CacheLevel::Local),
        );
        let mut shared: HashMap<String, Arc<dyn CacheStore>> = HashMap::new();
        shared.insert(
            "s".to_string(),
            Arc::new(crate::cache::MemoryCacheStore::new(CacheDefinition::new("s"))),
        );

        assert!(matches!(attach("s", &definitions, &shared), Ok(CacheAttachment::Shared(_))));
        assert!(matches!(attach("l", &definitions, &shared), Ok(CacheAttachment::Local(_))));
        assert!(matches!(
            attach("x", &definitions, &shared),
            Err(CoreError::Configuration { .. })
        ));
    }
}

//! Registry configuration.

use crate::cache::CacheDefinition;
use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Topology of storage units, providers and caches.
///
/// Usually produced by an external loader; every field has a default so
/// partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Logical storage units.
    pub units: Vec<UnitConfig>,

    /// Cache pools.
    pub caches: Vec<CacheDefinition>,

    /// Entity name -> cache id overrides.
    pub entity_caches: BTreeMap<String, String>,

    /// Cache used when no attachment rule matches.
    pub default_cache: Option<String>,

    /// Grace period granted to backends on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            caches: Vec::new(),
            entity_caches: BTreeMap::new(),
            default_cache: None,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl RegistryConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a storage unit.
    #[must_use]
    pub fn unit(mut self, unit: UnitConfig) -> Self {
        self.units.push(unit);
        self
    }

    /// Adds a cache pool.
    #[must_use]
    pub fn cache(mut self, cache: CacheDefinition) -> Self {
        self.caches.push(cache);
        self
    }

    /// Attaches an entity to a cache, wherever it is stored.
    #[must_use]
    pub fn entity_cache(mut self, entity: impl Into<String>, cache_id: impl Into<String>) -> Self {
        self.entity_caches.insert(entity.into(), cache_id.into());
        self
    }

    /// Sets the fallback cache.
    #[must_use]
    pub fn default_cache(mut self, cache_id: impl Into<String>) -> Self {
        self.default_cache = Some(cache_id.into());
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Looks up a unit by name.
    #[must_use]
    pub fn find_unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }

    /// The unit flagged default, or the only unit.
    #[must_use]
    pub fn default_unit(&self) -> Option<&UnitConfig> {
        self.units
            .iter()
            .find(|u| u.default)
            .or_else(|| match self.units.as_slice() {
                [only] => Some(only),
                _ => None,
            })
    }

    /// Checks structural consistency.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on duplicate names, several default units,
    /// or a reference to an undefined cache.
    pub fn validate(&self) -> CoreResult<()> {
        let mut cache_ids = HashSet::new();
        for cache in &self.caches {
            if cache.id.is_empty() {
                return Err(CoreError::configuration("cache definition without id"));
            }
            if !cache_ids.insert(cache.id.as_str()) {
                return Err(CoreError::configuration(format!(
                    "duplicate cache id '{}'",
                    cache.id
                )));
            }
        }
        let check_cache = |id: &str, owner: &str| -> CoreResult<()> {
            if cache_ids.contains(id) {
                Ok(())
            } else {
                Err(CoreError::configuration(format!(
                    "{owner} references unknown cache '{id}'"
                )))
            }
        };

        if let Some(id) = &self.default_cache {
            check_cache(id, "default cache")?;
        }
        for (entity, id) in &self.entity_caches {
            check_cache(id, &format!("entity {entity}"))?;
        }

        let mut unit_names = HashSet::new();
        let mut provider_names = HashSet::new();
        for unit in &self.units {
            if !unit_names.insert(unit.name.as_str()) {
                return Err(CoreError::configuration(format!(
                    "duplicate storage unit '{}'",
                    unit.name
                )));
            }
            if let Some(id) = &unit.cache {
                check_cache(id, &format!("unit {}", unit.name))?;
            }
            for (schema, id) in &unit.schema_caches {
                check_cache(id, &format!("schema {schema} of unit {}", unit.name))?;
            }
            for provider in &unit.providers {
                if !provider_names.insert(provider.name.as_str()) {
                    return Err(CoreError::configuration(format!(
                        "duplicate provider '{}'",
                        provider.name
                    )));
                }
                if let Some(id) = &provider.cache {
                    check_cache(id, &format!("provider {}", provider.name))?;
                }
            }
        }

        if self.units.iter().filter(|u| u.default).count() > 1 {
            return Err(CoreError::configuration(
                "more than one storage unit is flagged default",
            ));
        }
        Ok(())
    }
}

/// One logical storage unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Unit name.
    pub name: String,

    /// Whether managers without an explicit unit use this one.
    pub default: bool,

    /// Unit-level cache id.
    pub cache: Option<String>,

    /// Schema name -> cache id overrides.
    pub schema_caches: BTreeMap<String, String>,

    /// Backends serving the unit.
    pub providers: Vec<ProviderConfig>,
}

impl UnitConfig {
    /// Creates a unit with no providers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Flags the unit as default.
    #[must_use]
    pub fn default_unit(mut self) -> Self {
        self.default = true;
        self
    }

    /// Sets the unit-level cache.
    #[must_use]
    pub fn cache(mut self, cache_id: impl Into<String>) -> Self {
        self.cache = Some(cache_id.into());
        self
    }

    /// Attaches a schema to a cache.
    #[must_use]
    pub fn schema_cache(mut self, schema: impl Into<String>, cache_id: impl Into<String>) -> Self {
        self.schema_caches.insert(schema.into(), cache_id.into());
        self
    }

    /// Adds a provider.
    #[must_use]
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }
}

/// One backend slot of a storage unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name; the backend bound to it must report the same name.
    pub name: String,

    /// Whether the provider only serves reads.
    pub read_only: bool,

    /// Provider-level cache id.
    pub cache: Option<String>,
}

impl ProviderConfig {
    /// Creates a read-write provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Flags the provider read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the provider-level cache.
    #[must_use]
    pub fn cache(mut self, cache_id: impl Into<String>) -> Self {
        self.cache = Some(cache_id.into());
        self
    }
}

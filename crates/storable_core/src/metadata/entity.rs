//! The entity trait and its declarative metadata.

use crate::error::CoreResult;
use crate::types::{ConsistencyLevel, DataType, MetadataType};
use crate::value::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Trait for types managed by Storable.
///
/// Implementors provide:
/// - `metadata()`: the declarative structure of the type (name, keys,
///   elements, policies), evaluated once and memoized as an
///   [`EntityDescriptor`](crate::EntityDescriptor)
/// - `get_field()` / `set_field()`: the per-type accessor table, keyed by
///   canonical element name
///
/// `Default` is used to materialize fresh beans from stored records.
///
/// # Example
///
/// ```rust
/// use storable_core::{CoreError, CoreResult, ElementMetadata, Entity, EntityMetadata, Value};
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct User {
///     id: Option<String>,
///     name: Option<String>,
/// }
///
/// impl Entity for User {
///     fn metadata() -> EntityMetadata {
///         EntityMetadata::new("User")
///             .surrogate_key("id")
///             .primary_key(["name"])
///             .element(ElementMetadata::of::<Option<String>>("id"))
///             .element(ElementMetadata::of::<Option<String>>("name"))
///     }
///
///     fn get_field(&self, name: &str) -> Option<Value> {
///         match name {
///             "id" => Some(self.id.clone().into()),
///             "name" => Some(self.name.clone().into()),
///             _ => None,
///         }
///     }
///
///     fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
///         match name {
///             "id" => self.id = value.into_typed()?,
///             "name" => self.name = value.into_typed()?,
///             other => return Err(CoreError::invalid_argument(format!("no field {other}"))),
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Entity: Clone + Default + Send + Sync + 'static {
    /// Returns the declarative metadata of the type.
    fn metadata() -> EntityMetadata;

    /// Reads a field by canonical element name.
    ///
    /// Returns `None` if the type exposes no such field.
    fn get_field(&self, name: &str) -> Option<Value>;

    /// Writes a field by canonical element name.
    ///
    /// The value has already been coerced to the element's data type.
    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()>;
}

/// Declarative metadata of an entity type.
///
/// An empty name means the type carries no entity marker; describing it
/// fails with `InvalidEntityType`.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub(crate) name: String,
    pub(crate) schema: Option<String>,
    pub(crate) version: u32,
    pub(crate) domain: Option<String>,
    pub(crate) aliases: BTreeMap<String, Vec<String>>,
    pub(crate) surrogate_key: Option<String>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) alternate_keys: Vec<(String, Vec<String>)>,
    pub(crate) elements: Vec<ElementMetadata>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) cacheable: bool,
    pub(crate) dirty_checking: bool,
    pub(crate) shared_nothing: bool,
    pub(crate) mutable: bool,
    pub(crate) consistency: ConsistencyLevel,
}

impl Default for EntityMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            schema: None,
            version: 1,
            domain: None,
            aliases: BTreeMap::new(),
            surrogate_key: None,
            primary_key: Vec::new(),
            alternate_keys: Vec::new(),
            elements: Vec::new(),
            ttl: None,
            cacheable: true,
            dirty_checking: false,
            shared_nothing: false,
            mutable: true,
            consistency: ConsistencyLevel::default(),
        }
    }
}

impl EntityMetadata {
    /// Starts the metadata of an entity named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata of a type that is not marked as an entity.
    #[must_use]
    pub fn unmarked() -> Self {
        Self::default()
    }

    /// Sets the schema the entity lives in.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Sets the entity version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the entity domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Adds a name override used by backend `target`.
    #[must_use]
    pub fn alias(mut self, target: impl Into<String>, name: impl Into<String>) -> Self {
        self.aliases.entry(target.into()).or_default().push(name.into());
        self
    }

    /// Declares the surrogate key element.
    #[must_use]
    pub fn surrogate_key(mut self, element: impl Into<String>) -> Self {
        self.surrogate_key = Some(element.into());
        self
    }

    /// Declares the primary key elements, in significant order.
    #[must_use]
    pub fn primary_key<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = elements.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a named alternate key, in significant order.
    #[must_use]
    pub fn alternate_key<I, S>(mut self, name: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternate_keys
            .push((name.into(), elements.into_iter().map(Into::into).collect()));
        self
    }

    /// Adds an element.
    #[must_use]
    pub fn element(mut self, element: ElementMetadata) -> Self {
        self.elements.push(element);
        self
    }

    /// Sets the default record time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets whether records of this type may be cached.
    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Sets the dirty-checking flag.
    #[must_use]
    pub fn dirty_checking(mut self, enabled: bool) -> Self {
        self.dirty_checking = enabled;
        self
    }

    /// Sets the shared-nothing flag.
    #[must_use]
    pub fn shared_nothing(mut self, enabled: bool) -> Self {
        self.shared_nothing = enabled;
        self
    }

    /// Declares records of this type immutable once created.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Sets the requested consistency level.
    #[must_use]
    pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = level;
        self
    }
}

/// Declarative metadata of one element.
#[derive(Debug, Clone)]
pub struct ElementMetadata {
    pub(crate) name: String,
    pub(crate) data_type: Option<DataType>,
    pub(crate) inferred: Option<DataType>,
    pub(crate) instance_type: Option<&'static str>,
    pub(crate) aliases: Vec<String>,
    pub(crate) is_virtual: bool,
    pub(crate) metadata_type: Option<MetadataType>,
    pub(crate) nullable: bool,
}

impl ElementMetadata {
    /// Declares an element whose data type must be given explicitly.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            inferred: None,
            instance_type: None,
            aliases: Vec::new(),
            is_virtual: false,
            metadata_type: None,
            nullable: true,
        }
    }

    /// Declares an element whose data type is inferred from `V`.
    #[must_use]
    pub fn of<V: 'static>(name: impl Into<String>) -> Self {
        Self {
            inferred: DataType::infer::<V>(),
            instance_type: Some(std::any::type_name::<V>()),
            ..Self::new(name)
        }
    }

    /// Sets the data type explicitly, overriding inference.
    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Adds an alternative name the element can be addressed by.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Marks the element as computed; it is never written to storage.
    #[must_use]
    pub fn virtual_element(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Gives the element a managed metadata role.
    #[must_use]
    pub fn metadata(mut self, role: MetadataType) -> Self {
        self.metadata_type = Some(role);
        self
    }

    /// Requires the element to be non-null once stored.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

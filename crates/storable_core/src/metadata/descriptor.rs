//! Structural descriptors built from entity metadata.

use crate::error::{CoreError, CoreResult};
use crate::metadata::entity::{ElementMetadata, EntityMetadata};
use crate::types::{ConsistencyLevel, DataType, MetadataType};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One persisted (or virtual) field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDescriptor {
    name: String,
    data_type: DataType,
    instance_type: Option<&'static str>,
    aliases: Vec<String>,
    is_virtual: bool,
    metadata_type: Option<MetadataType>,
    nullable: bool,
    index: usize,
}

impl ElementDescriptor {
    /// Canonical element name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persisted data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Rust type name when the data type was inferred.
    #[must_use]
    pub fn instance_type(&self) -> Option<&'static str> {
        self.instance_type
    }

    /// Alternative names.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Whether the element is computed and never stored.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Managed metadata role, if any.
    #[must_use]
    pub fn metadata_type(&self) -> Option<MetadataType> {
        self.metadata_type
    }

    /// Whether null is an acceptable stored value.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Position in the entity's element list.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Immutable structural description of an entity type.
///
/// Built once per type by [`DescriptorCache`](crate::DescriptorCache).
/// Key element lists keep the declared order: it is significant for key
/// hashing and for positional parameter binding in backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    name: String,
    type_name: &'static str,
    schema: Option<String>,
    version: u32,
    domain: Option<String>,
    aliases: BTreeMap<String, Vec<String>>,
    surrogate_key: Option<ElementDescriptor>,
    primary_key: Vec<ElementDescriptor>,
    alternate_keys: BTreeMap<String, Vec<ElementDescriptor>>,
    elements: Vec<ElementDescriptor>,
    ttl: Option<Duration>,
    cacheable: bool,
    dirty_checking: bool,
    shared_nothing: bool,
    mutable: bool,
    consistency: ConsistencyLevel,
    // lowercase element name or alias -> element index
    resolution: HashMap<String, usize>,
}

impl EntityDescriptor {
    /// Builds a descriptor from declarative metadata.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntityType` if:
    /// - the metadata carries no entity name (the type is not marked)
    /// - two elements or aliases collide
    /// - an element's data type is neither explicit nor inferable
    /// - a key names an unknown or virtual element
    /// - the type declares neither a surrogate nor a primary key
    pub fn build(metadata: EntityMetadata, type_name: &'static str) -> CoreResult<Self> {
        let invalid = |message: String| CoreError::invalid_entity_type(type_name, message);

        if metadata.name.trim().is_empty() {
            return Err(invalid("type is not marked as an entity".to_string()));
        }

        let mut elements = Vec::with_capacity(metadata.elements.len());
        let mut resolution = HashMap::new();
        for (index, element) in metadata.elements.into_iter().enumerate() {
            let descriptor = Self::build_element(element, index).map_err(&invalid)?;
            if resolution
                .insert(descriptor.name.to_lowercase(), index)
                .is_some()
            {
                return Err(invalid(format!("duplicate element '{}'", descriptor.name)));
            }
            elements.push(descriptor);
        }
        // Aliases resolve after every canonical name so a name always wins.
        for element in &elements {
            for alias in &element.aliases {
                let lowered = alias.to_lowercase();
                match resolution.get(&lowered) {
                    Some(&existing) if existing != element.index => {
                        return Err(invalid(format!(
                            "alias '{alias}' of '{}' collides with '{}'",
                            element.name, elements[existing].name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        resolution.insert(lowered, element.index);
                    }
                }
            }
        }

        let key_element = |name: &str, key: &str| -> CoreResult<ElementDescriptor> {
            let element = elements
                .iter()
                .find(|e| e.name == name)
                .or_else(|| {
                    elements
                        .iter()
                        .find(|e| e.name.eq_ignore_ascii_case(name))
                })
                .ok_or_else(|| invalid(format!("{key} names unknown element '{name}'")))?;
            if element.is_virtual {
                return Err(invalid(format!(
                    "{key} element '{name}' is virtual"
                )));
            }
            Ok(element.clone())
        };

        let surrogate_key = metadata
            .surrogate_key
            .as_deref()
            .map(|name| key_element(name, "surrogate key"))
            .transpose()?;

        let primary_key = metadata
            .primary_key
            .iter()
            .map(|name| key_element(name, "primary key"))
            .collect::<CoreResult<Vec<_>>>()?;

        let mut alternate_keys = BTreeMap::new();
        for (key_name, names) in &metadata.alternate_keys {
            if names.is_empty() {
                return Err(invalid(format!("alternate key '{key_name}' has no elements")));
            }
            let key = names
                .iter()
                .map(|name| key_element(name, &format!("alternate key '{key_name}'")))
                .collect::<CoreResult<Vec<_>>>()?;
            if alternate_keys.insert(key_name.clone(), key).is_some() {
                return Err(invalid(format!("duplicate alternate key '{key_name}'")));
            }
        }

        if surrogate_key.is_none() && primary_key.is_empty() {
            return Err(invalid(
                "entity declares neither a surrogate key nor a primary key".to_string(),
            ));
        }

        Ok(Self {
            name: metadata.name,
            type_name,
            schema: metadata.schema,
            version: metadata.version,
            domain: metadata.domain,
            aliases: metadata.aliases,
            surrogate_key,
            primary_key,
            alternate_keys,
            elements,
            ttl: metadata.ttl,
            cacheable: metadata.cacheable,
            dirty_checking: metadata.dirty_checking,
            shared_nothing: metadata.shared_nothing,
            mutable: metadata.mutable,
            consistency: metadata.consistency,
            resolution,
        })
    }

    fn build_element(element: ElementMetadata, index: usize) -> Result<ElementDescriptor, String> {
        if element.name.trim().is_empty() {
            return Err(format!("element #{index} has no name"));
        }
        let data_type = element.data_type.or(element.inferred).ok_or_else(|| {
            format!(
                "cannot resolve data type of element '{}' ({})",
                element.name,
                element.instance_type.unwrap_or("no type given")
            )
        })?;
        Ok(ElementDescriptor {
            name: element.name,
            data_type,
            instance_type: element.instance_type,
            aliases: element.aliases,
            is_virtual: element.is_virtual,
            metadata_type: element.metadata_type,
            nullable: element.nullable,
            index,
        })
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name the descriptor was built for.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Schema the entity lives in.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Entity version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Entity domain.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Per-backend-target name overrides.
    #[must_use]
    pub fn aliases(&self) -> &BTreeMap<String, Vec<String>> {
        &self.aliases
    }

    /// Name the entity goes by for backend `target`.
    #[must_use]
    pub fn name_for(&self, target: &str) -> &str {
        self.aliases
            .get(target)
            .and_then(|names| names.first())
            .map_or(self.name.as_str(), String::as_str)
    }

    /// Surrogate key element.
    #[must_use]
    pub fn surrogate_key(&self) -> Option<&ElementDescriptor> {
        self.surrogate_key.as_ref()
    }

    /// Primary key elements in declared order.
    #[must_use]
    pub fn primary_key(&self) -> &[ElementDescriptor] {
        &self.primary_key
    }

    /// Alternate keys by name, elements in declared order.
    #[must_use]
    pub fn alternate_keys(&self) -> &BTreeMap<String, Vec<ElementDescriptor>> {
        &self.alternate_keys
    }

    /// Elements of one alternate key.
    #[must_use]
    pub fn alternate_key(&self, name: &str) -> Option<&[ElementDescriptor]> {
        self.alternate_keys.get(name).map(Vec::as_slice)
    }

    /// All elements, virtual ones included.
    #[must_use]
    pub fn elements(&self) -> &[ElementDescriptor] {
        &self.elements
    }

    /// Elements that are written to storage.
    pub fn non_virtual_elements(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements.iter().filter(|e| !e.is_virtual)
    }

    /// Elements carrying a metadata role.
    pub fn elements_with(&self, role: MetadataType) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements
            .iter()
            .filter(move |e| e.metadata_type == Some(role))
    }

    /// Resolves an element by name (case-insensitive) or alias.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&ElementDescriptor> {
        self.resolution
            .get(&name.to_lowercase())
            .map(|&index| &self.elements[index])
    }

    /// Default record time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Whether records may be cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Dirty-checking flag.
    #[must_use]
    pub fn is_dirty_checking(&self) -> bool {
        self.dirty_checking
    }

    /// Shared-nothing flag.
    #[must_use]
    pub fn is_shared_nothing(&self) -> bool {
        self.shared_nothing
    }

    /// Whether records may be mutated after creation.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Requested consistency level.
    #[must_use]
    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }
}

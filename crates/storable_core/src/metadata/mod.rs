//! Entity metadata: the declarative source and the built descriptors.
//!
//! An [`Entity`] declares its structure through [`EntityMetadata`]; the
//! [`DescriptorCache`] turns that declaration into an immutable
//! [`EntityDescriptor`] once per type.

mod cache;
mod descriptor;
mod entity;

pub use cache::DescriptorCache;
pub use descriptor::{ElementDescriptor, EntityDescriptor};
pub use entity::{ElementMetadata, Entity, EntityMetadata};

//! Entity types shared by unit tests.

use crate::error::{CoreError, CoreResult};
use crate::metadata::{ElementMetadata, Entity, EntityMetadata};
use crate::types::{DataType, MetadataType};
use crate::value::Value;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

fn no_field(name: &str) -> CoreError {
    CoreError::invalid_argument(format!("no field {name}"))
}

/// Primary key only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub label: Option<String>,
    pub weight: i32,
}

impl Entity for Tag {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Tag")
            .primary_key(["label"])
            .element(ElementMetadata::of::<Option<String>>("label"))
            .element(ElementMetadata::of::<i32>("weight"))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "label" => Some(self.label.clone().into()),
            "weight" => Some(self.weight.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "label" => self.label = value.into_typed()?,
            "weight" => self.weight = value.into_typed::<Option<i32>>()?.unwrap_or_default(),
            other => return Err(no_field(other)),
        }
        Ok(())
    }
}

/// Not marked as an entity.
#[derive(Debug, Clone, Default)]
pub struct Unmarked;

impl Entity for Unmarked {
    fn metadata() -> EntityMetadata {
        EntityMetadata::unmarked()
    }

    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn set_field(&mut self, name: &str, _value: Value) -> CoreResult<()> {
        Err(no_field(name))
    }
}

/// Every key kind and every metadata role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub id: Option<String>,
    pub sku: Option<String>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub qty: i64,
    pub price: f64,
    pub status: Option<String>,
    pub created: Option<SystemTime>,
    pub modified: Option<i64>,
    pub accessed: Option<SystemTime>,
    pub expires: Option<SystemTime>,
    pub ttl: Option<i64>,
    pub owner: Option<Uuid>,
}

impl Entity for Item {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Item")
            .schema("shop")
            .surrogate_key("id")
            .primary_key(["sku"])
            .alternate_key("by_code", ["code"])
            .ttl(Duration::from_secs(3600))
            .element(ElementMetadata::of::<Option<String>>("id"))
            .element(ElementMetadata::of::<Option<String>>("sku"))
            .element(ElementMetadata::of::<Option<String>>("code"))
            .element(ElementMetadata::of::<Option<String>>("name").alias("title"))
            .element(ElementMetadata::of::<i64>("qty"))
            .element(ElementMetadata::of::<f64>("price"))
            .element(ElementMetadata::new("status").data_type(DataType::Enum))
            .element(ElementMetadata::of::<Option<SystemTime>>("created").metadata(MetadataType::CreatedDate))
            .element(ElementMetadata::of::<Option<i64>>("modified").metadata(MetadataType::LastModifiedDate))
            .element(ElementMetadata::of::<Option<SystemTime>>("accessed").metadata(MetadataType::LastAccessDate))
            .element(ElementMetadata::of::<Option<SystemTime>>("expires").metadata(MetadataType::Expires))
            .element(ElementMetadata::of::<Option<i64>>("ttl").metadata(MetadataType::Ttl))
            .element(ElementMetadata::of::<Option<Uuid>>("owner"))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => self.id.clone().into(),
            "sku" => self.sku.clone().into(),
            "code" => self.code.clone().into(),
            "name" => self.name.clone().into(),
            "qty" => self.qty.into(),
            "price" => self.price.into(),
            "status" => self.status.clone().map_or(Value::Null, Value::Enum),
            "created" => self.created.into(),
            "modified" => self.modified.into(),
            "accessed" => self.accessed.into(),
            "expires" => self.expires.into(),
            "ttl" => self.ttl.into(),
            "owner" => self.owner.into(),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "sku" => self.sku = value.into_typed()?,
            "code" => self.code = value.into_typed()?,
            "name" => self.name = value.into_typed()?,
            "qty" => self.qty = value.into_typed::<Option<i64>>()?.unwrap_or_default(),
            "price" => self.price = value.into_typed::<Option<f64>>()?.unwrap_or_default(),
            "status" => self.status = value.into_typed()?,
            "created" => self.created = value.into_typed()?,
            "modified" => self.modified = value.into_typed()?,
            "accessed" => self.accessed = value.into_typed()?,
            "expires" => self.expires = value.into_typed()?,
            "ttl" => self.ttl = value.into_typed()?,
            "owner" => self.owner = value.into_typed()?,
            other => return Err(no_field(other)),
        }
        Ok(())
    }
}

/// Immutable, with a `Uuid` surrogate key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frozen {
    pub id: Option<Uuid>,
    pub body: Option<String>,
}

impl Entity for Frozen {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Frozen")
            .surrogate_key("id")
            .immutable()
            .element(ElementMetadata::of::<Option<Uuid>>("id"))
            .element(ElementMetadata::of::<Option<String>>("body").not_null())
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "body" => Some(self.body.clone().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "body" => self.body = value.into_typed()?,
            other => return Err(no_field(other)),
        }
        Ok(())
    }
}

/// Sequence-backed surrogate key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter {
    pub id: Option<i64>,
    pub label: Option<String>,
}

impl Entity for Counter {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Counter")
            .surrogate_key("id")
            .element(ElementMetadata::of::<Option<i64>>("id"))
            .element(ElementMetadata::of::<Option<String>>("label"))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            "label" => Some(self.label.clone().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "label" => self.label = value.into_typed()?,
            other => return Err(no_field(other)),
        }
        Ok(())
    }
}

/// Surrogate key of a type no generator supports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stamped {
    pub id: Option<SystemTime>,
}

impl Entity for Stamped {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Stamped")
            .surrogate_key("id")
            .element(ElementMetadata::of::<Option<SystemTime>>("id"))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            other => return Err(no_field(other)),
        }
        Ok(())
    }
}

//! Keys, filters and criteria addressing stored records.

use crate::error::{CoreError, CoreResult};
use crate::metadata::EntityDescriptor;
use crate::value::{Record, Value};
use std::cmp::Ordering;
use std::fmt;

/// One way of addressing a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// The surrogate key value.
    Surrogate(Value),
    /// Primary key values, in declared order.
    Primary(Vec<Value>),
    /// Values of a named alternate key, in declared order.
    Alternate {
        /// Alternate key name.
        name: String,
        /// Key values.
        values: Vec<Value>,
    },
}

impl Key {
    /// Surrogate key.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::Surrogate(value.into())
    }

    /// Primary key from its component values.
    pub fn primary<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Primary(values.into_iter().map(Into::into).collect())
    }

    /// Alternate key from its name and component values.
    pub fn alternate<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Alternate {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Extracts this kind of key from a record.
    ///
    /// Returns `None` if the entity declares no such key.
    #[must_use]
    pub fn of_record(kind: KeyKind<'_>, descriptor: &EntityDescriptor, record: &Record) -> Option<Self> {
        match kind {
            KeyKind::Surrogate => descriptor
                .surrogate_key()
                .map(|e| Self::Surrogate(record.value(e.name()))),
            KeyKind::Primary => (!descriptor.primary_key().is_empty()).then(|| {
                Self::Primary(
                    descriptor
                        .primary_key()
                        .iter()
                        .map(|e| record.value(e.name()))
                        .collect(),
                )
            }),
            KeyKind::Alternate(name) => descriptor.alternate_key(name).map(|elements| Self::Alternate {
                name: name.to_string(),
                values: elements.iter().map(|e| record.value(e.name())).collect(),
            }),
        }
    }

    /// Returns true if any component is null.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.values().iter().any(Value::is_null)
    }

    /// Component values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Surrogate(value) => std::slice::from_ref(value),
            Self::Primary(values) | Self::Alternate { values, .. } => values,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &[Value]| {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::Surrogate(value) => write!(f, "id={value}"),
            Self::Primary(values) => write!(f, "primary key ({})", join(values)),
            Self::Alternate { name, values } => write!(f, "alternate key {name} ({})", join(values)),
        }
    }
}

/// Kind of key, without values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind<'a> {
    /// Surrogate key.
    Surrogate,
    /// Primary key.
    Primary,
    /// Named alternate key.
    Alternate(&'a str),
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Field is null.
    IsNull,
    /// Field is not null.
    NotNull,
}

/// One `(field, op, value)` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field name; resolved against the descriptor before use.
    pub field: String,
    /// Operator.
    pub op: Op,
    /// Operand; ignored by `IsNull` and `NotNull`.
    pub value: Value,
}

impl Predicate {
    /// Evaluates the predicate against a field value.
    ///
    /// Incomparable values never match an ordering operator.
    #[must_use]
    pub fn test(&self, actual: &Value) -> bool {
        match self.op {
            Op::IsNull => actual.is_null(),
            Op::NotNull => !actual.is_null(),
            Op::Eq => actual.loosely_equals(&self.value),
            Op::Ne => !actual.loosely_equals(&self.value),
            Op::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            Op::Le => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Op::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            Op::Ge => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// A conjunction of predicates.
///
/// # Example
///
/// ```rust
/// use storable_core::{Criteria, Op};
///
/// let adults = Criteria::new()
///     .and("age", Op::Ge, 18_i64)
///     .not_null("email");
/// assert_eq!(adults.predicates().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    predicates: Vec<Predicate>,
}

impl Criteria {
    /// Empty criteria; matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate.
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Adds an `IsNull` predicate.
    #[must_use]
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.and(field, Op::IsNull, Value::Null)
    }

    /// Adds a `NotNull` predicate.
    #[must_use]
    pub fn not_null(self, field: impl Into<String>) -> Self {
        self.and(field, Op::NotNull, Value::Null)
    }

    /// The predicates, in insertion order.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

/// Selection of records for cursors and counts.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Every record.
    #[default]
    All,
    /// Records equal to every non-null field of the example.
    Example(Record),
    /// Records matching every predicate.
    Criteria(Criteria),
}

impl Filter {
    /// Rewrites field names to canonical element names.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a field resolves to no element.
    pub fn canonicalize(self, descriptor: &EntityDescriptor) -> CoreResult<Self> {
        let canonical = |field: &str| -> CoreResult<String> {
            descriptor
                .element(field)
                .map(|e| e.name().to_string())
                .ok_or_else(|| {
                    CoreError::invalid_argument(format!(
                        "{} has no element named '{field}'",
                        descriptor.name()
                    ))
                })
        };
        Ok(match self {
            Self::All => Self::All,
            Self::Example(example) => Self::Example(
                example
                    .into_iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(field, value)| Ok((canonical(&field)?, value)))
                    .collect::<CoreResult<Record>>()?,
            ),
            Self::Criteria(criteria) => Self::Criteria(Criteria {
                predicates: criteria
                    .predicates
                    .into_iter()
                    .map(|p| {
                        Ok(Predicate {
                            field: canonical(&p.field)?,
                            ..p
                        })
                    })
                    .collect::<CoreResult<_>>()?,
            }),
        })
    }

    /// Tests a record. Field names must already be canonical.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Example(example) => example
                .iter()
                .all(|(field, expected)| record.value(field).loosely_equals(expected)),
            Self::Criteria(criteria) => criteria
                .predicates
                .iter()
                .all(|p| p.test(&record.value(&p.field))),
        }
    }
}

//! Query descriptors for collection reads.
//!
//! A [`QueryDescriptor`] names a remote collection and an ordered list of
//! [`Constraint`]s. Its canonical text form is structural: two descriptors
//! built from equal field/operator/value triples render identically, and
//! reordering constraints changes the rendering.

use std::fmt::{self, Write as _};

use serde_json::Value;

use crate::Timestamp;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Field value is one of a list
    In,
    /// Field value is none of a list
    NotIn,
    /// Array field contains the value
    ArrayContains,
    /// Array field contains any value of a list
    ArrayContainsAny,
}

impl FilterOperator {
    /// Operator token as the remote store spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not-in",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
        }
    }

    /// Inequality operators restrict which field the first sort key may use.
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Self::Ne | Self::Gt | Self::Lt | Self::Gte | Self::Lte | Self::NotIn
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for `OrderBy` constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Marker values that have no plain JSON representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Matches any value other than null. Used with `!=`.
    NotNull,
    /// A collaborator-specific marker, identified by name.
    Opaque(String),
}

impl Sentinel {
    pub fn name(&self) -> &str {
        match self {
            Self::NotNull => "not-null",
            Self::Opaque(name) => name,
        }
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain JSON value.
    Json(Value),
    /// Point in time, compared as unix milliseconds.
    Timestamp(Timestamp),
    /// Marker with no JSON form.
    Sentinel(Sentinel),
}

impl FieldValue {
    pub fn null() -> Self {
        Self::Json(Value::Null)
    }

    pub fn not_null() -> Self {
        Self::Sentinel(Sentinel::NotNull)
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            // serde_json maps are ordered by key, so equal values print equally.
            Self::Json(value) => {
                let _ = write!(out, "{}", value);
            }
            Self::Timestamp(ts) => {
                let _ = write!(
                    out,
                    "ts({})",
                    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                );
            }
            Self::Sentinel(sentinel) => {
                let _ = write!(
                    out,
                    "<sentinel:{}>",
                    Value::String(sentinel.name().to_string())
                );
            }
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(ts: Timestamp) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Sentinel> for FieldValue {
    fn from(sentinel: Sentinel) -> Self {
        Self::Sentinel(sentinel)
    }
}

/// A single query constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Where {
        field: String,
        op: FilterOperator,
        value: FieldValue,
    },
    OrderBy {
        field: String,
        direction: SortDirection,
    },
    Limit(usize),
}

impl Constraint {
    pub fn filter(field: impl Into<String>, op: FilterOperator, value: impl Into<FieldValue>) -> Self {
        Self::Where {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::filter(field, FilterOperator::Eq, value)
    }

    pub fn order_by(field: impl Into<String>, direction: SortDirection) -> Self {
        Self::OrderBy {
            field: field.into(),
            direction,
        }
    }

    pub fn limit(n: usize) -> Self {
        Self::Limit(n)
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Where { field, op, value } => {
                let _ = write!(out, "where({},{},", Value::String(field.clone()), op);
                value.write_canonical(out);
                out.push(')');
            }
            Self::OrderBy { field, direction } => {
                let _ = write!(
                    out,
                    "orderBy({},{})",
                    Value::String(field.clone()),
                    direction.as_str()
                );
            }
            Self::Limit(n) => {
                let _ = write!(out, "limit({})", n);
            }
        }
    }
}

/// Collection name plus an ordered constraint list.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    collection: String,
    constraints: Vec<Constraint>,
}

impl QueryDescriptor {
    /// Start a descriptor for a collection with no constraints.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraints(collection: impl Into<String>, constraints: Vec<Constraint>) -> Self {
        Self {
            collection: collection.into(),
            constraints,
        }
    }

    /// Append a constraint.
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn filter(self, field: impl Into<String>, op: FilterOperator, value: impl Into<FieldValue>) -> Self {
        self.constraint(Constraint::filter(field, op, value))
    }

    pub fn order_by(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.constraint(Constraint::order_by(field, direction))
    }

    pub fn limit(self, n: usize) -> Self {
        self.constraint(Constraint::limit(n))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Canonical text of the constraint list, in declaration order.
    pub fn canonical_constraints(&self) -> String {
        canonical_constraints(&self.constraints)
    }
}

/// Structural text rendering of a constraint list, in declaration order.
pub fn canonical_constraints(constraints: &[Constraint]) -> String {
    let mut out = String::from("[");
    for (i, constraint) in constraints.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        constraint.write_canonical(&mut out);
    }
    out.push(']');
    out
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.collection, self.canonical_constraints())
    }
}

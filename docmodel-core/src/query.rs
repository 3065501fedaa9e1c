//! Backend-neutral query constraints.
//!
//! A [`Query`] is an ordered list of [`QueryConstraint`]s. Constraints are plain data:
//! they are built per call, handed to a backend and compiled there, typically with a
//! [`ConstraintVisitor`].
//!
//! # Building queries
//!
//! ```ignore
//! use docmodel::query::{Query, WhereOp};
//!
//! let query = Query::and([
//!     Query::where_("status", WhereOp::Eq, "active"),
//!     Query::where_("age", WhereOp::Gte, 18),
//! ])
//! .add_order_by_desc("createdAt")
//! .add_limit(10);
//! ```
//!
//! # Composition
//!
//! - [`Query::and`] concatenates its inputs. The result stays flat unless an input already
//!   holds an `And`/`Or`, in which case everything is wrapped in a single `And`.
//! - [`Query::or`] always wraps its inputs in an `Or`.
//!
//! A flat top-level list means the implicit AND of all its elements. Only `Where`, `And` and
//! `Or` may appear inside a composite. The algebra does not check this;
//! [`QueryConstraint::ensure_filter`] is the check backends run when compiling.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, StoreError},
    value::Value,
};

/// Sort direction for `OrderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Comparison operators for `Where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    /// The array field contains the value.
    #[serde(rename = "array-contains")]
    ArrayContains,
    /// The array field contains any of the listed values.
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    /// The field equals one of the listed values.
    #[serde(rename = "in")]
    In,
    /// The field equals none of the listed values.
    #[serde(rename = "not-in")]
    NotIn,
}

impl WhereOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhereOp::Eq => "==",
            WhereOp::Ne => "!=",
            WhereOp::Lt => "<",
            WhereOp::Lte => "<=",
            WhereOp::Gt => ">",
            WhereOp::Gte => ">=",
            WhereOp::ArrayContains => "array-contains",
            WhereOp::ArrayContainsAny => "array-contains-any",
            WhereOp::In => "in",
            WhereOp::NotIn => "not-in",
        }
    }
}

impl fmt::Display for WhereOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhereOp {
    type Err = ModelError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        Ok(match op {
            "==" => WhereOp::Eq,
            "!=" => WhereOp::Ne,
            "<" => WhereOp::Lt,
            "<=" => WhereOp::Lte,
            ">" => WhereOp::Gt,
            ">=" => WhereOp::Gte,
            "array-contains" => WhereOp::ArrayContains,
            "array-contains-any" => WhereOp::ArrayContainsAny,
            "in" => WhereOp::In,
            "not-in" => WhereOp::NotIn,
            other => return Err(invalid_query(format!("Unknown where operator: {other}"))),
        })
    }
}

/// Which end of the result set a cursor bounds, and whether the bound is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

/// One unit of filter, order, limit, cursor or composite logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum QueryConstraint {
    Where {
        field: String,
        op: WhereOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
    Limit {
        count: usize,
    },
    LimitToLast {
        count: usize,
    },
    StartAt {
        values: Vec<Value>,
    },
    StartAfter {
        values: Vec<Value>,
    },
    EndAt {
        values: Vec<Value>,
    },
    EndBefore {
        values: Vec<Value>,
    },
    And {
        constraints: Vec<QueryConstraint>,
    },
    Or {
        constraints: Vec<QueryConstraint>,
    },
}

impl QueryConstraint {
    /// The `_tag` discriminant.
    pub fn tag(&self) -> &'static str {
        match self {
            QueryConstraint::Where { .. } => "Where",
            QueryConstraint::OrderBy { .. } => "OrderBy",
            QueryConstraint::Limit { .. } => "Limit",
            QueryConstraint::LimitToLast { .. } => "LimitToLast",
            QueryConstraint::StartAt { .. } => "StartAt",
            QueryConstraint::StartAfter { .. } => "StartAfter",
            QueryConstraint::EndAt { .. } => "EndAt",
            QueryConstraint::EndBefore { .. } => "EndBefore",
            QueryConstraint::And { .. } => "And",
            QueryConstraint::Or { .. } => "Or",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, QueryConstraint::And { .. } | QueryConstraint::Or { .. })
    }

    /// Checks that this constraint, and everything nested in it, is a filter.
    pub fn ensure_filter(&self) -> Result<(), ModelError> {
        match self {
            QueryConstraint::Where { .. } => Ok(()),
            QueryConstraint::And { constraints } | QueryConstraint::Or { constraints } => {
                constraints.iter().try_for_each(QueryConstraint::ensure_filter)
            }
            other => Err(invalid_query(format!(
                "Cannot use {} inside AND/OR composite filters",
                other.tag()
            ))),
        }
    }
}

/// The error backends report for a malformed query.
pub fn invalid_query(message: impl Into<String>) -> ModelError {
    ModelError::Store(StoreError::new("invalid-argument", "InvalidQuery", message))
}

/// An ordered list of constraints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    constraints: Vec<QueryConstraint>,
}

impl Query {
    /// The query with no constraints: every document of the collection.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_(field: impl Into<String>, op: WhereOp, value: impl Into<Value>) -> Self {
        QueryConstraint::Where {
            field: field.into(),
            op,
            value: value.into(),
        }
        .into()
    }

    /// Ascending order on `field`.
    pub fn order_by(field: impl Into<String>) -> Self {
        Self::order_by_direction(field, Direction::Asc)
    }

    pub fn order_by_desc(field: impl Into<String>) -> Self {
        Self::order_by_direction(field, Direction::Desc)
    }

    pub fn order_by_direction(field: impl Into<String>, direction: Direction) -> Self {
        QueryConstraint::OrderBy {
            field: field.into(),
            direction,
        }
        .into()
    }

    pub fn limit(count: usize) -> Self {
        QueryConstraint::Limit { count }.into()
    }

    pub fn limit_to_last(count: usize) -> Self {
        QueryConstraint::LimitToLast { count }.into()
    }

    pub fn start_at<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        QueryConstraint::StartAt {
            values: collect_values(values),
        }
        .into()
    }

    pub fn start_after<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        QueryConstraint::StartAfter {
            values: collect_values(values),
        }
        .into()
    }

    pub fn end_at<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        QueryConstraint::EndAt {
            values: collect_values(values),
        }
        .into()
    }

    pub fn end_before<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        QueryConstraint::EndBefore {
            values: collect_values(values),
        }
        .into()
    }

    /// Concatenates `queries`, wrapping in one `And` only when an input holds a composite.
    pub fn and(queries: impl IntoIterator<Item = Query>) -> Self {
        let constraints = queries
            .into_iter()
            .flat_map(Query::into_constraints)
            .collect::<Vec<_>>();

        if constraints.iter().any(QueryConstraint::is_composite) {
            QueryConstraint::And { constraints }.into()
        } else {
            Self { constraints }
        }
    }

    /// Wraps the constraints of `queries` in a single `Or`.
    pub fn or(queries: impl IntoIterator<Item = Query>) -> Self {
        QueryConstraint::Or {
            constraints: queries
                .into_iter()
                .flat_map(Query::into_constraints)
                .collect(),
        }
        .into()
    }

    /// Appends every constraint of `other`.
    pub fn add(mut self, other: Query) -> Self {
        self.constraints.extend(other.constraints);
        self
    }

    pub fn add_where(self, field: impl Into<String>, op: WhereOp, value: impl Into<Value>) -> Self {
        self.add(Query::where_(field, op, value))
    }

    pub fn add_order_by(self, field: impl Into<String>) -> Self {
        self.add(Query::order_by(field))
    }

    pub fn add_order_by_desc(self, field: impl Into<String>) -> Self {
        self.add(Query::order_by_desc(field))
    }

    pub fn add_limit(self, count: usize) -> Self {
        self.add(Query::limit(count))
    }

    pub fn add_limit_to_last(self, count: usize) -> Self {
        self.add(Query::limit_to_last(count))
    }

    pub fn add_start_at<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.add(Query::start_at(values))
    }

    pub fn add_start_after<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.add(Query::start_after(values))
    }

    pub fn add_end_at<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.add(Query::end_at(values))
    }

    pub fn add_end_before<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.add(Query::end_before(values))
    }

    pub fn constraints(&self) -> &[QueryConstraint] {
        &self.constraints
    }

    pub fn into_constraints(self) -> Vec<QueryConstraint> {
        self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }
}

fn collect_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Vec<Value> {
    values.into_iter().map(Into::into).collect()
}

impl From<QueryConstraint> for Query {
    fn from(constraint: QueryConstraint) -> Self {
        Self {
            constraints: vec![constraint],
        }
    }
}

impl From<Vec<QueryConstraint>> for Query {
    fn from(constraints: Vec<QueryConstraint>) -> Self {
        Self { constraints }
    }
}

impl FromIterator<QueryConstraint> for Query {
    fn from_iter<I: IntoIterator<Item = QueryConstraint>>(iter: I) -> Self {
        Self {
            constraints: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Query {
    type Item = QueryConstraint;
    type IntoIter = std::vec::IntoIter<QueryConstraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.into_iter()
    }
}

/// Splits a flat constraint list into its top-level composite filters and everything else.
///
/// Backends apply the composites first and then the remaining constraints in order.
pub fn partition_composites(
    constraints: &[QueryConstraint],
) -> (Vec<&QueryConstraint>, Vec<&QueryConstraint>) {
    constraints.iter().partition(|constraint| constraint.is_composite())
}

/// Visitor used by backends to compile constraints into their native query form.
pub trait ConstraintVisitor {
    type Output;
    type Error: Into<ModelError>;

    fn visit_where(
        &mut self,
        field: &str,
        op: WhereOp,
        value: &Value,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_order_by(
        &mut self,
        field: &str,
        direction: Direction,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_limit(&mut self, count: usize) -> Result<Self::Output, Self::Error>;
    fn visit_limit_to_last(&mut self, count: usize) -> Result<Self::Output, Self::Error>;
    fn visit_cursor(
        &mut self,
        kind: CursorKind,
        values: &[Value],
    ) -> Result<Self::Output, Self::Error>;
    fn visit_and(&mut self, constraints: &[QueryConstraint]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, constraints: &[QueryConstraint]) -> Result<Self::Output, Self::Error>;

    fn visit_constraint(
        &mut self,
        constraint: &QueryConstraint,
    ) -> Result<Self::Output, Self::Error> {
        match constraint {
            QueryConstraint::Where { field, op, value } => self.visit_where(field, *op, value),
            QueryConstraint::OrderBy { field, direction } => self.visit_order_by(field, *direction),
            QueryConstraint::Limit { count } => self.visit_limit(*count),
            QueryConstraint::LimitToLast { count } => self.visit_limit_to_last(*count),
            QueryConstraint::StartAt { values } => self.visit_cursor(CursorKind::StartAt, values),
            QueryConstraint::StartAfter { values } => {
                self.visit_cursor(CursorKind::StartAfter, values)
            }
            QueryConstraint::EndAt { values } => self.visit_cursor(CursorKind::EndAt, values),
            QueryConstraint::EndBefore { values } => self.visit_cursor(CursorKind::EndBefore, values),
            QueryConstraint::And { constraints } => self.visit_and(constraints),
            QueryConstraint::Or { constraints } => self.visit_or(constraints),
        }
    }
}

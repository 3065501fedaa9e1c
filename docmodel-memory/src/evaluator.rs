//! Query compilation and evaluation for in-memory documents.
//!
//! Constraints are compiled once into a [`QueryPlan`] and then run against any number of
//! document sets, which is what live query listeners need. Stored documents and filter
//! operands are both converted back to their neutral form before they are compared.

use std::cmp::Ordering;

use docmodel_core::{
    converter::NativeConverter,
    error::{ModelError, ModelResult},
    geo_point::GeoPoint,
    query::{
        ConstraintVisitor, CursorKind, Direction, QueryConstraint, WhereOp, invalid_query,
        partition_composites,
    },
    reference::Reference,
    snapshot::{Snapshot, from_native, from_native_fields},
    timestamp::Timestamp,
    value::{Fields, Value},
};

/// Totally ordered view of a neutral value.
///
/// Values of different kinds order by kind: null, booleans, numbers, timestamps, strings,
/// bytes, references, geo points, arrays, maps. Integers and doubles are both numbers, and
/// NaN sorts before every other number.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Timestamp(Timestamp),
    String(&'a str),
    Bytes(&'a [u8]),
    Reference(&'a str),
    GeoPoint(GeoPoint),
    Array(Vec<Comparable<'a>>),
    /// Entries sorted by key.
    Map(Vec<(&'a str, Comparable<'a>)>),
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Comparable::Null,
            Value::Boolean(value) => Comparable::Bool(*value),
            Value::Integer(value) => Comparable::Number(*value as f64),
            Value::Double(value) => Comparable::Number(*value),
            Value::String(value) => Comparable::String(value),
            Value::Bytes(value) => Comparable::Bytes(value),
            Value::Timestamp(value) => Comparable::Timestamp(*value),
            Value::GeoPoint(value) => Comparable::GeoPoint(*value),
            Value::Reference(value) => Comparable::Reference(value.path()),
            Value::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Value::Map(fields) => {
                let mut entries = fields
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect::<Vec<_>>();
                entries.sort_by(|left, right| left.0.cmp(right.0));
                Comparable::Map(entries)
            }
            // Unrecognized natives and unstamped markers have no meaningful order.
            Value::ServerTimestamp | Value::Native(_) => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Number(_) => 2,
            Comparable::Timestamp(_) => 3,
            Comparable::String(_) => 4,
            Comparable::Bytes(_) => 5,
            Comparable::Reference(_) => 6,
            Comparable::GeoPoint(_) => 7,
            Comparable::Array(_) => 8,
            Comparable::Map(_) => 9,
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Comparable::Null)
    }

    /// Orders any two values, across kinds included.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => compare_numbers(*a, *b),
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => a.cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a.cmp(b),
            (Comparable::Reference(a), Comparable::Reference(b)) => a.cmp(b),
            (Comparable::GeoPoint(a), Comparable::GeoPoint(b)) => {
                compare_numbers(a.latitude, b.latitude)
                    .then_with(|| compare_numbers(a.longitude, b.longitude))
            }
            (Comparable::Array(a), Comparable::Array(b)) => {
                for (left, right) in a.iter().zip(b) {
                    let ordering = left.total_cmp(right);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Comparable::Map(a), Comparable::Map(b)) => {
                for ((left_key, left), (right_key, right)) in a.iter().zip(b) {
                    let ordering = left_key.cmp(right_key).then_with(|| left.total_cmp(right));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b)
        .unwrap_or_else(|| b.is_nan().cmp(&a.is_nan()))
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Comparable<'_> {
    /// Range comparisons only hold between non-null values of the same kind.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() || self.rank() != other.rank() {
            return None;
        }
        Some(self.total_cmp(other))
    }
}

/// Reads a possibly dotted field path out of a document.
pub(crate) fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

/// Decides whether one neutral document passes a filter constraint.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Fields,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Fields) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, constraint: &QueryConstraint) -> ModelResult<bool> {
        self.visit_constraint(constraint)
    }
}

fn not_a_filter(tag: &str) -> ModelError {
    invalid_query(format!("Cannot use {tag} inside AND/OR composite filters"))
}

impl ConstraintVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = ModelError;

    fn visit_where(&mut self, field: &str, op: WhereOp, value: &Value) -> ModelResult<bool> {
        let actual = match lookup(self.document, field) {
            Some(actual) => Comparable::from(actual),
            None => return Ok(false),
        };
        let expected = Comparable::from(value);

        Ok(match op {
            WhereOp::Eq => actual == expected,
            WhereOp::Ne => actual != expected,
            WhereOp::Lt => actual.partial_cmp(&expected) == Some(Ordering::Less),
            WhereOp::Lte => matches!(
                actual.partial_cmp(&expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            WhereOp::Gt => actual.partial_cmp(&expected) == Some(Ordering::Greater),
            WhereOp::Gte => matches!(
                actual.partial_cmp(&expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            WhereOp::ArrayContains => match &actual {
                Comparable::Array(items) => items.contains(&expected),
                _ => false,
            },
            WhereOp::ArrayContainsAny => match (&actual, &expected) {
                (Comparable::Array(items), Comparable::Array(candidates)) => {
                    items.iter().any(|item| candidates.contains(item))
                }
                _ => false,
            },
            WhereOp::In => match &expected {
                Comparable::Array(candidates) => candidates.contains(&actual),
                _ => false,
            },
            WhereOp::NotIn => match &expected {
                Comparable::Array(candidates) => !actual.is_null() && !candidates.contains(&actual),
                _ => false,
            },
        })
    }

    fn visit_order_by(&mut self, _field: &str, _direction: Direction) -> ModelResult<bool> {
        Err(not_a_filter("OrderBy"))
    }

    fn visit_limit(&mut self, _count: usize) -> ModelResult<bool> {
        Err(not_a_filter("Limit"))
    }

    fn visit_limit_to_last(&mut self, _count: usize) -> ModelResult<bool> {
        Err(not_a_filter("LimitToLast"))
    }

    fn visit_cursor(&mut self, kind: CursorKind, _values: &[Value]) -> ModelResult<bool> {
        Err(not_a_filter(cursor_tag(kind)))
    }

    fn visit_and(&mut self, constraints: &[QueryConstraint]) -> ModelResult<bool> {
        for constraint in constraints {
            if !self.visit_constraint(constraint)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, constraints: &[QueryConstraint]) -> ModelResult<bool> {
        for constraint in constraints {
            if self.visit_constraint(constraint)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

fn cursor_tag(kind: CursorKind) -> &'static str {
    match kind {
        CursorKind::StartAt => "StartAt",
        CursorKind::StartAfter => "StartAfter",
        CursorKind::EndAt => "EndAt",
        CursorKind::EndBefore => "EndBefore",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Limit {
    First(usize),
    Last(usize),
}

#[derive(Debug, Clone)]
struct Cursor {
    kind: CursorKind,
    values: Vec<Value>,
}

/// A compiled query: neutral filters, sort keys, cursors and a limit.
///
/// When a constraint kind appears more than once, filters accumulate, sort keys append in
/// order, and the last cursor per end and the last limit win.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    filters: Vec<QueryConstraint>,
    order_by: Vec<(String, Direction)>,
    limit: Option<Limit>,
    start: Option<Cursor>,
    end: Option<Cursor>,
}

struct QueryPlanner<'c> {
    plan: QueryPlan,
    converter: &'c dyn NativeConverter,
}

impl QueryPlan {
    /// Compiles `constraints`, composites first.
    ///
    /// # Errors
    ///
    /// Fails with `invalid-argument` when a composite holds a non-filter constraint, a
    /// list operator gets a non-list operand, `limitToLast` has no sort key, or a cursor
    /// has more values than there are sort keys.
    pub fn compile(
        constraints: &[QueryConstraint],
        converter: &dyn NativeConverter,
    ) -> ModelResult<QueryPlan> {
        let mut planner = QueryPlanner {
            plan: QueryPlan::default(),
            converter,
        };

        let (composites, others) = partition_composites(constraints);
        for constraint in composites.into_iter().chain(others) {
            planner.visit_constraint(constraint)?;
        }

        let plan = planner.plan;
        if matches!(plan.limit, Some(Limit::Last(_))) && plan.order_by.is_empty() {
            return Err(invalid_query(
                "limitToLast() queries require specifying at least one orderBy() clause",
            ));
        }
        for cursor in plan.start.iter().chain(&plan.end) {
            // The document id is the implicit last sort key.
            if cursor.values.len() > plan.order_by.len() + 1 {
                return Err(invalid_query(format!(
                    "Too many arguments provided to {}(): {} values for {} orderBy() clauses",
                    cursor_method(cursor.kind),
                    cursor.values.len(),
                    plan.order_by.len()
                )));
            }
        }

        Ok(plan)
    }

    /// Runs the plan over `documents`, given as `(path, stored data)` pairs.
    pub fn execute<'a>(
        &self,
        documents: impl IntoIterator<Item = (&'a String, &'a Fields)>,
        converter: &dyn NativeConverter,
    ) -> ModelResult<Vec<Snapshot>> {
        let mut rows = Vec::new();
        for (path, stored) in documents {
            let neutral = from_native_fields(stored, converter);
            if !self.matches(&neutral)? {
                continue;
            }
            // Documents missing a sort field are not part of the ordered result.
            if let Some(keys) = self.sort_keys(path, &neutral) {
                rows.push((path, stored, keys));
            }
        }

        rows.sort_by(|left, right| self.compare_keys(&left.2, &right.2));
        rows.retain(|(_, _, keys)| self.within_cursors(keys));

        let rows: Vec<_> = match self.limit {
            Some(Limit::First(count)) => rows.into_iter().take(count).collect(),
            Some(Limit::Last(count)) => {
                let skip = rows.len().saturating_sub(count);
                rows.into_iter().skip(skip).collect()
            }
            None => rows,
        };

        rows.into_iter()
            .map(|(path, stored, _)| -> ModelResult<Snapshot> {
                Ok(Snapshot::new(Reference::from_path(path)?, stored.clone()))
            })
            .collect()
    }

    /// Whether a neutral document passes every filter.
    pub fn matches(&self, document: &Fields) -> ModelResult<bool> {
        let mut evaluator = DocumentEvaluator::new(document);
        for filter in &self.filters {
            if !evaluator.evaluate(filter)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn sort_keys(&self, path: &str, document: &Fields) -> Option<Vec<Value>> {
        let mut keys = self
            .order_by
            .iter()
            .map(|(field, _)| lookup(document, field).cloned())
            .collect::<Option<Vec<_>>>()?;
        let id = path.rsplit('/').next().unwrap_or(path);
        keys.push(Value::String(id.to_string()));
        Some(keys)
    }

    fn direction(&self, index: usize) -> Direction {
        self.order_by
            .get(index)
            .map(|(_, direction)| *direction)
            .unwrap_or_default()
    }

    /// Compares two key lists over the length of the shorter one.
    fn compare_keys(&self, left: &[Value], right: &[Value]) -> Ordering {
        for (index, (left, right)) in left.iter().zip(right).enumerate() {
            let ordering = Comparable::from(left).total_cmp(&Comparable::from(right));
            let ordering = match self.direction(index) {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }

    fn within_cursors(&self, keys: &[Value]) -> bool {
        let after_start = self.start.as_ref().is_none_or(|cursor| {
            let ordering = self.compare_keys(keys, &cursor.values);
            match cursor.kind {
                CursorKind::StartAfter => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        });
        let before_end = self.end.as_ref().is_none_or(|cursor| {
            let ordering = self.compare_keys(keys, &cursor.values);
            match cursor.kind {
                CursorKind::EndBefore => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        });

        after_start && before_end
    }
}

fn cursor_method(kind: CursorKind) -> &'static str {
    match kind {
        CursorKind::StartAt => "startAt",
        CursorKind::StartAfter => "startAfter",
        CursorKind::EndAt => "endAt",
        CursorKind::EndBefore => "endBefore",
    }
}

impl QueryPlanner<'_> {
    /// Checks and neutralizes a filter, recursing into composites.
    fn filter(&self, constraint: &QueryConstraint) -> ModelResult<QueryConstraint> {
        match constraint {
            QueryConstraint::Where { field, op, value } => self.where_(field, *op, value),
            QueryConstraint::And { constraints } => Ok(QueryConstraint::And {
                constraints: self.filters(constraints)?,
            }),
            QueryConstraint::Or { constraints } => Ok(QueryConstraint::Or {
                constraints: self.filters(constraints)?,
            }),
            other => Err(not_a_filter(other.tag())),
        }
    }

    fn filters(&self, constraints: &[QueryConstraint]) -> ModelResult<Vec<QueryConstraint>> {
        constraints.iter().try_for_each(QueryConstraint::ensure_filter)?;
        constraints.iter().map(|constraint| self.filter(constraint)).collect()
    }

    fn where_(&self, field: &str, op: WhereOp, value: &Value) -> ModelResult<QueryConstraint> {
        let value = from_native(value, self.converter);
        if matches!(op, WhereOp::In | WhereOp::NotIn | WhereOp::ArrayContainsAny)
            && value.as_array().is_none()
        {
            return Err(invalid_query(format!(
                "Invalid Query. A non-empty array is required for '{op}' filters"
            )));
        }

        Ok(QueryConstraint::Where {
            field: field.to_string(),
            op,
            value,
        })
    }
}

impl ConstraintVisitor for QueryPlanner<'_> {
    type Output = ();
    type Error = ModelError;

    fn visit_where(&mut self, field: &str, op: WhereOp, value: &Value) -> ModelResult<()> {
        let filter = self.where_(field, op, value)?;
        self.plan.filters.push(filter);
        Ok(())
    }

    fn visit_order_by(&mut self, field: &str, direction: Direction) -> ModelResult<()> {
        self.plan.order_by.push((field.to_string(), direction));
        Ok(())
    }

    fn visit_limit(&mut self, count: usize) -> ModelResult<()> {
        self.plan.limit = Some(Limit::First(count));
        Ok(())
    }

    fn visit_limit_to_last(&mut self, count: usize) -> ModelResult<()> {
        self.plan.limit = Some(Limit::Last(count));
        Ok(())
    }

    fn visit_cursor(&mut self, kind: CursorKind, values: &[Value]) -> ModelResult<()> {
        let cursor = Cursor {
            kind,
            values: values
                .iter()
                .map(|value| from_native(value, self.converter))
                .collect(),
        };
        match kind {
            CursorKind::StartAt | CursorKind::StartAfter => self.plan.start = Some(cursor),
            CursorKind::EndAt | CursorKind::EndBefore => self.plan.end = Some(cursor),
        }
        Ok(())
    }

    fn visit_and(&mut self, constraints: &[QueryConstraint]) -> ModelResult<()> {
        let constraints = self.filters(constraints)?;
        self.plan.filters.push(QueryConstraint::And { constraints });
        Ok(())
    }

    fn visit_or(&mut self, constraints: &[QueryConstraint]) -> ModelResult<()> {
        let constraints = self.filters(constraints)?;
        self.plan.filters.push(QueryConstraint::Or { constraints });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use docmodel_core::{converter::Neutral, fields, query::Query};

    use super::*;

    fn posts() -> BTreeMap<String, Fields> {
        BTreeMap::from([
            (
                "posts/a".to_string(),
                fields! { "title" => "Alpha", "views" => 10, "tags" => vec!["rust"], "status" => "published" },
            ),
            (
                "posts/b".to_string(),
                fields! { "title" => "Beta", "views" => 30, "tags" => vec!["go", "rust"], "status" => "draft" },
            ),
            (
                "posts/c".to_string(),
                fields! { "title" => "Gamma", "views" => 20.0, "tags" => Vec::<Value>::new(), "status" => "published" },
            ),
            (
                "posts/d".to_string(),
                fields! { "title" => "Delta", "status" => "archived", "meta" => fields! { "pinned" => true } },
            ),
        ])
    }

    fn run(query: Query) -> ModelResult<Vec<String>> {
        let documents = posts();
        let plan = QueryPlan::compile(query.constraints(), &Neutral)?;
        Ok(plan
            .execute(&documents, &Neutral)?
            .into_iter()
            .map(|snapshot| snapshot.id().to_string())
            .collect())
    }

    #[test]
    fn comparable_orders_across_kinds() {
        let null = Value::Null;
        let number = Value::Integer(3);
        let string = Value::from("3");
        assert_eq!(
            Comparable::from(&null).total_cmp(&Comparable::from(&number)),
            Ordering::Less
        );
        assert_eq!(
            Comparable::from(&number).total_cmp(&Comparable::from(&string)),
            Ordering::Less
        );
        assert_eq!(
            Comparable::from(&Value::Integer(2)),
            Comparable::from(&Value::Double(2.0))
        );
        assert_eq!(
            Comparable::from(&number).partial_cmp(&Comparable::from(&string)),
            None
        );
    }

    #[test]
    fn filters_and_orders() {
        let ids = run(Query::where_("status", WhereOp::Eq, "published").add_order_by_desc("views")).unwrap();
        assert_eq!(ids, vec!["c", "a"]);

        let ids = run(Query::where_("views", WhereOp::Gte, 20)).unwrap();
        assert_eq!(ids, vec!["b", "c"]);

        let ids = run(Query::where_("tags", WhereOp::ArrayContains, "rust")).unwrap();
        assert_eq!(ids, vec!["a", "b"]);

        let ids = run(Query::where_("meta.pinned", WhereOp::Eq, true)).unwrap();
        assert_eq!(ids, vec!["d"]);
    }

    #[test]
    fn list_operators() {
        let ids = run(Query::where_("status", WhereOp::In, vec!["draft", "archived"])).unwrap();
        assert_eq!(ids, vec!["b", "d"]);

        let ids = run(Query::where_("status", WhereOp::NotIn, vec!["draft", "archived"])).unwrap();
        assert_eq!(ids, vec!["a", "c"]);

        let ids = run(Query::where_("tags", WhereOp::ArrayContainsAny, vec!["go", "zig"])).unwrap();
        assert_eq!(ids, vec!["b"]);

        let err = run(Query::where_("status", WhereOp::In, "draft")).unwrap_err();
        assert_eq!(err.store_code(), Some("invalid-argument"));
    }

    #[test]
    fn composites_combine_with_flat_filters() {
        let query = Query::and([
            Query::or([
                Query::where_("status", WhereOp::Eq, "draft"),
                Query::where_("views", WhereOp::Lt, 15),
            ]),
            Query::where_("title", WhereOp::Ne, "Beta"),
        ]);
        assert_eq!(run(query).unwrap(), vec!["a"]);
    }

    #[test]
    fn rejects_non_filters_inside_composites() {
        let query = Query::or([Query::where_("status", WhereOp::Eq, "draft"), Query::limit(1)]);
        let err = run(query).unwrap_err();
        assert_eq!(err.store_code(), Some("invalid-argument"));
        assert!(err.to_string().contains("Cannot use Limit inside AND/OR composite filters"));
    }

    #[test]
    fn cursors_bound_the_ordered_result() {
        let by_views = || Query::order_by("views");
        assert_eq!(run(by_views()).unwrap(), vec!["a", "c", "b"]);
        assert_eq!(run(by_views().add_start_at([20])).unwrap(), vec!["c", "b"]);
        assert_eq!(run(by_views().add_start_after([20])).unwrap(), vec!["b"]);
        assert_eq!(run(by_views().add_end_at([20])).unwrap(), vec!["a", "c"]);
        assert_eq!(run(by_views().add_end_before([20])).unwrap(), vec!["a"]);

        let err = run(by_views().add_start_at([Value::from(1), "a".into(), "b".into()])).unwrap_err();
        assert_eq!(err.store_code(), Some("invalid-argument"));
    }

    #[test]
    fn limits_take_from_either_end() {
        assert_eq!(run(Query::order_by("views").add_limit(2)).unwrap(), vec!["a", "c"]);
        assert_eq!(run(Query::order_by("views").add_limit_to_last(2)).unwrap(), vec!["c", "b"]);

        let err = run(Query::limit_to_last(2)).unwrap_err();
        assert_eq!(err.store_code(), Some("invalid-argument"));
    }

    #[test]
    fn unordered_results_follow_document_path() {
        assert_eq!(run(Query::new()).unwrap(), vec!["a", "b", "c", "d"]);
    }
}

//! Abstract queries, local evaluation and translation into requests.

use crate::client::ResourceClient;
use crate::context::Context;
use crate::error::{FaultError, FaultResult};
use crate::request::Request;
use faultline_codec::Value;
use faultline_store::{Model, ObjectId, ObjectRecord};
use std::cmp::Ordering;
use std::sync::Arc;

/// A filter over attribute values.
///
/// Attributes absent from a record compare as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Matches every object.
    All,
    /// Attribute equals value.
    Eq(String, Value),
    /// Attribute differs from value.
    Ne(String, Value),
    /// Attribute is less than value.
    Lt(String, Value),
    /// Attribute is less than or equal to value.
    Le(String, Value),
    /// Attribute is greater than value.
    Gt(String, Value),
    /// Attribute is greater than or equal to value.
    Ge(String, Value),
    /// Attribute equals one of the values.
    In(String, Vec<Value>),
    /// Attribute is absent or null.
    IsNull(String),
    /// Text attribute contains a substring, or array attribute contains an element.
    Contains(String, Value),
    /// Every predicate matches.
    And(Vec<Predicate>),
    /// At least one predicate matches.
    Or(Vec<Predicate>),
    /// The predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Shorthand for [`Predicate::Eq`].
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(attribute.into(), value.into())
    }

    /// Evaluates the predicate against a record.
    pub fn evaluate(&self, record: &ObjectRecord) -> bool {
        let field = |name: &str| record.attribute(name).unwrap_or(&NULL);
        let ordered = |name: &str, value: &Value, accept: fn(Ordering) -> bool| {
            let current = field(name);
            same_kind(current, value) && accept(compare_values(current, value))
        };
        match self {
            Predicate::All => true,
            Predicate::Eq(name, value) => field(name) == value,
            Predicate::Ne(name, value) => field(name) != value,
            Predicate::Lt(name, value) => ordered(name, value, Ordering::is_lt),
            Predicate::Le(name, value) => ordered(name, value, Ordering::is_le),
            Predicate::Gt(name, value) => ordered(name, value, Ordering::is_gt),
            Predicate::Ge(name, value) => ordered(name, value, Ordering::is_ge),
            Predicate::In(name, values) => values.contains(field(name)),
            Predicate::IsNull(name) => field(name).is_null(),
            Predicate::Contains(name, needle) => match (field(name), needle) {
                (Value::Text(haystack), Value::Text(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            Predicate::And(all) => all.iter().all(|p| p.evaluate(record)),
            Predicate::Or(any) => any.iter().any(|p| p.evaluate(record)),
            Predicate::Not(inner) => !inner.evaluate(record),
        }
    }

    /// Top-level equality constraints, in order.
    ///
    /// Looks through `And` but not through `Or` or `Not`. A client that
    /// sends only these must report so through
    /// [`ResourceClient::sends_predicate`](crate::ResourceClient::sends_predicate)
    /// so the store filters the response by the rest.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Predicate::Eq(name, value) => vec![(name.as_str(), value)],
            Predicate::And(all) => all.iter().flat_map(Predicate::equalities).collect(),
            _ => Vec::new(),
        }
    }

    fn attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::All => {}
            Predicate::Eq(name, _)
            | Predicate::Ne(name, _)
            | Predicate::Lt(name, _)
            | Predicate::Le(name, _)
            | Predicate::Gt(name, _)
            | Predicate::Ge(name, _)
            | Predicate::In(name, _)
            | Predicate::IsNull(name)
            | Predicate::Contains(name, _) => out.push(name),
            Predicate::And(list) | Predicate::Or(list) => {
                for p in list {
                    p.attributes(out);
                }
            }
            Predicate::Not(inner) => inner.attributes(out),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortDescriptor {
    /// Attribute name.
    pub attribute: String,
    /// Direction.
    pub direction: SortDirection,
}

impl SortDescriptor {
    /// Ascending order on an attribute.
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending order on an attribute.
    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A query over one entity.
///
/// Queries are values: two equal queries share one fault, so concurrent
/// executions of the same query dispatch a single request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    /// Entity name.
    pub entity: String,
    /// Filter.
    pub predicate: Predicate,
    /// Sort keys, most significant first.
    pub sort: Vec<SortDescriptor>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of leading results to skip.
    pub offset: Option<usize>,
}

impl Query {
    /// Creates a query matching every object of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::All,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Adds a sort key.
    #[must_use]
    pub fn sorted_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Checks that the entity and every referenced attribute exist.
    pub fn validate(&self, model: &Model) -> FaultResult<()> {
        let entity = model
            .entity(&self.entity)
            .ok_or_else(|| FaultError::UnknownEntity(self.entity.clone()))?;
        let mut names = Vec::new();
        self.predicate.attributes(&mut names);
        names.extend(self.sort.iter().map(|s| s.attribute.as_str()));
        for name in names {
            if entity.attribute(name).is_none() {
                return Err(FaultError::configuration(format!(
                    "query on {} references unknown attribute {name}",
                    self.entity
                )));
            }
        }
        Ok(())
    }

    /// Evaluates the query against local rows.
    ///
    /// Rows of other entities are ignored. Sorting is stable, so rows with
    /// equal keys keep their input order.
    pub fn apply(&self, rows: Vec<(ObjectId, ObjectRecord)>) -> Vec<(ObjectId, ObjectRecord)> {
        let mut matched: Vec<_> = rows
            .into_iter()
            .filter(|(_, r)| r.entity == self.entity && self.predicate.evaluate(r))
            .collect();
        if !self.sort.is_empty() {
            matched.sort_by(|(_, a), (_, b)| self.compare(a, b));
        }
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).collect()
    }

    /// Filters rows that arrived in server order and pages them, without
    /// sorting.
    pub fn refine(&self, rows: Vec<(ObjectId, ObjectRecord)>) -> Vec<ObjectId> {
        rows.into_iter()
            .filter(|(_, r)| r.entity == self.entity && self.predicate.evaluate(r))
            .map(|(id, _)| id)
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn compare(&self, a: &ObjectRecord, b: &ObjectRecord) -> Ordering {
        for key in &self.sort {
            let left = a.attribute(&key.attribute).unwrap_or(&NULL);
            let right = b.attribute(&key.attribute).unwrap_or(&NULL);
            let ord = match key.direction {
                SortDirection::Ascending => compare_values(left, right),
                SortDirection::Descending => compare_values(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

static NULL: Value = Value::Null;

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Integer(_) => 2,
        Value::Text(_) => 3,
        Value::Bytes(_) => 4,
        Value::Array(_) => 5,
        Value::Map(_) => 6,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    rank(a) == rank(b)
}

/// Total order over values used for sorting.
///
/// Kinds order as null, bool, integer, text, bytes, array, map; values of
/// one kind compare naturally.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(_), Value::Map(_)) => a.cmp_canonical(b),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Turns abstract queries into requests through the resource client.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    model: Arc<Model>,
}

impl QueryTranslator {
    /// Creates a translator for a model.
    pub fn new(model: Arc<Model>) -> Self {
        Self { model }
    }

    /// Validates the query and delegates to [`ResourceClient::query_request`].
    pub fn translate<C: ResourceClient + ?Sized>(
        &self,
        client: &C,
        query: &Query,
        context: &Context,
    ) -> FaultResult<Request> {
        query.validate(&self.model)?;
        client.query_request(query, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MappingResult;
    use crate::request::ResponseMeta;
    use faultline_store::{AttributeType, EntitySchema};
    use std::collections::BTreeMap;

    fn post(rid: &str, title: &str, score: i64) -> (ObjectId, ObjectRecord) {
        let mut record = ObjectRecord::shell("Post", rid);
        record.set_attribute("title", Value::from(title));
        record.set_attribute("score", Value::Integer(score));
        (ObjectId::new(), record)
    }

    fn rows() -> Vec<(ObjectId, ObjectRecord)> {
        vec![
            post("1", "Rust ownership", 5),
            post("2", "Async traits", 9),
            post("3", "Rust lifetimes", 2),
            (ObjectId::new(), ObjectRecord::shell("Comment", "1")),
        ]
    }

    fn titles(rows: &[(ObjectId, ObjectRecord)]) -> Vec<&str> {
        rows.iter()
            .filter_map(|(_, r)| r.attribute("title").and_then(Value::as_text))
            .collect()
    }

    #[test]
    fn filter_sort_and_page() {
        let query = Query::new("Post")
            .with_predicate(Predicate::Contains("title".into(), Value::from("Rust")))
            .sorted_by(SortDescriptor::descending("score"));
        assert_eq!(titles(&query.apply(rows())), vec!["Rust ownership", "Rust lifetimes"]);

        let page = Query::new("Post")
            .sorted_by(SortDescriptor::ascending("score"))
            .with_offset(1)
            .with_limit(1);
        assert_eq!(titles(&page.apply(rows())), vec!["Rust ownership"]);
    }

    #[test]
    fn refine_keeps_response_order() {
        let rows = rows();
        let ids: Vec<ObjectId> = rows.iter().map(|(id, _)| *id).collect();
        let query = Query::new("Post")
            .with_predicate(Predicate::Lt("score".into(), Value::Integer(9)))
            .sorted_by(SortDescriptor::ascending("score"));
        assert_eq!(query.refine(rows.clone()), vec![ids[0], ids[2]]);
        assert_eq!(query.with_offset(1).refine(rows), vec![ids[2]]);
    }

    #[test]
    fn comparisons_require_matching_kinds() {
        let (_, record) = post("1", "a", 5);
        assert!(Predicate::Gt("score".into(), Value::Integer(4)).evaluate(&record));
        assert!(!Predicate::Gt("score".into(), Value::from("4")).evaluate(&record));
        assert!(Predicate::IsNull("missing".into()).evaluate(&record));
        assert!(Predicate::Not(Box::new(Predicate::eq("title", "b"))).evaluate(&record));
        assert!(Predicate::In("score".into(), vec![Value::from(1), Value::from(5)]).evaluate(&record));
    }

    #[test]
    fn equalities_look_through_and() {
        let predicate = Predicate::And(vec![
            Predicate::eq("author", "7"),
            Predicate::Gt("score".into(), Value::from(1)),
            Predicate::eq("draft", false),
        ]);
        let eqs: Vec<&str> = predicate.equalities().into_iter().map(|(n, _)| n).collect();
        assert_eq!(eqs, vec!["author", "draft"]);
        assert!(Predicate::Or(vec![Predicate::eq("a", 1)]).equalities().is_empty());
    }

    #[test]
    fn value_ordering_across_kinds() {
        assert_eq!(compare_values(&Value::Null, &Value::from(false)), Ordering::Less);
        assert_eq!(compare_values(&Value::from(3), &Value::from("a")), Ordering::Less);
        assert_eq!(
            compare_values(
                &Value::Array(vec![Value::from(1)]),
                &Value::Array(vec![Value::from(1), Value::from(0)])
            ),
            Ordering::Less
        );
    }

    struct NoQueries;

    impl ResourceClient for NoQueries {
        fn resource_identifier(&self, _: &Value, _: &EntitySchema, _: &ResponseMeta) -> Option<String> {
            None
        }

        fn attributes(
            &self,
            _: &Value,
            _: &EntitySchema,
            _: &ResponseMeta,
        ) -> MappingResult<BTreeMap<String, Value>> {
            Ok(BTreeMap::new())
        }
    }

    #[test]
    fn translator_validates_before_delegating() {
        let model = Model::new().with_entity(
            EntitySchema::new("Post").with_attribute("title", AttributeType::Text),
        );
        let translator = QueryTranslator::new(Arc::new(model));
        let ctx = Context::new();

        let err = translator
            .translate(&NoQueries, &Query::new("Video"), &ctx)
            .unwrap_err();
        assert_eq!(err, FaultError::UnknownEntity("Video".into()));

        let bad = Query::new("Post").sorted_by(SortDescriptor::ascending("rating"));
        assert!(matches!(
            translator.translate(&NoQueries, &bad, &ctx),
            Err(FaultError::Configuration(_))
        ));

        let err = translator
            .translate(&NoQueries, &Query::new("Post"), &ctx)
            .unwrap_err();
        assert_eq!(err, FaultError::Unimplemented { method: "query_request" });
    }
}

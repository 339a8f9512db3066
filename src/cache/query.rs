//! Query documents, identities and argument sets.
//!
//! A query document is the JSON form of a GraphQL abstract syntax tree. Only
//! what identity extraction needs is modelled: the `definitions` sequence and,
//! for operation definitions, the operation kind and optional name.

use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// 2^64, the first float past the `u64` range.
const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

/// Name of a query operation, used as the bypass lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryIdentity(String);

impl QueryIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for QueryIdentity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for QueryIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// `Name` node of the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Name {
    pub value: String,
}

/// Operation type of an operation definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationDefinition {
    #[serde(default)]
    pub operation: OperationKind,
    #[serde(default)]
    pub name: Option<Name>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FragmentDefinition {
    pub name: Name,
}

/// A top-level definition, discriminated by its `kind` tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind")]
pub enum Definition {
    OperationDefinition(OperationDefinition),
    FragmentDefinition(FragmentDefinition),
    /// Any other definition kind (schema definitions, extensions, ...).
    #[serde(other)]
    Other,
}

impl Definition {
    /// Build an operation definition, named when `name` is given.
    pub fn operation(operation: OperationKind, name: Option<&str>) -> Self {
        Self::OperationDefinition(OperationDefinition {
            operation,
            name: name.map(|value| Name {
                value: value.to_string(),
            }),
        })
    }

    pub fn fragment(name: &str) -> Self {
        Self::FragmentDefinition(FragmentDefinition {
            name: Name {
                value: name.to_string(),
            },
        })
    }
}

/// Parsed query document.
///
/// The identity is extracted at most once per document instance; the
/// definitions are immutable after construction so the memoized value never
/// goes stale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryDocument {
    #[serde(default)]
    definitions: Vec<Definition>,
    #[serde(skip)]
    identity: OnceLock<Option<QueryIdentity>>,
}

impl QueryDocument {
    pub fn new(definitions: Vec<Definition>) -> Self {
        Self {
            definitions,
            identity: OnceLock::new(),
        }
    }

    /// Document holding a single named `query` operation.
    pub fn query(name: &str) -> Self {
        Self::new(vec![Definition::operation(OperationKind::Query, Some(name))])
    }

    /// Document holding a single anonymous `query` operation.
    pub fn anonymous() -> Self {
        Self::new(vec![Definition::operation(OperationKind::Query, None)])
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// The operation name of this document, if it has one.
    pub fn identity(&self) -> Option<&QueryIdentity> {
        self.identity
            .get_or_init(|| identity_of(&self.definitions))
            .as_ref()
    }

    /// Kind of the first operation definition, if any.
    pub fn operation_kind(&self) -> Option<OperationKind> {
        self.first_operation().map(|op| op.operation)
    }

    fn first_operation(&self) -> Option<&OperationDefinition> {
        first_operation(&self.definitions)
    }
}

fn first_operation(definitions: &[Definition]) -> Option<&OperationDefinition> {
    definitions.iter().find_map(|definition| match definition {
        Definition::OperationDefinition(op) => Some(op),
        _ => None,
    })
}

/// Extract the identity of a query from its definitions.
///
/// The first operation definition in source order decides; fragments and
/// other definitions are skipped. Returns `None` when there is no operation
/// definition or the first one is anonymous.
pub fn identity_of(definitions: &[Definition]) -> Option<QueryIdentity> {
    first_operation(definitions)
        .and_then(|op| op.name.as_ref())
        .map(|name| QueryIdentity::new(name.value.clone()))
}

/// Variables bound to a query execution.
///
/// Equality is structural: object keys compare regardless of order, arrays
/// compare element by element and numbers compare by value, so `1` equals
/// `1.0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgumentSet(Map<String, Value>);

impl PartialEq for ArgumentSet {
    fn eq(&self, other: &Self) -> bool {
        maps_equal(&self.0, &other.0)
    }
}

impl ArgumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, replacing an earlier one with the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Interpret a JSON value as an argument set.
    ///
    /// `null` is the empty set; any other non-object value is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::new()),
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Stable textual form with object keys sorted at every depth.
    pub fn canonical_key(&self) -> String {
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }
}

impl From<Map<String, Value>> for ArgumentSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ArgumentSet {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted = keys
                .into_iter()
                .map(|key| (key.clone(), canonicalize(&map[key])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(number) => Value::Number(canonical_number(number)),
        other => other.clone(),
    }
}

/// Integral floats are written as integers so equal arguments share a key.
fn canonical_number(number: &Number) -> Number {
    match integral(number) {
        Some(value) if number.is_f64() => i64::try_from(value)
            .map(Number::from)
            .or_else(|_| u64::try_from(value).map(Number::from))
            .unwrap_or_else(|_| number.clone()),
        _ => number.clone(),
    }
}

fn maps_equal(left: &Map<String, Value>, right: &Map<String, Value>) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(key, value)| right.get(key).is_some_and(|other| values_equal(value, other)))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => numbers_equal(left, right),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(left, right)| values_equal(left, right))
        }
        (Value::Object(left), Value::Object(right)) => maps_equal(left, right),
        _ => left == right,
    }
}

fn numbers_equal(left: &Number, right: &Number) -> bool {
    match (integral(left), integral(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left.as_f64() == right.as_f64(),
    }
}

/// The value of `number` when it is a whole number within the `u64`/`i64`
/// range, whatever its JSON spelling.
fn integral(number: &Number) -> Option<i128> {
    if let Some(value) = number.as_i64() {
        return Some(value.into());
    }
    if let Some(value) = number.as_u64() {
        return Some(value.into());
    }
    let value = number.as_f64()?;
    (value.fract() == 0.0 && value.abs() < U64_LIMIT).then(|| value as i128)
}

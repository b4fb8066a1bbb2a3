use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OpError;

/// Target repository of an operation.
///
/// `head` is an optional commit identifier. When set it makes derived
/// idempotency keys specific to that revision of the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Account or organization owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Commit identifier. Empty when the operation is not revision-specific.
    #[serde(default)]
    pub head: String,
}

impl RepoRef {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            head: String::new(),
        }
    }

    #[must_use]
    pub fn at(mut self, head: impl Into<String>) -> Self {
        self.head = head.into();
        self
    }
}

/// Renders as `owner/name@head`; the `@` is always present.
impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.head)
    }
}

/// Type-keyed bag of external service handles (GitHub accessor, LLM accessor, ...).
///
/// The runtime never looks inside. Operators fetch the capability they need by
/// its concrete type, usually while decoding their input, so a missing client
/// surfaces as a decode-time error rather than deep inside business logic.
#[derive(Clone, Default)]
pub struct ClientBundle {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ClientBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a client, replacing any previous client of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, client: T) {
        self.insert_arc(Arc::new(client));
    }

    /// Insert an already shared client handle.
    pub fn insert_arc<T: Any + Send + Sync>(&mut self, client: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), client);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, client: T) -> Self {
        self.insert(client);
        self
    }

    /// Retrieve a client by its concrete type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), but a missing client is an error naming the type.
    ///
    /// # Errors
    ///
    /// Returns `OpError::MissingClient` when no client of type `T` was supplied.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, OpError> {
        self.get::<T>().ok_or_else(|| OpError::MissingClient {
            client: type_name::<T>(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBundle")
            .field("clients", &self.entries.len())
            .finish()
    }
}

/// A single numeric observation emitted by an operator or middleware.
///
/// Several metrics may share a name; consumers aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Metric {
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            unit: String::new(),
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A qualitative finding. `score` is conventionally in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    pub score: f64,
}

/// Everything an operator receives for one call.
#[derive(Debug, Clone, Default)]
pub struct OpInput {
    pub repo: RepoRef,
    /// Loosely-typed parameters. Kept ordered so canonical serialization is cheap.
    pub params: BTreeMap<String, Value>,
    pub clients: ClientBundle,
    pub dry_run: bool,
    /// Empty until the manager derives one; stable for the rest of the call.
    pub idempotency_key: String,
}

impl OpInput {
    #[must_use]
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_clients(mut self, clients: ClientBundle) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

/// Result envelope of an operator call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpOutput {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    /// Arbitrary payloads (generated reports, patches, ...) keyed by logical name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Bytes>,
}

impl OpOutput {
    #[must_use]
    pub fn with_data(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// First metric carrying `name`, if any.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn push_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }
}

/// Registry listing entry, derived from a live operator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct FakeGithub {
        token: &'static str,
    }

    #[derive(Debug)]
    struct FakeLlm;

    #[test]
    fn repo_ref_display_includes_head() {
        let repo = RepoRef::new("acme", "widgets").at("abc123");
        assert_eq!(repo.to_string(), "acme/widgets@abc123");
        assert_eq!(RepoRef::new("a", "b").to_string(), "a/b@");
    }

    #[test]
    fn client_bundle_returns_inserted_client_by_type() {
        let clients = ClientBundle::new().with(FakeGithub { token: "t" });
        let gh = clients.get::<FakeGithub>().unwrap();
        assert_eq!(gh.token, "t");
        assert!(clients.get::<FakeLlm>().is_none());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn client_bundle_require_names_missing_type() {
        let clients = ClientBundle::new();
        let err = clients.require::<FakeLlm>().unwrap_err();
        assert!(err.to_string().contains("FakeLlm"));
    }

    #[test]
    fn client_bundle_clone_shares_handles() {
        let clients = ClientBundle::new().with(FakeGithub { token: "shared" });
        let copy = clients.clone();
        assert!(Arc::ptr_eq(
            &clients.get::<FakeGithub>().unwrap(),
            &copy.get::<FakeGithub>().unwrap()
        ));
    }

    #[test]
    fn output_metric_finds_first_by_name() {
        let mut out = OpOutput::default();
        out.push_metric(Metric::new("files", 3.0).with_unit("count"));
        out.push_metric(Metric::new("files", 9.0));
        assert_eq!(out.metric("files").map(|m| m.value), Some(3.0));
        assert!(out.metric("cache_hit").is_none());
    }

    #[test]
    fn output_serializes_artifacts() {
        let mut out = OpOutput::with_data(serde_json::json!({"ok": true}));
        out.artifacts
            .insert("report.md".to_string(), Bytes::from_static(b"# hi"));
        let json = serde_json::to_string(&out).unwrap();
        let back: OpOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }
}

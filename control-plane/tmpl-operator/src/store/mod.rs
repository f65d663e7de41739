//! Cluster access behind a small object-store interface.
//!
//! Reconcilers only read and write schema-less JSON documents through
//! [`ResourceStore`]. [`KubeStore`] talks to the API server; [`MemoryStore`]
//! keeps everything in process with the same not-found, conflict and
//! finalizer semantics.

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tmpl_engine::ObjectDocument;

/// Identity of one cluster object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Key of a statically typed resource.
    pub fn of<K: Resource<DynamicType = ()>>(
        namespace: Option<&str>,
        name: &str,
    ) -> Self {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }

    pub fn for_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self::of::<K>(obj.namespace().as_deref(), &obj.name_any())
    }

    /// Key of a document, `None` when it carries no name.
    pub fn for_document(doc: &ObjectDocument) -> Option<Self> {
        Some(Self::new(
            doc.api_version(),
            doc.kind(),
            doc.namespace(),
            doc.name()?,
        ))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),
    #[error("conflict writing {key}: {message}")]
    Conflict { key: ObjectKey, message: String },
    #[error("api error on {key} ({code}): {message}")]
    Api {
        key: ObjectKey,
        code: u16,
        message: String,
    },
    #[error("no api resource serves {kind} in {api_version}")]
    UnknownKind { api_version: String, kind: String },
    #[error("object codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Object store with optimistic concurrency on `metadata.resourceVersion`.
///
/// `patch` and `patch_status` take JSON merge patches; `patch` never touches
/// `status` and `patch_status` only touches `status`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, StoreError>;

    async fn create(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError>;

    /// Full replace, rejected when the resourceVersion is stale.
    async fn replace(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError>;

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError>;
}

pub async fn get_typed<K: DeserializeOwned>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
) -> Result<Option<K>, StoreError> {
    match store.get(key).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub async fn create_typed<K>(
    store: &dyn ResourceStore,
    obj: &K,
) -> Result<Value, StoreError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let key = ObjectKey::for_resource(obj);
    store.create(&key, serde_json::to_value(obj)?).await
}

/// Merge-patch `metadata.finalizers` to exactly `finalizers`.
pub async fn set_finalizers(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    finalizers: &[String],
) -> Result<Value, StoreError> {
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    store.patch(key, &patch).await
}

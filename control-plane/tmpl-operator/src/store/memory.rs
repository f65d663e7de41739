use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{ObjectKey, ResourceStore, StoreError};

/// In-process [`ResourceStore`].
///
/// Mirrors the API server where reconcilers can observe it: resourceVersion
/// checks on replace, generation bumps on spec changes, deletion deferred
/// while finalizers remain and owner-reference garbage collection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    next_uid: u64,
    failing_creates: HashSet<(String, String)>,
    failing_status: HashSet<ObjectKey>,
    status_writes: HashMap<ObjectKey, usize>,
}

fn metadata_mut(obj: &mut Value) -> &mut Map<String, Value> {
    if !obj["metadata"].is_object() {
        obj["metadata"] = json!({});
    }
    match &mut obj["metadata"] {
        Value::Object(m) => m,
        _ => unreachable!("metadata was just set to an object"),
    }
}

fn resource_version(obj: &Value) -> Option<u64> {
    obj["metadata"]["resourceVersion"]
        .as_str()
        .and_then(|rv| rv.parse().ok())
}

fn has_finalizers(obj: &Value) -> bool {
    obj["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn is_deleting(obj: &Value) -> bool {
    !obj["metadata"]["deletionTimestamp"].is_null()
}

impl Inner {
    fn lookup(&self, key: &ObjectKey) -> Result<&Value, StoreError> {
        self.objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    /// Store `next` over `prev`, bumping resourceVersion and, when the spec
    /// moved, generation.
    fn commit(&mut self, key: &ObjectKey, prev: &Value, mut next: Value) -> Value {
        let rv = resource_version(prev).unwrap_or(0) + 1;
        let mut generation = prev["metadata"]["generation"].as_i64().unwrap_or(1);
        if prev.get("spec") != next.get("spec") {
            generation += 1;
        }
        let meta = metadata_mut(&mut next);
        meta.insert("resourceVersion".into(), Value::from(rv.to_string()));
        meta.insert("generation".into(), Value::from(generation));

        if is_deleting(&next) && !has_finalizers(&next) {
            self.remove(key);
        } else {
            self.objects.insert(key.clone(), next.clone());
        }
        next
    }

    fn remove(&mut self, key: &ObjectKey) {
        let mut pending = vec![key.clone()];
        while let Some(key) = pending.pop() {
            let Some(gone) = self.objects.remove(&key) else {
                continue;
            };
            let Some(uid) = gone["metadata"]["uid"].as_str() else {
                continue;
            };
            for (k, obj) in &self.objects {
                let owned = obj["metadata"]["ownerReferences"]
                    .as_array()
                    .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid));
                if owned {
                    pending.push(k.clone());
                }
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object as if it had been created by someone else.
    pub fn insert(&self, key: ObjectKey, object: Value) -> Value {
        let mut inner = self.lock();
        inner.next_uid += 1;
        let uid = format!("uid-{}", inner.next_uid);
        let mut object = object;
        object["apiVersion"] = Value::from(key.api_version.as_str());
        object["kind"] = Value::from(key.kind.as_str());
        let meta = metadata_mut(&mut object);
        meta.insert("name".into(), Value::from(key.name.as_str()));
        if let Some(ns) = &key.namespace {
            meta.insert("namespace".into(), Value::from(ns.as_str()));
        }
        meta.entry("uid").or_insert(Value::from(uid));
        meta.insert("resourceVersion".into(), Value::from("1"));
        meta.insert("generation".into(), Value::from(1));
        inner.objects.insert(key, object.clone());
        object
    }

    /// Seed a typed resource.
    pub fn insert_resource<K>(&self, obj: &K) -> Value
    where
        K: kube::Resource<DynamicType = ()> + Serialize,
    {
        let key = ObjectKey::for_resource(obj);
        let value = serde_json::to_value(obj).unwrap_or(Value::Null);
        self.insert(key, value)
    }

    /// Make every create of `kind`/`name` fail with a server error.
    pub fn fail_creates_of(&self, kind: &str, name: &str) {
        self.lock()
            .failing_creates
            .insert((kind.to_string(), name.to_string()));
    }

    /// Make the next status write to `key` fail with a server error.
    pub fn fail_next_status_write(&self, key: &ObjectKey) {
        self.lock().failing_status.insert(key.clone());
    }

    pub fn snapshot(&self, key: &ObjectKey) -> Option<Value> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn status_writes(&self, key: &ObjectKey) -> usize {
        self.lock().status_writes.get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.lock().objects.keys().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().objects.get(key).cloned())
    }

    async fn create(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError> {
        {
            let inner = self.lock();
            if inner.objects.contains_key(key) {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            if inner
                .failing_creates
                .contains(&(key.kind.clone(), key.name.clone()))
            {
                return Err(StoreError::Api {
                    key: key.clone(),
                    code: 500,
                    message: "injected failure".into(),
                });
            }
        }
        let mut object = object;
        if let Some(m) = object.get_mut("metadata").and_then(Value::as_object_mut)
        {
            m.remove("uid");
            m.remove("resourceVersion");
        }
        Ok(self.insert(key.clone(), object))
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let prev = inner.lookup(key)?.clone();
        if let Some(rv) = resource_version(&object) {
            if Some(rv) != resource_version(&prev) {
                return Err(StoreError::Conflict {
                    key: key.clone(),
                    message: "the object has been modified".into(),
                });
            }
        }
        let mut next = object;
        match prev.get("status") {
            Some(status) => next["status"] = status.clone(),
            None => {
                if let Some(m) = next.as_object_mut() {
                    m.remove("status");
                }
            }
        }
        for field in ["uid", "deletionTimestamp"] {
            if let Some(v) = prev["metadata"].get(field) {
                metadata_mut(&mut next).insert(field.into(), v.clone());
            }
        }
        Ok(inner.commit(key, &prev, next))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let prev = inner.lookup(key)?.clone();
        if has_finalizers(&prev) {
            if !is_deleting(&prev) {
                let mut next = prev.clone();
                metadata_mut(&mut next).insert(
                    "deletionTimestamp".into(),
                    Value::from(Utc::now().to_rfc3339()),
                );
                inner.commit(key, &prev, next);
            }
        } else {
            inner.remove(key);
        }
        Ok(())
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let prev = inner.lookup(key)?.clone();
        let mut patch = patch.clone();
        if let Some(m) = patch.as_object_mut() {
            m.remove("status");
        }
        let mut next = prev.clone();
        json_patch::merge(&mut next, &patch);
        Ok(inner.commit(key, &prev, next))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let prev = inner.lookup(key)?.clone();
        if inner.failing_status.remove(key) {
            return Err(StoreError::Api {
                key: key.clone(),
                code: 500,
                message: "injected failure".into(),
            });
        }
        let mut next = prev.clone();
        if let Some(status) = patch.get("status") {
            if next.get("status").is_none() {
                next["status"] = json!({});
            }
            json_patch::merge(&mut next["status"], status);
        }
        *inner.status_writes.entry(key.clone()).or_default() += 1;
        let rv = resource_version(&prev).unwrap_or(0) + 1;
        metadata_mut(&mut next)
            .insert("resourceVersion".into(), Value::from(rv.to_string()));
        inner.objects.insert(key.clone(), next.clone());
        Ok(next)
    }
}

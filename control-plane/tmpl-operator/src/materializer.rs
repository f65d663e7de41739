//! Realizes substituted object documents in the cluster on behalf of a
//! TemplateInstance.
//!
//! Objects in the instance namespace get a non-controlling owner reference.
//! Objects in any other namespace are out of reach of the garbage collector,
//! so they get an `owner` label and a [`DependentRef`] finalizer on the
//! instance, which [`remove_dependents`] resolves on deletion.

use kube::{Resource, ResourceExt};
use serde_json::{Value, json};
use tmpl_engine::{DependentRef, DocumentError, ObjectDocument};
use tracing::{debug, info, warn};

use crate::crd::instance::{ObjectRef, TemplateInstance};
use crate::error::Error;
use crate::store::{ObjectKey, ResourceStore, set_finalizers};

pub const OWNER_LABEL: &str = "owner";

/// Identity of the instance that owns materialized objects.
#[derive(Clone, Debug)]
pub struct Owner {
    pub key: ObjectKey,
    pub namespace: String,
    pub uid: Option<String>,
    pub finalizers: Vec<String>,
}

impl Owner {
    pub fn of(instance: &TemplateInstance) -> Self {
        let namespace = instance.namespace().unwrap_or_else(|| "default".into());
        Self {
            key: ObjectKey::of::<TemplateInstance>(
                Some(&namespace),
                &instance.name_any(),
            ),
            namespace,
            uid: instance.meta().uid.clone(),
            finalizers: instance.finalizers().to_vec(),
        }
    }

    fn owner_reference(&self) -> Value {
        json!({
            "apiVersion": self.key.api_version,
            "kind": self.key.kind,
            "name": self.key.name,
            "uid": self.uid.clone().unwrap_or_default(),
            "controller": false,
            "blockOwnerDeletion": true,
        })
    }

    fn owner_label(&self) -> String {
        format!("{}-{}", self.key.kind, self.key.name)
    }

    /// Whether `live` was materialized by this instance: an owner reference
    /// with its uid, or for foreign namespaces the owner label together with
    /// the tracking finalizer.
    fn owns(&self, prepared: &Prepared, live: &Value) -> bool {
        match &prepared.dependent {
            None => {
                let uid = self.uid.as_deref().unwrap_or_default();
                !uid.is_empty()
                    && ObjectDocument::from_value(live.clone())
                        .is_ok_and(|doc| doc.is_owned_by(uid))
            }
            Some(dep) => {
                live["metadata"]["labels"][OWNER_LABEL] == self.owner_label().as_str()
                    && self.finalizers.contains(&dep.to_finalizer())
            }
        }
    }
}

/// Give a document without namespace the instance namespace.
pub fn default_namespace(doc: &mut ObjectDocument, namespace: &str) {
    if doc.namespace().is_none() {
        doc.set_namespace(namespace);
    }
}

struct Prepared {
    key: ObjectKey,
    doc: ObjectDocument,
    dependent: Option<DependentRef>,
}

impl Prepared {
    /// Desired object as written on create.
    fn into_object(self, owner: &Owner) -> Value {
        let mut doc = self.doc;
        if self.dependent.is_none() {
            doc.ensure_owner_reference(owner.owner_reference());
        }
        doc.into_value()
    }

    /// `live` with the desired fields merged in. Owner references of other
    /// controllers survive; ours is added when missing.
    fn merged_into(self, owner: &Owner, mut live: Value) -> Result<Value, Error> {
        json_patch::merge(&mut live, &self.doc.into_value());
        if self.dependent.is_some() {
            return Ok(live);
        }
        let mut merged = ObjectDocument::from_value(live)?;
        merged.ensure_owner_reference(owner.owner_reference());
        Ok(merged.into_value())
    }
}

fn prepare(owner: &Owner, mut doc: ObjectDocument) -> Result<Prepared, Error> {
    default_namespace(&mut doc, &owner.namespace);
    let key = ObjectKey::for_document(&doc)
        .ok_or(DocumentError::MissingField("metadata.name"))?;
    let ns = key.namespace.clone().unwrap_or_default();
    let dependent = if ns == owner.namespace {
        None
    } else {
        doc.insert_label(OWNER_LABEL, &owner.owner_label());
        Some(DependentRef::new(&key.api_version, &key.kind, ns, &key.name))
    };
    Ok(Prepared { key, doc, dependent })
}

fn object_ref(key: &ObjectKey, live: &Value) -> ObjectRef {
    ObjectRef {
        api_version: key.api_version.clone(),
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
        uid: live["metadata"]["uid"].as_str().map(str::to_string),
    }
}

/// Register the dependent finalizer on the instance when it is missing.
async fn track(
    store: &dyn ResourceStore,
    owner: &Owner,
    finalizers: &mut Vec<String>,
    dependent: &DependentRef,
) -> Result<(), Error> {
    let finalizer = dependent.to_finalizer();
    if finalizers.contains(&finalizer) {
        return Ok(());
    }
    finalizers.push(finalizer);
    set_finalizers(store, &owner.key, finalizers).await?;
    Ok(())
}

/// Create every document, or none of them.
///
/// All targets are checked for existence before the first create. Targets
/// this instance already owns, left by an apply whose status write was lost,
/// are merged like an update; any other existing target aborts the batch.
/// When a create fails, objects created earlier in the batch are deleted and
/// the instance finalizers are restored before the error is returned.
pub async fn create_all(
    store: &dyn ResourceStore,
    owner: &Owner,
    docs: Vec<ObjectDocument>,
) -> Result<Vec<ObjectRef>, Error> {
    let prepared = docs
        .into_iter()
        .map(|d| prepare(owner, d))
        .collect::<Result<Vec<_>, _>>()?;

    let mut existing = Vec::with_capacity(prepared.len());
    for p in &prepared {
        let live = store.get(&p.key).await?;
        if let Some(live) = &live {
            if !owner.owns(p, live) {
                warn!(object = %p.key, "object already exists");
                return Err(Error::AlreadyExists(p.key.clone()));
            }
            debug!(object = %p.key, "object already applied by this instance");
        }
        existing.push(live);
    }

    let mut finalizers = owner.finalizers.clone();
    let mut created: Vec<ObjectKey> = Vec::with_capacity(prepared.len());
    let mut refs = Vec::with_capacity(prepared.len());
    for (p, live) in prepared.into_iter().zip(existing) {
        let key = p.key.clone();
        let fresh = live.is_none();
        let attempt = async {
            if let Some(dep) = &p.dependent {
                track(store, owner, &mut finalizers, dep).await?;
            }
            let written = match live {
                Some(live) => store.replace(&key, p.merged_into(owner, live)?).await?,
                None => store.create(&key, p.into_object(owner)).await?,
            };
            Ok::<_, Error>(written)
        }
        .await;
        match attempt {
            Ok(live) => {
                info!(object = %key, fresh, "object applied");
                refs.push(object_ref(&key, &live));
                if fresh {
                    created.push(key);
                }
            }
            Err(err) => {
                warn!(object = %key, error = %err, "create failed; rolling back");
                rollback(store, owner, &created, &finalizers).await;
                return Err(err);
            }
        }
    }
    Ok(refs)
}

async fn rollback(
    store: &dyn ResourceStore,
    owner: &Owner,
    created: &[ObjectKey],
    finalizers: &[String],
) {
    for key in created.iter().rev() {
        match store.delete(key).await {
            Ok(()) => info!(object = %key, "rolled back"),
            Err(e) => warn!(object = %key, error = %e, "rollback delete failed"),
        }
    }
    if finalizers != owner.finalizers.as_slice() {
        if let Err(e) = set_finalizers(store, &owner.key, &owner.finalizers).await
        {
            warn!(error = %e, "failed to restore instance finalizers");
        }
    }
}

/// Merge each document into its live object and write the result back.
///
/// Fields absent from the document are left as they are. An object that
/// disappeared since the first apply is created again.
pub async fn update_all(
    store: &dyn ResourceStore,
    owner: &Owner,
    docs: Vec<ObjectDocument>,
) -> Result<Vec<ObjectRef>, Error> {
    let mut finalizers = owner.finalizers.clone();
    let mut refs = Vec::with_capacity(docs.len());
    for doc in docs {
        let p = prepare(owner, doc)?;
        let key = p.key.clone();
        let live = match store.get(&key).await? {
            Some(live) => {
                let updated = store.replace(&key, p.merged_into(owner, live)?).await?;
                debug!(object = %key, "object updated");
                updated
            }
            None => {
                warn!(object = %key, "object missing; recreating");
                if let Some(dep) = &p.dependent {
                    track(store, owner, &mut finalizers, dep).await?;
                }
                store.create(&key, p.into_object(owner)).await?
            }
        };
        refs.push(object_ref(&key, &live));
    }
    Ok(refs)
}

/// Delete every object tracked by a dependent finalizer and drop the
/// finalizers that were resolved. Objects already gone count as resolved.
pub async fn remove_dependents(
    store: &dyn ResourceStore,
    owner: &Owner,
) -> Result<(), Error> {
    let mut remaining = Vec::with_capacity(owner.finalizers.len());
    let mut failure = None;
    for finalizer in &owner.finalizers {
        let Some(dep) = DependentRef::from_finalizer(finalizer) else {
            remaining.push(finalizer.clone());
            continue;
        };
        let key = ObjectKey::new(
            &dep.api_version,
            &dep.kind,
            Some(dep.namespace.as_str()),
            &dep.name,
        );
        match store.delete(&key).await {
            Ok(()) => info!(object = %key, "dependent deleted"),
            Err(e) if e.is_not_found() => {
                debug!(object = %key, "dependent already gone")
            }
            Err(e) => {
                warn!(object = %key, error = %e, "failed to delete dependent");
                remaining.push(finalizer.clone());
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }
    if remaining.len() != owner.finalizers.len() {
        set_finalizers(store, &owner.key, &remaining).await?;
    }
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn owner(store: &MemoryStore) -> Owner {
        let key = ObjectKey::of::<TemplateInstance>(Some("team"), "inst");
        let live = store.insert(key.clone(), json!({"spec": {}}));
        Owner {
            key,
            namespace: "team".into(),
            uid: live["metadata"]["uid"].as_str().map(str::to_string),
            finalizers: vec![],
        }
    }

    fn doc(kind: &str, name: &str, ns: Option<&str>) -> ObjectDocument {
        let mut v = json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}});
        if let Some(ns) = ns {
            v["metadata"]["namespace"] = json!(ns);
        }
        ObjectDocument::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn same_namespace_objects_get_owner_reference() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        let refs = create_all(&store, &owner, vec![doc("ConfigMap", "a", None)])
            .await
            .unwrap();
        assert_eq!(refs[0].namespace.as_deref(), Some("team"));
        let live = store
            .snapshot(&ObjectKey::new("v1", "ConfigMap", Some("team"), "a"))
            .unwrap();
        let oref = &live["metadata"]["ownerReferences"][0];
        assert_eq!(oref["kind"], "TemplateInstance");
        assert_eq!(oref["controller"], false);
        assert_eq!(oref["blockOwnerDeletion"], true);
    }

    #[tokio::test]
    async fn foreign_namespace_objects_are_tracked_by_finalizer() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        create_all(&store, &owner, vec![doc("ConfigMap", "b", Some("other"))])
            .await
            .unwrap();
        let live = store
            .snapshot(&ObjectKey::new("v1", "ConfigMap", Some("other"), "b"))
            .unwrap();
        assert_eq!(live["metadata"]["labels"]["owner"], "TemplateInstance-inst");
        assert!(live["metadata"].get("ownerReferences").is_none());
        let inst = store.snapshot(&owner.key).unwrap();
        assert_eq!(
            inst["metadata"]["finalizers"],
            json!(["v1.-.ConfigMap.-.other.-.b"])
        );
    }

    #[tokio::test]
    async fn existing_target_aborts_before_any_create() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        store.insert(ObjectKey::new("v1", "Secret", Some("team"), "taken"), json!({}));
        let err = create_all(
            &store,
            &owner,
            vec![doc("ConfigMap", "first", None), doc("Secret", "taken", None)],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(!store.contains(&ObjectKey::new("v1", "ConfigMap", Some("team"), "first")));
    }

    #[tokio::test]
    async fn failed_create_rolls_back_siblings_and_finalizers() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        store.fail_creates_of("Service", "third");
        let err = create_all(
            &store,
            &owner,
            vec![
                doc("ConfigMap", "first", None),
                doc("ConfigMap", "second", Some("other")),
                doc("Service", "third", None),
            ],
        )
        .await
        .unwrap_err();
        assert!(!err.is_terminal());
        assert!(!store.contains(&ObjectKey::new("v1", "ConfigMap", Some("team"), "first")));
        assert!(!store.contains(&ObjectKey::new("v1", "ConfigMap", Some("other"), "second")));
        let inst = store.snapshot(&owner.key).unwrap();
        assert_eq!(inst["metadata"]["finalizers"], json!([]));
    }

    #[tokio::test]
    async fn update_merges_into_live_object() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        let key = ObjectKey::new("v1", "ConfigMap", Some("team"), "cfg");
        store.insert(
            key.clone(),
            json!({"data": {"keep": "1", "mode": "old"}}),
        );
        let mut desired = doc("ConfigMap", "cfg", None).into_value();
        desired["data"] = json!({"mode": "new"});
        update_all(&store, &owner, vec![ObjectDocument::from_value(desired).unwrap()])
            .await
            .unwrap();
        let live = store.snapshot(&key).unwrap();
        assert_eq!(live["data"], json!({"keep": "1", "mode": "new"}));
    }

    #[tokio::test]
    async fn dependents_are_deleted_and_unknown_finalizers_kept() {
        let store = MemoryStore::new();
        let mut owner = owner(&store);
        let gone = ObjectKey::new("v1", "ConfigMap", Some("other"), "gone");
        let live = ObjectKey::new("v1", "ConfigMap", Some("other"), "live");
        store.insert(live.clone(), json!({}));
        owner.finalizers = vec![
            "example.com/keep".into(),
            "v1.-.ConfigMap.-.other.-.gone".into(),
            "v1.-.ConfigMap.-.other.-.live".into(),
        ];
        set_finalizers(&store, &owner.key, &owner.finalizers).await.unwrap();
        remove_dependents(&store, &owner).await.unwrap();
        assert!(!store.contains(&live));
        assert!(!store.contains(&gone));
        let inst = store.snapshot(&owner.key).unwrap();
        assert_eq!(inst["metadata"]["finalizers"], json!(["example.com/keep"]));
    }

    #[tokio::test]
    async fn repeated_create_adopts_objects_it_already_owns() {
        let store = MemoryStore::new();
        let mut owner = owner(&store);
        let docs = || {
            vec![doc("ConfigMap", "a", None), doc("ConfigMap", "b", Some("other"))]
        };
        create_all(&store, &owner, docs()).await.unwrap();
        owner.finalizers = vec!["v1.-.ConfigMap.-.other.-.b".into()];

        let refs = create_all(&store, &owner, docs()).await.unwrap();

        assert_eq!(refs.len(), 2);
        let live = store
            .snapshot(&ObjectKey::new("v1", "ConfigMap", Some("team"), "a"))
            .unwrap();
        assert_eq!(live["metadata"]["ownerReferences"].as_array().unwrap().len(), 1);
        let inst = store.snapshot(&owner.key).unwrap();
        assert_eq!(
            inst["metadata"]["finalizers"],
            json!(["v1.-.ConfigMap.-.other.-.b"])
        );
    }

    #[tokio::test]
    async fn labelled_object_without_finalizer_is_not_adopted() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        store.insert(
            ObjectKey::new("v1", "ConfigMap", Some("other"), "b"),
            json!({"metadata": {"labels": {"owner": "TemplateInstance-inst"}}}),
        );
        let err = create_all(&store, &owner, vec![doc("ConfigMap", "b", Some("other"))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_keeps_owner_references_of_others() {
        let store = MemoryStore::new();
        let owner = owner(&store);
        let key = ObjectKey::new("v1", "ConfigMap", Some("team"), "cfg");
        store.insert(
            key.clone(),
            json!({"metadata": {"ownerReferences": [{"kind": "Other", "uid": "someone-else"}]}}),
        );
        for _ in 0..2 {
            update_all(&store, &owner, vec![doc("ConfigMap", "cfg", None)])
                .await
                .unwrap();
        }
        let live = store.snapshot(&key).unwrap();
        let refs = live["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0]["uid"], "someone-else");
        assert_eq!(refs[1]["uid"], "uid-1");
    }
}

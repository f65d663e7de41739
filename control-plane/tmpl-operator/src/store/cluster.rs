use std::collections::HashMap;

use async_trait::async_trait;
use kube::{
    Client,
    api::{
        Api, DeleteParams, DynamicObject, GroupVersionKind, Patch,
        PatchParams, PostParams,
    },
    discovery::{self, ApiResource, Scope},
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ObjectKey, ResourceStore, StoreError};

/// [`ResourceStore`] backed by the API server.
///
/// Kinds are resolved through discovery on first use and cached.
pub struct KubeStore {
    client: Client,
    field_manager: String,
    resources: RwLock<HashMap<(String, String), (ApiResource, Scope)>>,
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

fn map_err(key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => {
            StoreError::NotFound(key.clone())
        }
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key.clone())
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            key: key.clone(),
            message: ae.message,
        },
        kube::Error::Api(ae) => StoreError::Api {
            key: key.clone(),
            code: ae.code,
            message: ae.message,
        },
        other => StoreError::Api {
            key: key.clone(),
            code: 0,
            message: other.to_string(),
        },
    }
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(
        &self,
        key: &ObjectKey,
    ) -> Result<(ApiResource, Scope), StoreError> {
        let cache_key = (key.api_version.clone(), key.kind.clone());
        if let Some(found) = self.resources.read().await.get(&cache_key) {
            return Ok(found.clone());
        }

        let (group, version) = split_api_version(&key.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &key.kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| match map_err(key, e) {
                StoreError::NotFound(_) => StoreError::UnknownKind {
                    api_version: key.api_version.clone(),
                    kind: key.kind.clone(),
                },
                other => other,
            })?;
        debug!(api_version = %key.api_version, kind = %key.kind, plural = %ar.plural, "discovered api resource");
        let entry = (ar, caps.scope);
        self.resources.write().await.insert(cache_key, entry.clone());
        Ok(entry)
    }

    async fn api(
        &self,
        key: &ObjectKey,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, scope) = self.resolve(key).await?;
        let client = self.client.clone();
        Ok(match (scope, key.namespace.as_deref()) {
            (Scope::Cluster, _) => Api::all_with(client, &ar),
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(client, ns, &ar)
            }
            (Scope::Namespaced, None) => Api::default_namespaced_with(client, &ar),
        })
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, StoreError> {
        let api = self.api(key).await?;
        match api.get_opt(&key.name).await.map_err(|e| map_err(key, e))? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(key).await?;
        let obj: DynamicObject = serde_json::from_value(object)?;
        let created = api
            .create(&self.post_params(), &obj)
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(serde_json::to_value(created)?)
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        object: Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(key).await?;
        let obj: DynamicObject = serde_json::from_value(object)?;
        let replaced = api
            .replace(&key.name, &self.post_params(), &obj)
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let api = self.api(key).await?;
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(())
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(key).await?;
        let patched = api
            .patch(&key.name, &self.patch_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(key).await?;
        let patched = api
            .patch_status(&key.name, &self.patch_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_err(key, e))?;
        Ok(serde_json::to_value(patched)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_has_no_prefix() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
    }
}

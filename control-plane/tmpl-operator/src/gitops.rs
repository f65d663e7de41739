//! Publishing instance objects to a Git repository.
//!
//! All manifests of one instance go into a single commit on `main`, pushed
//! once. Credentials are read from a Secret with `username` and `token` keys
//! and sent as HTTP basic auth.

use std::path::Path;

use async_trait::async_trait;
use git2::{
    Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature,
    build::RepoBuilder,
};
use k8s_openapi::api::core::v1::Secret;
use tmpl_engine::ObjectDocument;
use tracing::{debug, info};

use crate::store::{ObjectKey, ResourceStore, get_typed};

pub const BRANCH: &str = "main";

#[derive(thiserror::Error, Debug)]
pub enum GitError {
    #[error("secret {0} not found")]
    MissingSecret(String),
    #[error("secret {secret} has no {field}")]
    MissingCredential { secret: String, field: &'static str },
    #[error("cannot read secret: {0}")]
    Secret(#[from] crate::store::StoreError),
    #[error("git: {0}")]
    Git(#[from] git2::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("publisher task failed: {0}")]
    Join(String),
}

#[derive(Clone)]
pub struct GitCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ManifestFile {
    /// Path relative to the repository root
    pub path: String,
    pub contents: String,
}

#[derive(Clone, Debug)]
pub struct PublishRequest {
    pub repo_url: String,
    pub files: Vec<ManifestFile>,
    pub message: String,
}

#[async_trait]
pub trait GitPublisher: Send + Sync {
    async fn publish(
        &self,
        request: PublishRequest,
        credentials: GitCredentials,
    ) -> Result<(), GitError>;
}

pub fn normalize_repo_url(repo: &str) -> String {
    if repo.starts_with("https://") {
        repo.to_string()
    } else {
        format!("https://{repo}")
    }
}

pub fn normalize_path(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}

/// One YAML file per object, named `<instance>_<kind>_<name>.yaml`.
pub fn render_manifests(
    instance: &str,
    path: &str,
    docs: &[ObjectDocument],
) -> Result<Vec<ManifestFile>, GitError> {
    let dir = normalize_path(path);
    docs.iter()
        .map(|doc| {
            let file = format!(
                "{instance}_{}_{}.yaml",
                doc.kind(),
                doc.name().unwrap_or("unnamed")
            );
            let path = if dir.is_empty() {
                file
            } else {
                format!("{dir}/{file}")
            };
            let contents = serde_yaml::to_string(doc.body())?;
            Ok(ManifestFile { path, contents })
        })
        .collect()
}

pub async fn load_credentials(
    store: &dyn ResourceStore,
    namespace: &str,
    secret: &str,
) -> Result<GitCredentials, GitError> {
    let key = ObjectKey::of::<Secret>(Some(namespace), secret);
    let secret_obj: Secret = get_typed(store, &key)
        .await?
        .ok_or_else(|| GitError::MissingSecret(secret.to_string()))?;
    let data = secret_obj.data.unwrap_or_default();
    let field = |name: &'static str| {
        data.get(name)
            .map(|b| String::from_utf8_lossy(&b.0).trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GitError::MissingCredential {
                secret: secret.to_string(),
                field: name,
            })
    };
    Ok(GitCredentials {
        username: field("username")?,
        token: field("token")?,
    })
}

/// [`GitPublisher`] using libgit2 on a throwaway clone.
#[derive(Clone, Copy, Debug, Default)]
pub struct Git2Publisher;

fn auth_callbacks(creds: &GitCredentials) -> RemoteCallbacks<'static> {
    let username = creds.username.clone();
    let token = creds.token.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _user, _allowed| {
        Cred::userpass_plaintext(&username, &token)
    });
    callbacks
}

fn publish_blocking(
    request: &PublishRequest,
    creds: &GitCredentials,
) -> Result<(), GitError> {
    let workdir = tempfile::tempdir()?;
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(auth_callbacks(creds));
    let repo: Repository = RepoBuilder::new()
        .branch(BRANCH)
        .fetch_options(fetch)
        .clone(&request.repo_url, workdir.path())?;
    debug!(url = %request.repo_url, "repository cloned");

    let mut index = repo.index()?;
    for file in &request.files {
        let rel = Path::new(&file.path);
        let abs = workdir.path().join(rel);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs, &file.contents)?;
        index.add_path(rel)?;
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let parent = repo.head()?.peel_to_commit()?;
    let sig = Signature::now(&creds.username, &creds.username)?;
    repo.commit(Some("HEAD"), &sig, &sig, &request.message, &tree, &[&parent])?;

    let mut callbacks = auth_callbacks(creds);
    callbacks.push_update_reference(|refname, status| match status {
        Some(msg) => Err(git2::Error::from_str(&format!(
            "push of {refname} rejected: {msg}"
        ))),
        None => Ok(()),
    });
    let mut push = PushOptions::new();
    push.remote_callbacks(callbacks);
    let refspec = format!("refs/heads/{BRANCH}:refs/heads/{BRANCH}");
    repo.find_remote("origin")?
        .push(&[refspec.as_str()], Some(&mut push))?;
    Ok(())
}

#[async_trait]
impl GitPublisher for Git2Publisher {
    async fn publish(
        &self,
        request: PublishRequest,
        credentials: GitCredentials,
    ) -> Result<(), GitError> {
        let files = request.files.len();
        let url = request.repo_url.clone();
        tokio::task::spawn_blocking(move || {
            publish_blocking(&request, &credentials)
        })
        .await
        .map_err(|e| GitError::Join(e.to_string()))??;
        info!(%url, files, "manifests pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn repo_url_and_path_are_normalized() {
        assert_eq!(
            normalize_repo_url("github.com/acme/deploy"),
            "https://github.com/acme/deploy"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/acme/deploy"),
            "https://github.com/acme/deploy"
        );
        assert_eq!(normalize_path("/apps/demo/"), "apps/demo");
        assert_eq!(normalize_path("apps"), "apps");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn manifests_are_named_per_object() {
        let docs = vec![
            ObjectDocument::parse(
                r#"{"apiVersion":"v1","kind":"Service","metadata":{"name":"web"}}"#,
            )
            .unwrap(),
        ];
        let files = render_manifests("inst", "/deploy/", &docs).unwrap();
        assert_eq!(files[0].path, "deploy/inst_Service_web.yaml");
        assert!(files[0].contents.contains("kind: Service"));
        let root = render_manifests("inst", "", &docs).unwrap();
        assert_eq!(root[0].path, "inst_Service_web.yaml");
    }

    #[tokio::test]
    async fn credentials_come_from_secret_data() {
        let store = MemoryStore::new();
        // "bot" / "s3cret"
        store.insert(
            ObjectKey::of::<Secret>(Some("ns"), "creds"),
            json!({"data": {"username": "Ym90", "token": "czNjcmV0"}}),
        );
        let creds = load_credentials(&store, "ns", "creds").await.unwrap();
        assert_eq!(creds.username, "bot");
        assert_eq!(creds.token, "s3cret");

        let err = load_credentials(&store, "ns", "absent").await.unwrap_err();
        assert!(matches!(err, GitError::MissingSecret(_)));
    }
}

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tmpl_engine::ParamSpec;

/// Request to instantiate one Template or ClusterTemplate.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "tmax.io",
    version = "v1",
    kind = "TemplateInstance",
    plural = "templateinstances",
    shortname = "ti",
    namespaced,
    status = "TemplateInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<RequesterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    /// Namespaced Template in the instance namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ObjectInfo>,
    /// Cluster-scoped template; exclusive with `template`
    #[serde(
        default,
        rename = "clustertemplate",
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_template: Option<ObjectInfo>,
    /// Publish the objects to Git instead of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitops: Option<GitopsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct RequesterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SecretRef {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitopsSpec {
    /// Repository URL, `https://` is assumed when no scheme is given
    pub source_git_repo: String,
    /// Directory inside the repository receiving the manifests
    #[serde(default)]
    pub path: String,
    /// Secret holding `username` and `token`
    pub secret: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub name: String,
}

/// Template reference on the spec side, resolved snapshot on the status side.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ObjectInfo {
    #[serde(default)]
    pub metadata: ObjectMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "super::raw_object_list")]
    pub objects: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
}

impl ObjectInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMetadata { name: name.into() },
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParamSpec>) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Objects created for this instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<StatusObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ObjectInfo>,
    #[serde(
        default,
        rename = "clustertemplate",
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_template: Option<ObjectInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TemplateInstanceStatus {
    pub fn snapshot(&self) -> Option<&ObjectInfo> {
        self.template.as_ref().or(self.cluster_template.as_ref())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    /// Objects were written to the cluster
    Applied,
    /// Objects were pushed to a Git repository
    Published,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    Succeeded,
    Error,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct StatusObject {
    #[serde(rename = "ref")]
    pub reference: ObjectRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

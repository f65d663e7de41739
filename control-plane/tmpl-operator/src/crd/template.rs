use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tmpl_engine::ParamSpec;

/// Catalog entry bundling parameterized object documents.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "tmax.io",
    version = "v1",
    kind = "Template",
    plural = "templates",
    shortname = "tp",
    namespaced,
    status = "TemplateStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub recommend: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Kinds of `objects`, filled in by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_kinds: Vec<String>,
    /// Object documents with `${NAME}` placeholders
    #[serde(default)]
    #[schemars(schema_with = "super::raw_object_list")]
    pub objects: Vec<Value>,
    /// YAML text templates rendered with the resolved parameters. Only read
    /// for ClusterTemplates, where a non-empty list replaces `objects`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<String>,
    /// Service-catalog plans, carried as is
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "super::raw_object_list")]
    pub plans: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
}

/// Cluster-scoped variant of [`Template`] sharing its spec.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "tmax.io",
    version = "v1",
    kind = "ClusterTemplate",
    plural = "clustertemplates",
    shortname = "ctp",
    status = "TemplateStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
pub struct ClusterTemplateSpec {
    #[serde(flatten)]
    pub template: TemplateSpec,
}

impl From<TemplateSpec> for ClusterTemplateSpec {
    fn from(template: TemplateSpec) -> Self {
        Self { template }
    }
}

impl Deref for ClusterTemplateSpec {
    type Target = TemplateSpec;

    fn deref(&self) -> &TemplateSpec {
        &self.template
    }
}

impl DerefMut for ClusterTemplateSpec {
    fn deref_mut(&mut self) -> &mut TemplateSpec {
        &mut self.template
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct TemplateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TemplateStatusType>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum TemplateStatusType {
    Success,
    Error,
}

/// Shared view over [`Template`] and [`ClusterTemplate`].
pub trait TemplateResource: Resource<DynamicType = ()> {
    fn template_spec(&self) -> &TemplateSpec;
    fn template_status(&self) -> Option<&TemplateStatus>;
}

impl TemplateResource for Template {
    fn template_spec(&self) -> &TemplateSpec {
        &self.spec
    }

    fn template_status(&self) -> Option<&TemplateStatus> {
        self.status.as_ref()
    }
}

impl TemplateResource for ClusterTemplate {
    fn template_spec(&self) -> &TemplateSpec {
        &self.spec.template
    }

    fn template_status(&self) -> Option<&TemplateStatus> {
        self.status.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cluster_template_spec_is_flat_on_the_wire() {
        let ct: ClusterTemplate = serde_json::from_value(json!({
            "apiVersion": "tmax.io/v1",
            "kind": "ClusterTemplate",
            "metadata": {"name": "redis"},
            "spec": {
                "shortDescription": "redis",
                "objects": [{"apiVersion": "v1", "kind": "Service"}],
                "parameters": [{"name": "PORT", "valueType": "number", "value": 6379}]
            }
        }))
        .unwrap();
        assert_eq!(ct.spec.short_description.as_deref(), Some("redis"));
        assert_eq!(ct.spec.objects.len(), 1);
        let back = serde_json::to_value(&ct.spec).unwrap();
        assert_eq!(back["parameters"][0]["value"], 6379);
        assert!(back.get("template").is_none());
    }
}

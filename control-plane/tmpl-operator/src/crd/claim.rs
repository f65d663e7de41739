use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request to promote a namespaced Template into a ClusterTemplate.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "tmax.io",
    version = "v1",
    kind = "ClusterTemplateClaim",
    plural = "clustertemplateclaims",
    shortname = "ctc",
    namespaced,
    status = "ClaimStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateClaimSpec {
    /// Name of the ClusterTemplate to create
    pub resource_name: String,
    /// Source Template in the claim namespace
    pub template: String,
}

/// Service-catalog flavour of [`ClusterTemplateClaim`].
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "tmax.io",
    version = "v1",
    kind = "CatalogServiceClaim",
    plural = "catalogserviceclaims",
    shortname = "csc",
    namespaced,
    status = "ClaimStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogServiceClaimSpec {
    pub resource_name: String,
    pub template: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    /// Set to `Approve` or `Reject` by an administrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// No further transitions once set
    #[serde(default)]
    pub handled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Shared view over both claim kinds.
///
/// Each kind keeps its own finalizer and back-reference label on the
/// ClusterTemplates it creates, so deletions are routed to the right claim.
pub trait Claim: Resource<DynamicType = ()> {
    const FINALIZER: &'static str;
    const LABEL: &'static str;

    fn resource_name(&self) -> &str;
    fn template_name(&self) -> &str;
    fn claim_status(&self) -> Option<&ClaimStatus>;
}

impl Claim for ClusterTemplateClaim {
    const FINALIZER: &'static str = "clustertemplateclaims.tmax.io/finalizer";
    const LABEL: &'static str = "clustertemplateclaims.tmax.io/claim";

    fn resource_name(&self) -> &str {
        &self.spec.resource_name
    }

    fn template_name(&self) -> &str {
        &self.spec.template
    }

    fn claim_status(&self) -> Option<&ClaimStatus> {
        self.status.as_ref()
    }
}

impl Claim for CatalogServiceClaim {
    const FINALIZER: &'static str = "catalogserviceclaims.tmax.io/finalizer";
    const LABEL: &'static str = "catalogserviceclaims.tmax.io/claim";

    fn resource_name(&self) -> &str {
        &self.spec.resource_name
    }

    fn template_name(&self) -> &str {
        &self.spec.template
    }

    fn claim_status(&self) -> Option<&ClaimStatus> {
        self.status.as_ref()
    }
}

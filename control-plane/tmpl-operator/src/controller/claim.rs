//! Approval workflow for ClusterTemplateClaim and CatalogServiceClaim.
//!
//! A claim asks for a namespaced Template to be promoted into a
//! ClusterTemplate. An administrator approves or rejects it by writing
//! `status.status`; the reconciler records the outcome and marks the claim
//! handled, after which it is never touched again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use kube::{ResourceExt, runtime::controller::Action};
use serde_json::json;
use tmpl_engine::ClaimRef;
use tracing::{debug, info, instrument, warn};

use super::{Context, status};
use crate::crd::claim::Claim;
use crate::crd::template::{ClusterTemplate, Template};
use crate::error::Error;
use crate::store::{ObjectKey, create_typed, get_typed};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimPhase {
    New,
    Awaiting,
    Approve,
    Reject,
    Success,
    Rejected,
    Error,
    /// The ClusterTemplate created for the claim was deleted
    Deleted,
}

impl ClaimPhase {
    /// `None` for values nobody is expected to write.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        Some(match raw.unwrap_or("") {
            "" => ClaimPhase::New,
            "Awaiting" => ClaimPhase::Awaiting,
            "Approve" | "Approved" => ClaimPhase::Approve,
            "Reject" => ClaimPhase::Reject,
            "Rejected" => ClaimPhase::Rejected,
            "Success" => ClaimPhase::Success,
            "Error" => ClaimPhase::Error,
            "Cluster Template Deleted" => ClaimPhase::Deleted,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimPhase::New => "",
            ClaimPhase::Awaiting => "Awaiting",
            ClaimPhase::Approve => "Approve",
            ClaimPhase::Reject => "Reject",
            ClaimPhase::Success => "Success",
            ClaimPhase::Rejected => "Rejected",
            ClaimPhase::Error => "Error",
            ClaimPhase::Deleted => "Cluster Template Deleted",
        }
    }
}

pub struct EvalInput<'a> {
    pub phase: Option<ClaimPhase>,
    pub handled: bool,
    pub target_exists: bool,
    /// The existing target carries this claim's back-reference label
    pub target_is_ours: bool,
    pub template_exists: bool,
    pub resource_name: &'a str,
    pub template: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub phase: ClaimPhase,
    pub handled: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Transition {
    fn handled(phase: ClaimPhase, reason: Option<String>, message: &str) -> Self {
        Self {
            phase,
            handled: true,
            reason,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalOutput {
    /// Status to record; `None` leaves the claim untouched.
    pub next: Option<Transition>,
    pub create_cluster_template: bool,
}

impl EvalOutput {
    fn idle() -> Self {
        Self {
            next: None,
            create_cluster_template: false,
        }
    }

    fn to(next: Transition) -> Self {
        Self {
            next: Some(next),
            create_cluster_template: false,
        }
    }
}

pub fn evaluate(input: EvalInput) -> EvalOutput {
    if input.handled {
        return EvalOutput::idle();
    }
    let Some(phase) = input.phase else {
        return EvalOutput::idle();
    };
    if input.target_exists && input.target_is_ours {
        return EvalOutput::to(Transition::handled(
            ClaimPhase::Success,
            None,
            "succeed to create cluster template",
        ));
    }
    if input.target_exists {
        return EvalOutput::to(Transition::handled(
            ClaimPhase::Rejected,
            Some(format!("clustertemplate {} already exist", input.resource_name)),
            "duplicated cluster template name",
        ));
    }
    if !input.template_exists {
        return EvalOutput::to(Transition::handled(
            ClaimPhase::Error,
            Some(format!("template {} is not exist", input.template)),
            "source template not found",
        ));
    }
    match phase {
        ClaimPhase::New => EvalOutput::to(Transition {
            phase: ClaimPhase::Awaiting,
            handled: false,
            reason: None,
            message: Some("wait for admin permission".into()),
        }),
        ClaimPhase::Approve => EvalOutput {
            next: Some(Transition::handled(
                ClaimPhase::Success,
                None,
                "succeed to create cluster template",
            )),
            create_cluster_template: true,
        },
        ClaimPhase::Reject | ClaimPhase::Rejected => EvalOutput::to(
            Transition::handled(ClaimPhase::Rejected, None, "reject from admin"),
        ),
        _ => EvalOutput::idle(),
    }
}

fn back_reference<C: Claim>(claim: &C) -> ClaimRef {
    ClaimRef::new(
        claim.name_any(),
        claim.namespace().unwrap_or_else(|| "default".into()),
    )
}

/// ClusterTemplate promoted from `template` on behalf of `claim`.
pub fn cluster_template_for<C: Claim>(claim: &C, template: &Template) -> ClusterTemplate {
    let back_ref = back_reference(claim);
    let mut ct =
        ClusterTemplate::new(claim.resource_name(), template.spec.clone().into());
    ct.metadata.labels =
        Some(BTreeMap::from([(C::LABEL.to_string(), back_ref.to_string())]));
    ct.metadata.finalizers = Some(vec![C::FINALIZER.to_string()]);
    ct
}

#[instrument(skip_all, fields(ns = %claim.namespace().unwrap_or_else(|| "default".into()), name = %claim.name_any()))]
pub async fn reconcile<C>(claim: Arc<C>, ctx: Arc<Context>) -> Result<Action, Error>
where
    C: Claim,
{
    let current = claim.claim_status();
    let handled = current.is_some_and(|s| s.handled);
    if handled {
        debug!("claim already handled");
        return Ok(Action::await_change());
    }
    let ns = claim.namespace().unwrap_or_else(|| "default".into());
    let store = ctx.store.as_ref();

    let target_key = ObjectKey::of::<ClusterTemplate>(None, claim.resource_name());
    let target = store.get(&target_key).await?;
    let back_ref = back_reference(claim.as_ref()).to_string();
    let target_is_ours = target
        .as_ref()
        .is_some_and(|ct| ct["metadata"]["labels"][C::LABEL] == back_ref.as_str());
    let template: Option<Template> = get_typed(
        store,
        &ObjectKey::of::<Template>(Some(&ns), claim.template_name()),
    )
    .await?;

    let out = evaluate(EvalInput {
        phase: ClaimPhase::parse(current.and_then(|s| s.status.as_deref())),
        handled,
        target_exists: target.is_some(),
        target_is_ours,
        template_exists: template.is_some(),
        resource_name: claim.resource_name(),
        template: claim.template_name(),
    });
    let Some(mut next) = out.next else {
        return Ok(Action::await_change());
    };

    if out.create_cluster_template {
        if let Some(template) = &template {
            let ct = cluster_template_for(claim.as_ref(), template);
            match create_typed(store, &ct).await {
                Ok(_) => info!(cluster_template = %claim.resource_name(), "cluster template created"),
                Err(e) => {
                    warn!(error = %e, "cluster template creation failed");
                    next = Transition::handled(
                        ClaimPhase::Error,
                        Some(e.to_string()),
                        "error occurs while creating cluster template",
                    );
                }
            }
        }
    }

    info!(phase = next.phase.as_str(), handled = next.handled, "claim transition");
    let status = status::claim(
        next.phase,
        next.handled,
        next.reason,
        next.message,
        Utc::now().to_rfc3339(),
    );
    store
        .patch_status(&ObjectKey::for_resource(claim.as_ref()), &json!({ "status": status }))
        .await?;
    Ok(Action::await_change())
}

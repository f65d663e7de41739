use std::sync::Arc;

use chrono::Utc;
use kube::{Resource, ResourceExt, runtime::controller::Action};
use serde_json::json;
use tmpl_engine::{ClaimRef, DocumentError, ObjectDocument, TypedValue, ValueType};
use tracing::{debug, info, instrument, warn};

use super::claim::ClaimPhase;
use super::{Context, status};
use crate::config::TemplateDefaults;
use crate::crd::claim::{CatalogServiceClaim, Claim, ClusterTemplateClaim};
use crate::crd::template::{TemplateResource, TemplateSpec, TemplateStatusType};
use crate::error::Error;
use crate::store::{ObjectKey, ResourceStore, set_finalizers};

fn fill(field: &mut Option<String>, value: &str) {
    if field.as_deref().is_none_or(str::is_empty) {
        *field = Some(value.to_string());
    }
}

/// Fill descriptive defaults, give string parameters an explicit empty
/// default and collect the kinds of every object document.
pub fn apply_defaults(
    spec: &mut TemplateSpec,
    name: &str,
    defaults: &TemplateDefaults,
) -> Result<(), DocumentError> {
    fill(&mut spec.short_description, name);
    fill(&mut spec.long_description, name);
    fill(&mut spec.markdown_description, name);
    fill(&mut spec.image_url, &defaults.image_url);
    fill(&mut spec.provider, &defaults.provider);

    for param in &mut spec.parameters {
        if param.value_type == ValueType::String && param.value.is_none() {
            param.value = Some(TypedValue::Str(String::new()));
        }
    }

    spec.object_kinds = spec
        .objects
        .iter()
        .map(|obj| ObjectDocument::from_value(obj.clone()).map(|d| d.kind().to_string()))
        .collect::<Result<_, _>>()?;
    Ok(())
}

#[instrument(skip_all, fields(kind = %K::kind(&()), name = %obj.name_any()))]
pub async fn reconcile<K>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error>
where
    K: TemplateResource,
{
    let store = ctx.store.as_ref();
    let key = ObjectKey::for_resource(obj.as_ref());

    if obj.meta().deletion_timestamp.is_some() {
        release_claims(store, &key, obj.as_ref()).await?;
        return Ok(Action::await_change());
    }
    if obj.template_status().and_then(|s| s.status).is_some() {
        debug!("template already initialized");
        return Ok(Action::await_change());
    }

    let mut spec = obj.template_spec().clone();
    let status = match apply_defaults(&mut spec, &obj.name_any(), &ctx.cfg.defaults) {
        Ok(()) => {
            store.patch(&key, &json!({ "spec": spec })).await?;
            info!(kinds = ?spec.object_kinds, "template defaults applied");
            status::template(TemplateStatusType::Success, "update success", None)
        }
        Err(e) => {
            warn!(error = %e, "template objects cannot be decoded");
            status::template(
                TemplateStatusType::Error,
                "cannot decode object",
                Some(e.to_string()),
            )
        }
    };
    store
        .patch_status(&key, &json!({ "status": status }))
        .await?;
    Ok(Action::await_change())
}

/// Tell every claim that created this template that it is gone, then drop
/// the claim finalizers.
async fn release_claims<K: TemplateResource>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    obj: &K,
) -> Result<(), Error> {
    let mut remaining = obj.finalizers().to_vec();
    mark_deleted::<ClusterTemplateClaim, K>(store, obj, &mut remaining).await?;
    mark_deleted::<CatalogServiceClaim, K>(store, obj, &mut remaining).await?;
    if remaining.len() != obj.finalizers().len() {
        set_finalizers(store, key, &remaining).await?;
    }
    Ok(())
}

async fn mark_deleted<C: Claim, K: TemplateResource>(
    store: &dyn ResourceStore,
    obj: &K,
    remaining: &mut Vec<String>,
) -> Result<(), Error> {
    let Some(pos) = remaining.iter().position(|f| f == C::FINALIZER) else {
        return Ok(());
    };
    let claim = obj.labels().get(C::LABEL).map(|l| l.parse::<ClaimRef>());
    match claim {
        Some(Ok(claim)) => {
            let key = ObjectKey::of::<C>(Some(&claim.namespace), &claim.name);
            let status = status::claim(
                ClaimPhase::Deleted,
                true,
                None,
                None,
                Utc::now().to_rfc3339(),
            );
            match store.patch_status(&key, &json!({ "status": status })).await {
                Ok(_) => info!(claim = %key, "claim marked deleted"),
                Err(e) if e.is_not_found() => {
                    warn!(claim = %key, "claim no longer exists")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Some(Err(e)) => warn!(error = %e, "malformed claim label"),
        None => warn!(label = C::LABEL, "claim label missing"),
    }
    remaining.remove(pos);
    Ok(())
}

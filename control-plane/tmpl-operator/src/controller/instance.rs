//! TemplateInstance reconciliation.
//!
//! The first successful reconcile copies the referenced template into
//! `status.template` or `status.clustertemplate`. Every later reconcile
//! resolves parameters against that snapshot, so editing or deleting the
//! template never changes an instance that already exists.

use std::sync::Arc;

use chrono::Utc;
use kube::{Resource, ResourceExt, runtime::controller::Action};
use serde_json::json;
use tmpl_engine::{ObjectDocument, ResolvedParams, render_sources, resolve, substitute};
use tracing::{debug, error, info, instrument, warn};

use super::{Context, status};
use crate::crd::instance::{
    Condition, ConditionType, GitopsSpec, ObjectInfo, ObjectMetadata, ObjectRef,
    StatusObject, TemplateInstance, TemplateInstanceStatus,
};
use crate::crd::template::{ClusterTemplate, Template};
use crate::error::Error;
use crate::gitops::{
    PublishRequest, load_credentials, normalize_repo_url, render_manifests,
};
use crate::materializer::{
    Owner, create_all, default_namespace, remove_dependents, update_all,
};
use crate::store::{ObjectKey, ResourceStore, get_typed};

const EXCLUSIVE_REFERENCE: &str =
    "You should insert either template or clustertemplate";

/// Which template kind an instance points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Template,
    ClusterTemplate,
}

impl Source {
    fn kind(self) -> &'static str {
        match self {
            Source::Template => "Template",
            Source::ClusterTemplate => "ClusterTemplate",
        }
    }
}

/// The template reference of `spec`, rejecting specs naming both or neither.
pub fn reference(
    instance: &TemplateInstance,
) -> Result<(&ObjectInfo, Source), Error> {
    match (&instance.spec.template, &instance.spec.cluster_template) {
        (Some(t), None) => Ok((t, Source::Template)),
        (None, Some(ct)) => Ok((ct, Source::ClusterTemplate)),
        _ => Err(Error::BadRequest(EXCLUSIVE_REFERENCE.into())),
    }
}

/// Generation filter: status-only updates never reach the apply path.
pub fn needs_reconcile(instance: &TemplateInstance) -> bool {
    let observed = instance.status.as_ref().and_then(|s| s.observed_generation);
    match (observed, instance.meta().generation) {
        (Some(observed), Some(generation)) => observed != generation,
        _ => true,
    }
}

/// Render the snapshot's objects with `params`.
///
/// ClusterTemplates that carry text-template sources are rendered through the
/// template engine; everything else goes through placeholder substitution.
pub fn render(
    snapshot: &ObjectInfo,
    params: &ResolvedParams,
    source: Source,
) -> Result<Vec<ObjectDocument>, Error> {
    if source == Source::ClusterTemplate && !snapshot.object.is_empty() {
        return render_sources(&snapshot.object, params)?
            .iter()
            .map(|raw| ObjectDocument::parse(raw).map_err(Error::from))
            .collect();
    }
    snapshot
        .objects
        .iter()
        .map(|obj| -> Result<ObjectDocument, Error> {
            let raw = serde_json::to_string(obj)?;
            Ok(ObjectDocument::parse(&substitute(&raw, params))?)
        })
        .collect()
}

async fn load_snapshot(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    source: Source,
) -> Result<ObjectInfo, Error> {
    let spec = match source {
        Source::Template => get_typed::<Template>(
            store,
            &ObjectKey::of::<Template>(Some(namespace), name),
        )
        .await?
        .map(|t| t.spec),
        Source::ClusterTemplate => get_typed::<ClusterTemplate>(
            store,
            &ObjectKey::of::<ClusterTemplate>(None, name),
        )
        .await?
        .map(|ct| ct.spec.template),
    };
    let spec = spec.ok_or_else(|| Error::TemplateNotFound {
        kind: source.kind(),
        name: name.to_string(),
    })?;
    Ok(ObjectInfo {
        metadata: ObjectMetadata {
            name: name.to_string(),
        },
        objects: spec.objects,
        object: match source {
            Source::ClusterTemplate => spec.object,
            Source::Template => Vec::new(),
        },
        parameters: spec.parameters,
    })
}

struct Applied {
    snapshot: ObjectInfo,
    source: Source,
    objects: Vec<ObjectRef>,
    condition: ConditionType,
    message: String,
}

fn gitops<'a>(instance: &'a TemplateInstance, ctx: &Context) -> Option<&'a GitopsSpec> {
    instance.spec.gitops.as_ref().filter(|_| ctx.cfg.features.gitops)
}

async fn publish(
    ctx: &Context,
    owner: &Owner,
    spec: &GitopsSpec,
    mut docs: Vec<ObjectDocument>,
) -> Result<(), Error> {
    for doc in &mut docs {
        default_namespace(doc, &owner.namespace);
    }
    let credentials =
        load_credentials(ctx.store.as_ref(), &owner.namespace, &spec.secret).await?;
    let files = render_manifests(&owner.key.name, &spec.path, &docs)?;
    let request = PublishRequest {
        repo_url: normalize_repo_url(&spec.source_git_repo),
        files,
        message: format!("Update {} manifests", owner.key.name),
    };
    ctx.git.publish(request, credentials).await?;
    Ok(())
}

async fn apply(
    instance: &TemplateInstance,
    owner: &Owner,
    ctx: &Context,
) -> Result<Applied, Error> {
    let store = ctx.store.as_ref();
    let (requested, source) = reference(instance)?;
    let cached = instance.status.as_ref().and_then(|s| match source {
        Source::Template => s.template.clone(),
        Source::ClusterTemplate => s.cluster_template.clone(),
    });
    let first_apply = cached.is_none();
    let snapshot = match cached {
        Some(snapshot) => snapshot,
        None => {
            load_snapshot(store, &owner.namespace, &requested.metadata.name, source)
                .await?
        }
    };

    let params = resolve(&snapshot.parameters, &requested.parameters)?;
    let docs = render(&snapshot, &params, source)?;
    let mut note = String::new();
    if !params.empty_overrides().is_empty() {
        note = format!(
            "; empty overrides fell back to defaults: {}",
            params.empty_overrides().join(", ")
        );
    }

    if let Some(spec) = gitops(instance, ctx) {
        let count = docs.len();
        publish(ctx, owner, spec, docs).await?;
        info!(objects = count, "instance published to git");
        return Ok(Applied {
            snapshot,
            source,
            objects: Vec::new(),
            condition: ConditionType::Published,
            message: format!("succeed to publish instances{note}"),
        });
    }

    let objects = if first_apply {
        create_all(store, owner, docs).await?
    } else {
        update_all(store, owner, docs).await?
    };
    Ok(Applied {
        snapshot,
        source,
        objects,
        condition: ConditionType::Applied,
        message: format!("succeed to create instances{note}"),
    })
}

/// Carry `lastTransitionTime` over for conditions whose content is unchanged.
fn keep_transition_times(next: &mut [Condition], previous: &[Condition]) {
    for cond in next {
        let unchanged = previous.iter().find(|p| {
            p.type_ == cond.type_
                && p.status == cond.status
                && p.reason == cond.reason
                && p.message == cond.message
        });
        if let Some(prev) = unchanged {
            cond.last_transition_time = prev.last_transition_time.clone();
        }
    }
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<TemplateInstance>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let owner = Owner::of(&obj);
    let store = ctx.store.as_ref();

    if obj.meta().deletion_timestamp.is_some() {
        info!("instance deleting; removing dependents");
        remove_dependents(store, &owner).await?;
        return Ok(Action::await_change());
    }
    if !needs_reconcile(&obj) {
        debug!("generation already observed");
        return Ok(Action::await_change());
    }

    let condition = if gitops(&obj, &ctx).is_some() {
        ConditionType::Published
    } else {
        ConditionType::Applied
    };
    let now = Utc::now().to_rfc3339();
    let previous: TemplateInstanceStatus = obj.status.clone().unwrap_or_default();
    let mut next = previous.clone();
    let result = match apply(&obj, &owner, &ctx).await {
        Ok(applied) => {
            info!(objects = applied.objects.len(), "instance applied");
            match applied.source {
                Source::Template => next.template = Some(applied.snapshot),
                Source::ClusterTemplate => {
                    next.cluster_template = Some(applied.snapshot)
                }
            }
            next.objects = applied
                .objects
                .into_iter()
                .map(|reference| StatusObject { reference })
                .collect();
            next.conditions =
                vec![status::succeeded(applied.condition, &applied.message, now)];
            next.observed_generation = obj.meta().generation;
            Ok(Action::await_change())
        }
        Err(err) => {
            next.conditions = vec![status::failed(condition, &err, now)];
            if err.is_terminal() {
                error!(error = %err, reason = err.reason(), "instance failed");
                next.observed_generation = obj.meta().generation;
                Ok(Action::await_change())
            } else {
                warn!(error = %err, "instance apply will be retried");
                Err(err)
            }
        }
    };
    keep_transition_times(&mut next.conditions, &previous.conditions);
    if obj.status.is_some() && next == previous {
        debug!("status unchanged");
        return result;
    }
    store
        .patch_status(&owner.key, &json!({ "status": next }))
        .await?;
    result
}

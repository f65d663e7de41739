use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use kube::{
    Client, Resource, ResourceExt,
    api::Api,
    runtime::{Controller, controller::Action, watcher::Config},
};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::claim::{CatalogServiceClaim, ClusterTemplateClaim};
use crate::crd::instance::TemplateInstance;
use crate::crd::template::{ClusterTemplate, Template};
use crate::error::Error;
use crate::gitops::GitPublisher;
use crate::store::ResourceStore;

pub mod claim;
pub mod instance;
mod status;
pub mod template;

/// Shared state handed to every reconcile call.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub git: Arc<dyn GitPublisher>,
    pub cfg: OperatorConfig,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        git: Arc<dyn GitPublisher>,
        cfg: OperatorConfig,
    ) -> Self {
        Self { store, git, cfg }
    }
}

async fn drive<K, F, Fut>(api: Api<K>, ctx: Arc<Context>, reconcile: F)
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
    F: FnMut(Arc<K>, Arc<Context>) -> Fut,
    Fut: Future<Output = Result<Action, Error>> + Send + 'static,
{
    let kind = K::kind(&()).to_string();
    info!(%kind, "starting controller");
    Controller::new(api, Config::default())
        .run(reconcile, error_policy::<K>, ctx)
        .for_each(|res| {
            let kind = kind.clone();
            async move {
                match res {
                    Ok((obj_ref, action)) => {
                        info!(%kind, name = %obj_ref.name, "reconciled: requeue={:?}", action)
                    }
                    Err(e) => error!(%kind, error = ?e, "reconcile error"),
                }
            }
        })
        .await;
}

fn error_policy<K: Resource<DynamicType = ()>>(
    obj: Arc<K>,
    err: &Error,
    ctx: Arc<Context>,
) -> Action {
    warn!(
        kind = %K::kind(&()),
        name = %obj.name_any(),
        reason = err.reason(),
        error = %err,
        "requeue after failure"
    );
    Action::requeue(ctx.cfg.requeue_after())
}

pub async fn run_instance_controller(
    client: Client,
    ctx: Arc<Context>,
) -> anyhow::Result<()> {
    let api: Api<TemplateInstance> = Api::all(client);
    drive(api, ctx, instance::reconcile).await;
    Ok(())
}

pub async fn run_template_controller(
    client: Client,
    ctx: Arc<Context>,
) -> anyhow::Result<()> {
    let api: Api<Template> = Api::all(client);
    drive(api, ctx, template::reconcile::<Template>).await;
    Ok(())
}

pub async fn run_cluster_template_controller(
    client: Client,
    ctx: Arc<Context>,
) -> anyhow::Result<()> {
    let api: Api<ClusterTemplate> = Api::all(client);
    drive(api, ctx, template::reconcile::<ClusterTemplate>).await;
    Ok(())
}

pub async fn run_claim_controllers(
    client: Client,
    ctx: Arc<Context>,
) -> anyhow::Result<()> {
    let cluster_claims: Api<ClusterTemplateClaim> = Api::all(client.clone());
    let catalog_claims: Api<CatalogServiceClaim> = Api::all(client);
    tokio::join!(
        drive(cluster_claims, ctx.clone(), claim::reconcile::<ClusterTemplateClaim>),
        drive(catalog_claims, ctx, claim::reconcile::<CatalogServiceClaim>),
    );
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::{
    config::OperatorConfig,
    controller::{
        Context, run_claim_controllers, run_cluster_template_controller,
        run_instance_controller, run_template_controller,
    },
    gitops::Git2Publisher,
    store::KubeStore,
    web::run_http_server,
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Controller context backed by the API server and libgit2.
pub fn build_context(client: Client, cfg: OperatorConfig) -> Arc<Context> {
    let store = Arc::new(KubeStore::new(client, cfg.field_manager.clone()));
    Arc::new(Context::new(store, Arc::new(Git2Publisher), cfg))
}

/// Start every controller and the HTTP server and wait until one finishes.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let claims_enabled = cfg.features.claims;
    let ctx = build_context(client.clone(), cfg);

    let instances: JoinHandle<anyhow::Result<()>> =
        tokio::spawn(run_instance_controller(client.clone(), ctx.clone()));
    let templates =
        tokio::spawn(run_template_controller(client.clone(), ctx.clone()));
    let cluster_templates = tokio::spawn(run_cluster_template_controller(
        client.clone(),
        ctx.clone(),
    ));
    let claims = tokio::spawn(async move {
        if claims_enabled {
            run_claim_controllers(client, ctx).await
        } else {
            info!("claim controllers disabled");
            std::future::pending().await
        }
    });
    let http = tokio::spawn(run_http_server(http_addr));

    let (i_res, t_res, ct_res, c_res, h_res) =
        try_join!(instances, templates, cluster_templates, claims, http)?;
    i_res?;
    t_res?;
    ct_res?;
    c_res?;
    h_res?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use envconfig::Envconfig;
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn http_addr_binds_all_interfaces() {
        let cfg = OperatorConfig::init_from_hashmap(&HashMap::from([(
            "TMPL_OPERATOR_HTTP_PORT".to_string(),
            "9090".to_string(),
        )]))
        .unwrap();
        assert_eq!(compute_http_addr(&cfg).to_string(), "0.0.0.0:9090");
    }
}

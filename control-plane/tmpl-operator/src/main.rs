use envconfig::Envconfig;
use kube::Client;
use tmpl_operator::{config::OperatorConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = OperatorConfig::init_from_env()?;
    info!(?cfg, "Starting template operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}

// Integration tests that expect a running cluster with the tmax.io CRDs
// installed (`cargo run --bin crdgen | kubectl apply -f -`).
// Enable via: cargo test -p tmpl-operator --test it_k8s -- --ignored

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};
use tmpl_operator::{
    config::OperatorConfig,
    controller::run_instance_controller,
    crd::{instance::TemplateInstance, template::Template},
    runtime::build_context,
};

mod common;
use common::{template_instance, uniq, web_template_spec};

#[test_log::test(tokio::test)]
#[ignore]
async fn instance_materializes_deployment_in_cluster() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let tpl_name = uniq("tmpl-it");
    let name = uniq("demo");

    let templates: Api<Template> = Api::namespaced(client.clone(), ns);
    let mut tpl = Template::new(&tpl_name, web_template_spec());
    tpl.metadata.namespace = Some(ns.into());
    templates
        .create(&PostParams::default(), &tpl)
        .await
        .expect("create template");

    let ctx = build_context(client.clone(), OperatorConfig::default());
    let controller = tokio::spawn(run_instance_controller(client.clone(), ctx));

    let instances: Api<TemplateInstance> = Api::namespaced(client.clone(), ns);
    let ti = template_instance(
        ns,
        &uniq("ti"),
        &tpl_name,
        vec![
            tmpl_engine::ParamSpec::new("NAME", tmpl_engine::ValueType::String)
                .with_value(name.as_str()),
            tmpl_engine::ParamSpec::new("REPLICAS", tmpl_engine::ValueType::Number)
                .with_value(2),
        ],
    );
    instances
        .create(&PostParams::default(), &ti)
        .await
        .expect("create instance");

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let mut replicas = None;
    for _ in 0..30 {
        if let Some(d) = deployments.get_opt(&name).await.expect("get deployment") {
            replicas = d.spec.and_then(|s| s.replicas);
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(replicas, Some(2));

    let _ = instances
        .delete(&ti.metadata.name.clone().unwrap_or_default(), &DeleteParams::default())
        .await;
    let _ = templates.delete(&tpl_name, &DeleteParams::default()).await;
    controller.abort();
}

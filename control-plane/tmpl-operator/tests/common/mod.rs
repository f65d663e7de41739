#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tmpl_engine::{ParamSpec, ValueType};
use tmpl_operator::{
    config::OperatorConfig,
    controller::Context,
    crd::{
        instance::{ObjectInfo, TemplateInstance, TemplateInstanceSpec},
        template::{Template, TemplateSpec},
    },
    gitops::{GitCredentials, GitError, GitPublisher, PublishRequest},
    store::{MemoryStore, ObjectKey},
};

// DNS-1123 safe numeric suffix for unique names
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_subsec_nanos() % 1_000_000)
}

#[derive(Default)]
pub struct NoopPublisher {
    pub requests: Mutex<Vec<PublishRequest>>,
}

#[async_trait]
impl GitPublisher for NoopPublisher {
    async fn publish(
        &self,
        request: PublishRequest,
        _credentials: GitCredentials,
    ) -> Result<(), GitError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

pub fn context(store: Arc<MemoryStore>) -> Arc<Context> {
    Arc::new(Context::new(
        store,
        Arc::new(NoopPublisher::default()),
        OperatorConfig::default(),
    ))
}

/// Deployment + Service parameterized by NAME and REPLICAS.
pub fn web_template_spec() -> TemplateSpec {
    TemplateSpec {
        objects: vec![
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "${NAME}"},
                "spec": {
                    "replicas": "${REPLICAS}",
                    "selector": {"matchLabels": {"app": "${NAME}"}},
                    "template": {
                        "metadata": {"labels": {"app": "${NAME}"}},
                        "spec": {"containers": [{"name": "web", "image": "nginx"}]}
                    }
                }
            }),
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "${NAME}"},
                "spec": {"ports": [{"port": 80}]}
            }),
        ],
        parameters: vec![
            ParamSpec::new("NAME", ValueType::String).required(),
            ParamSpec::new("REPLICAS", ValueType::Number).with_value(1),
        ],
        ..Default::default()
    }
}

pub fn seed_template(store: &MemoryStore, ns: &str, name: &str, spec: TemplateSpec) {
    let mut tpl = Template::new(name, spec);
    tpl.metadata.namespace = Some(ns.to_string());
    store.insert_resource(&tpl);
}

pub fn template_instance(
    ns: &str,
    name: &str,
    template: &str,
    parameters: Vec<ParamSpec>,
) -> TemplateInstance {
    let mut ti = TemplateInstance::new(
        name,
        TemplateInstanceSpec {
            template: Some(ObjectInfo::named(template).with_parameters(parameters)),
            ..Default::default()
        },
    );
    ti.metadata.namespace = Some(ns.to_string());
    ti
}

/// Store `ti` and return it the way a watcher would deliver it.
pub fn admit(store: &MemoryStore, ti: &TemplateInstance) -> TemplateInstance {
    serde_json::from_value(store.insert_resource(ti)).unwrap()
}

/// Current state of a typed object in the store.
pub fn fetch<K: serde::de::DeserializeOwned>(store: &MemoryStore, key: &ObjectKey) -> K {
    serde_json::from_value(store.snapshot(key).unwrap()).unwrap()
}

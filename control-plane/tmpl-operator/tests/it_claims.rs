// Claim approval workflow and ClusterTemplate deletion hand-off.

use std::sync::Arc;

use tmpl_operator::{
    controller::{claim, template},
    crd::{
        claim::{ClusterTemplateClaim, ClusterTemplateClaimSpec},
        template::ClusterTemplate,
    },
    store::{MemoryStore, ObjectKey, ResourceStore},
};

mod common;
use common::{context, fetch, seed_template, web_template_spec};

fn new_claim(store: &MemoryStore) -> ClusterTemplateClaim {
    let mut c = ClusterTemplateClaim::new(
        "promote-web",
        ClusterTemplateClaimSpec {
            resource_name: "web-global".into(),
            template: "web".into(),
        },
    );
    c.metadata.namespace = Some("apps".into());
    serde_json::from_value(store.insert_resource(&c)).unwrap()
}

async fn set_admin_status(store: &MemoryStore, key: &ObjectKey, value: &str) {
    store
        .patch_status(key, &serde_json::json!({"status": {"status": value}}))
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn claim_lifecycle_from_request_to_deletion() {
    let store = Arc::new(MemoryStore::new());
    seed_template(&store, "apps", "web", web_template_spec());
    let ctx = context(store.clone());
    let c = new_claim(&store);
    let key = ObjectKey::for_resource(&c);

    claim::reconcile(Arc::new(c), ctx.clone()).await.unwrap();
    let awaiting: ClusterTemplateClaim = fetch(&store, &key);
    let status = awaiting.status.unwrap();
    assert_eq!(status.status.as_deref(), Some("Awaiting"));
    assert!(!status.handled);

    set_admin_status(&store, &key, "Approve").await;
    claim::reconcile(Arc::new(fetch::<ClusterTemplateClaim>(&store, &key)), ctx.clone())
        .await
        .unwrap();
    let approved: ClusterTemplateClaim = fetch(&store, &key);
    assert_eq!(
        approved.status.as_ref().and_then(|s| s.status.as_deref()),
        Some("Success")
    );

    let ct_key = ObjectKey::of::<ClusterTemplate>(None, "web-global");
    let ct: ClusterTemplate = fetch(&store, &ct_key);
    assert_eq!(ct.spec.objects.len(), 2);

    // Redelivery of a handled claim writes nothing.
    set_admin_status(&store, &key, "Reject").await;
    let writes = store.status_writes(&key);
    let redelivered: ClusterTemplateClaim = fetch(&store, &key);
    claim::reconcile(Arc::new(redelivered), ctx.clone()).await.unwrap();
    assert_eq!(store.status_writes(&key), writes);
    assert!(store.contains(&ct_key));

    store.delete(&ct_key).await.unwrap();
    template::reconcile(Arc::new(fetch::<ClusterTemplate>(&store, &ct_key)), ctx)
        .await
        .unwrap();
    assert!(!store.contains(&ct_key));
    let released = fetch::<ClusterTemplateClaim>(&store, &key).status.unwrap();
    assert_eq!(released.status.as_deref(), Some("Cluster Template Deleted"));
    assert!(released.handled);
}

#[test_log::test(tokio::test)]
async fn claim_for_taken_name_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    seed_template(&store, "apps", "web", web_template_spec());
    store.insert_resource(&ClusterTemplate::new("web-global", web_template_spec().into()));
    let c = new_claim(&store);
    let key = ObjectKey::for_resource(&c);

    claim::reconcile(Arc::new(c), context(store.clone())).await.unwrap();

    let live: ClusterTemplateClaim = fetch(&store, &key);
    let status = live.status.unwrap();
    assert_eq!(status.status.as_deref(), Some("Rejected"));
    assert!(status.handled);
    assert_eq!(
        status.reason.as_deref(),
        Some("clustertemplate web-global already exist")
    );
}

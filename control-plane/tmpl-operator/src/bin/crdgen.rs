use kube::core::CustomResourceExt;
use tmpl_operator::crd::{
    claim::{CatalogServiceClaim, ClusterTemplateClaim},
    instance::TemplateInstance,
    template::{ClusterTemplate, Template},
};

fn main() {
    let crds = [
        Template::crd(),
        ClusterTemplate::crd(),
        TemplateInstance::crd(),
        ClusterTemplateClaim::crd(),
        CatalogServiceClaim::crd(),
    ];
    for crd in crds {
        let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
        println!("---\n{}", yaml);
    }
}

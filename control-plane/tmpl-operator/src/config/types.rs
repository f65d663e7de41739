use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "TMPL_OPERATOR_HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Field manager recorded on every write made by the operator
    #[envconfig(
        from = "TMPL_OPERATOR_FIELD_MANAGER",
        default = "template-operator"
    )]
    pub field_manager: String,

    /// Backoff before a reconcile that failed transiently is retried.
    /// Env: TMPL_OPERATOR_REQUEUE_SECS
    #[envconfig(from = "TMPL_OPERATOR_REQUEUE_SECS", default = "30")]
    pub requeue_secs: u64,

    #[envconfig(nested)]
    pub defaults: TemplateDefaults,

    #[envconfig(nested)]
    pub features: FeaturesConfig,
}

/// Values written into templates whose descriptive fields are empty.
#[derive(Envconfig, Clone, Debug)]
pub struct TemplateDefaults {
    #[envconfig(
        from = "TMPL_OPERATOR_DEFAULT_IMAGE_URL",
        default = "https://folo.co.kr/img/gm_noimage.png"
    )]
    pub image_url: String,
    #[envconfig(from = "TMPL_OPERATOR_DEFAULT_PROVIDER", default = "tmax")]
    pub provider: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct FeaturesConfig {
    /// Publish instances with `spec.gitops` to Git instead of the cluster
    #[envconfig(from = "TMPL_OPERATOR_FEATURES_GITOPS", default = "true")]
    pub gitops: bool,
    /// Run the ClusterTemplateClaim and CatalogServiceClaim controllers
    #[envconfig(from = "TMPL_OPERATOR_FEATURES_CLAIMS", default = "true")]
    pub claims: bool,
}

impl OperatorConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            http_port: 8088,
            field_manager: "template-operator".into(),
            requeue_secs: 30,
            defaults: TemplateDefaults::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            image_url: "https://folo.co.kr/img/gm_noimage.png".into(),
            provider: "tmax".into(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            gitops: true,
            claims: true,
        }
    }
}

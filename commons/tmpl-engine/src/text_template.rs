//! Legacy text-template rendering for ClusterTemplate object sources.
//!
//! Each source is a YAML document written in Go text-template syntax. Actions
//! are translated to minijinja before rendering: `.FIELD` references become
//! plain variable lookups and `if`/`else if`/`else`/`end` become the matching
//! block tags. Comments are dropped. `range`, `with` and template definitions
//! have no counterpart for scalar parameters and are rejected. The rendered
//! YAML is converted to a JSON document.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use minijinja::Environment;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use crate::param::ResolvedParams;
use crate::value::TypedValue;

static ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{(-?)\s*(.*?)\s*(-?)\}\}").expect("static action regex")
});

static DOT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(])\.([A-Za-z_][A-Za-z0-9_]*)").expect("static field regex")
});

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("template source {index} failed to render: {source}")]
    Template {
        index: usize,
        #[source]
        source: minijinja::Error,
    },
    #[error("template source {index} is not valid YAML: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("template source {index} uses unsupported action {action:?}")]
    Unsupported { index: usize, action: String },
    #[error("rendered object is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn fields(expr: &str) -> String {
    DOT_FIELD.replace_all(expr, "$1$2").into_owned()
}

fn to_jinja(index: usize, source: &str) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in ACTION.captures_iter(source) {
        let Some(action) = caps.get(0) else {
            continue;
        };
        out.push_str(&source[last..action.start()]);
        last = action.end();

        let (open, body, close) = (&caps[1], &caps[2], &caps[3]);
        if body.starts_with("/*") {
            if !open.is_empty() {
                out.truncate(out.trim_end().len());
            }
            continue;
        }
        let keyword = body.split_whitespace().next().unwrap_or_default();
        let rest = body[keyword.len()..].trim();
        let tag = match keyword {
            "if" => Some(format!("if {}", fields(rest))),
            "else" if rest.is_empty() => Some("else".to_string()),
            "else" => rest
                .strip_prefix("if ")
                .map(|cond| format!("elif {}", fields(cond.trim()))),
            "end" => Some("endif".to_string()),
            _ => None,
        };
        match tag {
            Some(tag) => out.push_str(&format!("{{%{open} {tag} {close}%}}")),
            None if matches!(
                keyword,
                "else" | "range" | "with" | "define" | "template" | "block" | "break" | "continue"
            ) =>
            {
                return Err(RenderError::Unsupported {
                    index,
                    action: body.to_string(),
                });
            }
            None => out.push_str(&format!("{{{{{open} {} {close}}}}}", fields(body))),
        }
    }
    out.push_str(&source[last..]);
    Ok(out)
}

fn context(params: &ResolvedParams) -> BTreeMap<&str, JsonValue> {
    params
        .iter()
        .map(|(k, v)| {
            let value = match v {
                TypedValue::Int(i) => JsonValue::from(*i),
                TypedValue::Str(s) => JsonValue::from(s.as_str()),
            };
            (k.as_str(), value)
        })
        .collect()
}

/// Render every source and return one serialized JSON document per source.
pub fn render_sources(
    sources: &[String],
    params: &ResolvedParams,
) -> Result<Vec<String>, RenderError> {
    let env = Environment::new();
    let ctx = context(params);
    let mut out = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let rendered = env.render_str(&to_jinja(index, source)?, &ctx).map_err(|e| {
            error!(index, error = %e, "template executing error");
            RenderError::Template { index, source: e }
        })?;
        debug!(index, "rendered template source");
        let value: JsonValue = serde_yaml::from_str(&rendered)
            .map_err(|e| RenderError::Yaml { index, source: e })?;
        out.push(serde_json::to_string(&value)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ResolvedParams {
        [
            ("NAME".to_string(), TypedValue::Str("demo".into())),
            ("REPLICAS".to_string(), TypedValue::Int(2)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn renders_go_style_actions_to_json() {
        let src = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ .NAME }}\nspec:\n  replicas: {{.REPLICAS}}\n";
        let out = render_sources(&[src.to_string()], &params()).unwrap();
        let v: JsonValue = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(v["metadata"]["name"], "demo");
        assert_eq!(v["spec"]["replicas"], 2);
    }

    #[test]
    fn go_conditionals_are_translated() {
        let src = "kind: ConfigMap\napiVersion: v1\nmetadata:\n  name: cm\ndata:\n  mode: {{ if .MISSING }}a{{ else if .NAME }}{{ .NAME }}{{ else }}c{{ end }}\n  {{- /* dropped */}}\n";
        let out = render_sources(&[src.to_string()], &params()).unwrap();
        let v: JsonValue = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(v["data"]["mode"], "demo");
    }

    #[test]
    fn trim_markers_survive_translation() {
        assert_eq!(
            to_jinja(0, "a {{- .NAME -}} b {{if not .X}}y{{end}}").unwrap(),
            "a {{- NAME -}} b {% if not X %}y{% endif %}"
        );
    }

    #[test]
    fn range_is_rejected() {
        let err = render_sources(
            &["items: {{ range .NAME }}x{{ end }}".to_string()],
            &params(),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Unsupported { index: 0, .. }));
    }

    #[test]
    fn broken_template_reports_its_index() {
        let err = render_sources(
            &["kind: A".to_string(), "{{ .NAME ".to_string()],
            &params(),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Template { index: 1, .. }));
    }
}

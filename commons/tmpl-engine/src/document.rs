use std::collections::BTreeMap;

use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("object is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("object must be a JSON object")]
    NotAnObject,
    #[error("object is missing {0}")]
    MissingField(&'static str),
}

/// A schema-less cluster object with its identifying fields pulled out.
///
/// `apiVersion` and `kind` are required; everything else stays opaque in
/// `body`, which always holds the full document.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDocument {
    api_version: String,
    kind: String,
    body: Map<String, Value>,
}

impl ObjectDocument {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(body) = value else {
            return Err(DocumentError::NotAnObject);
        };
        let api_version = body
            .get("apiVersion")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(DocumentError::MissingField("apiVersion"))?
            .to_string();
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(DocumentError::MissingField("kind"))?
            .to_string();
        Ok(Self {
            api_version,
            kind,
            body,
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.body.get("metadata").and_then(Value::as_object)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let meta = self
            .body
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        match meta {
            Value::Object(m) => m,
            _ => unreachable!("metadata was just set to an object"),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn set_namespace(&mut self, ns: &str) {
        self.metadata_mut()
            .insert("namespace".into(), Value::from(ns));
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata()
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object)
            .map(|l| {
                l.iter()
                    .filter_map(|(k, v)| {
                        v.as_str().map(|s| (k.clone(), s.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn insert_label(&mut self, key: &str, value: &str) {
        let meta = self.metadata_mut();
        let labels = meta
            .entry("labels")
            .or_insert_with(|| Value::Object(Map::new()));
        if !labels.is_object() {
            *labels = Value::Object(Map::new());
        }
        if let Value::Object(l) = labels {
            l.insert(key.into(), Value::from(value));
        }
    }

    /// Whether `metadata.ownerReferences` names `uid`.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.metadata()
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Value::as_array)
            .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid))
    }

    /// Append `owner_ref` to `metadata.ownerReferences` unless an entry with
    /// the same uid is already there. Other owners are left in place.
    pub fn ensure_owner_reference(&mut self, owner_ref: Value) {
        let uid = owner_ref["uid"].as_str().unwrap_or_default().to_string();
        if self.is_owned_by(&uid) {
            return;
        }
        let meta = self.metadata_mut();
        let refs = meta
            .entry("ownerReferences")
            .or_insert_with(|| Value::Array(Vec::new()));
        match refs {
            Value::Array(a) => a.push(owner_ref),
            other => *other = Value::Array(vec![owner_ref]),
        }
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identity_fields() {
        let doc = ObjectDocument::parse(
            r#"{"apiVersion":"v1","kind":"Service","metadata":{"name":"svc","namespace":"ns"}}"#,
        )
        .unwrap();
        assert_eq!(doc.api_version(), "v1");
        assert_eq!(doc.kind(), "Service");
        assert_eq!(doc.name(), Some("svc"));
        assert_eq!(doc.namespace(), Some("ns"));
    }

    #[test]
    fn missing_kind_is_rejected() {
        let err = ObjectDocument::parse(r#"{"apiVersion":"v1"}"#).unwrap_err();
        assert!(matches!(err, DocumentError::MissingField("kind")));
    }

    #[test]
    fn metadata_is_created_on_write() {
        let mut doc =
            ObjectDocument::parse(r#"{"apiVersion":"v1","kind":"ConfigMap"}"#)
                .unwrap();
        assert_eq!(doc.namespace(), None);
        doc.set_namespace("team-a");
        doc.insert_label("owner", "TemplateInstance-x");
        assert_eq!(doc.namespace(), Some("team-a"));
        assert_eq!(
            doc.labels().get("owner").map(String::as_str),
            Some("TemplateInstance-x")
        );
    }

    #[test]
    fn owner_reference_added_once_next_to_others() {
        let mut doc = ObjectDocument::parse(
            r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"ownerReferences":[{"uid":"other"}]}}"#,
        )
        .unwrap();
        let mine = serde_json::json!({"kind": "TemplateInstance", "uid": "u-1"});
        doc.ensure_owner_reference(mine.clone());
        doc.ensure_owner_reference(mine);
        assert!(doc.is_owned_by("other"));
        assert!(doc.is_owned_by("u-1"));
        let refs = doc.body()["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
    }
}

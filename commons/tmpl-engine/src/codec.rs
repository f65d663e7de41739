//! String encodings stored in finalizers and labels.
//!
//! Both formats are read back from objects already persisted in clusters,
//! so they are parsed and formatted here and nowhere else.

use std::fmt;
use std::str::FromStr;

const DEPENDENT_SEP: &str = ".-.";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not a dependent reference: {0}")]
    NotADependent(String),
    #[error("not a claim reference: {0}")]
    NotAClaim(String),
}

/// Cross-namespace object owned by a TemplateInstance, encoded as the
/// finalizer `apiVersion.-.kind.-.namespace.-.name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependentRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl DependentRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn to_finalizer(&self) -> String {
        self.to_string()
    }

    /// Parse a finalizer, returning `None` for finalizers in any other format.
    pub fn from_finalizer(finalizer: &str) -> Option<Self> {
        finalizer.parse().ok()
    }
}

impl fmt::Display for DependentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.api_version,
            self.kind,
            self.namespace,
            self.name,
            sep = DEPENDENT_SEP
        )
    }
}

impl FromStr for DependentRef {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(DEPENDENT_SEP).collect();
        match parts.as_slice() {
            [api_version, kind, namespace, name]
                if parts.iter().all(|p| !p.is_empty()) =>
            {
                Ok(Self::new(*api_version, *kind, *namespace, *name))
            }
            _ => Err(CodecError::NotADependent(s.to_string())),
        }
    }
}

/// Back-reference from a ClusterTemplate to the claim that created it,
/// stored as the label value `name.namespace`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRef {
    pub name: String,
    pub namespace: String,
}

impl ClaimRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

impl FromStr for ClaimRef {
    type Err = CodecError;

    // Namespaces cannot contain dots but names can, so split on the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((name, ns)) if !name.is_empty() && !ns.is_empty() => {
                Ok(Self::new(name, ns))
            }
            _ => Err(CodecError::NotAClaim(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependent_finalizer_format() {
        let d = DependentRef::new("apps/v1", "Deployment", "other", "web");
        assert_eq!(d.to_finalizer(), "apps/v1.-.Deployment.-.other.-.web");
        assert_eq!(DependentRef::from_finalizer(&d.to_finalizer()), Some(d));
    }

    #[test]
    fn foreign_finalizers_are_not_dependents() {
        assert_eq!(DependentRef::from_finalizer("foregroundDeletion"), None);
        assert_eq!(DependentRef::from_finalizer("v1.-.Service.-..-.x"), None);
        assert_eq!(
            DependentRef::from_finalizer("a.-.b.-.c.-.d.-.e"),
            None
        );
    }

    #[test]
    fn claim_label_splits_on_last_dot() {
        let c: ClaimRef = "my.claim.team-a".parse().unwrap();
        assert_eq!(c, ClaimRef::new("my.claim", "team-a"));
        assert_eq!(c.to_string(), "my.claim.team-a");
        assert!("nodot".parse::<ClaimRef>().is_err());
    }
}

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::value::{TypedValue, ValueType};

/// Declared parameter of a template, or an override on an instance.
///
/// On templates `value` is the default; on instances it is the override and
/// only `name` and `value` are read.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    /// Name used to reference the parameter as `${NAME}` inside objects
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The resolved value must not be an empty string
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TypedValue>,
    /// Pattern the stringified resolved value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<TypedValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    /// Default of this parameter, or the zero value of its type.
    pub fn default_value(&self) -> TypedValue {
        self.value
            .clone()
            .unwrap_or_else(|| TypedValue::zero(self.value_type))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter {0} must have a value")]
    MissingRequired(String),
    #[error("parameter:{name} value:{value} is not a valid number")]
    NotANumber { name: String, value: String },
    #[error("parameter:{name} value:{value} doesn't match with given regex")]
    RegexMismatch { name: String, value: String },
    #[error("parameter:{name} has an invalid regex {pattern}: {reason}")]
    InvalidRegex {
        name: String,
        pattern: String,
        reason: String,
    },
}

impl ParamError {
    pub fn parameter(&self) -> &str {
        match self {
            ParamError::MissingRequired(name) => name,
            ParamError::NotANumber { name, .. }
            | ParamError::RegexMismatch { name, .. }
            | ParamError::InvalidRegex { name, .. } => name,
        }
    }
}

/// Fully valued parameter set, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedParams {
    values: BTreeMap<String, TypedValue>,
    /// Parameters whose explicit empty-string override was replaced by the
    /// template default. An empty `Str` cannot be told apart from "no value
    /// given", so callers surface this list rather than trust either reading.
    empty_overrides: Vec<String>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypedValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn empty_overrides(&self) -> &[String] {
        &self.empty_overrides
    }

    pub fn into_map(self) -> BTreeMap<String, TypedValue> {
        self.values
    }
}

impl FromIterator<(String, TypedValue)> for ResolvedParams {
    fn from_iter<T: IntoIterator<Item = (String, TypedValue)>>(
        iter: T,
    ) -> Self {
        Self {
            values: iter.into_iter().collect(),
            empty_overrides: Vec::new(),
        }
    }
}

/// Merge template defaults with instance overrides, coerce, and validate.
pub fn resolve(
    template: &[ParamSpec],
    overrides: &[ParamSpec],
) -> Result<ResolvedParams, ParamError> {
    let by_name: HashMap<&str, &TypedValue> = overrides
        .iter()
        .filter_map(|p| p.value.as_ref().map(|v| (p.name.as_str(), v)))
        .collect();

    let mut out = ResolvedParams::default();
    for param in template {
        let value = match by_name.get(param.name.as_str()) {
            Some(v) => {
                let (coerced, fell_back) = coerce(param, v)?;
                if fell_back {
                    warn!(
                        parameter = %param.name,
                        "empty override replaced by template default"
                    );
                    out.empty_overrides.push(param.name.clone());
                }
                coerced
            }
            None => param.default_value(),
        };

        if param.required && value.is_empty_str() {
            return Err(ParamError::MissingRequired(param.name.clone()));
        }
        debug!(parameter = %param.name, value = %value, "resolved parameter");
        out.values.insert(param.name.clone(), value);
    }

    validate_regex(&out, template)?;
    Ok(out)
}

fn coerce(
    param: &ParamSpec,
    value: &TypedValue,
) -> Result<(TypedValue, bool), ParamError> {
    match (param.value_type, value) {
        (ValueType::Number, TypedValue::Str(s)) if s.trim().is_empty() => {
            Ok((param.default_value(), true))
        }
        (ValueType::Number, TypedValue::Str(s)) => s
            .trim()
            .parse::<i32>()
            .map(|i| (TypedValue::Int(i), false))
            .map_err(|_| ParamError::NotANumber {
                name: param.name.clone(),
                value: s.clone(),
            }),
        (ValueType::String, TypedValue::Int(i)) => {
            Ok((TypedValue::Str(i.to_string()), false))
        }
        (ValueType::String, TypedValue::Str(s)) if s.is_empty() => {
            Ok((param.default_value(), true))
        }
        (_, v) => Ok((v.clone(), false)),
    }
}

/// Check every declared regex against the stringified resolved value.
///
/// Parameters are checked in declaration order and the first mismatch is
/// reported.
pub fn validate_regex(
    resolved: &ResolvedParams,
    template: &[ParamSpec],
) -> Result<(), ParamError> {
    for param in template {
        let Some(pattern) = param.regex.as_deref().filter(|r| !r.is_empty())
        else {
            continue;
        };
        let re = Regex::new(pattern).map_err(|e| ParamError::InvalidRegex {
            name: param.name.clone(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let value = resolved
            .get(&param.name)
            .map(|v| v.to_string())
            .unwrap_or_default();
        if !re.is_match(&value) {
            return Err(ParamError::RegexMismatch {
                name: param.name.clone(),
                value,
            });
        }
    }
    Ok(())
}

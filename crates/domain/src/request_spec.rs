// RequestSpec - Cómo generar las peticiones de prueba y de warmup

use crate::shared_kernel::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Signature used when no signature names are given.
pub const DEFAULT_SIGNATURE_NAME: &str = "serving_default";

/// Tag set used when none is given.
pub const DEFAULT_TAG_SET: &[&str] = &["serve"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub kind: RequestKind,
    #[serde(default)]
    pub split_name: Option<String>,
    #[serde(default = "default_num_examples")]
    pub num_examples: u32,
    #[serde(default)]
    pub make_warmup: bool,
}

fn default_num_examples() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TensorflowServing(TensorflowServingRequestSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorflowServingRequestSpec {
    #[serde(default)]
    pub tag_set: Vec<String>,
    #[serde(default)]
    pub signature_names: Vec<String>,
    /// Inference method per signature; unlisted signatures use `predict`.
    #[serde(default)]
    pub signature_methods: BTreeMap<String, RequestMethod>,
}

impl TensorflowServingRequestSpec {
    pub fn resolved_tag_set(&self) -> Vec<String> {
        if self.tag_set.is_empty() {
            DEFAULT_TAG_SET.iter().map(|t| t.to_string()).collect()
        } else {
            self.tag_set.clone()
        }
    }

    pub fn resolved_signature_names(&self) -> Vec<String> {
        if self.signature_names.is_empty() {
            vec![DEFAULT_SIGNATURE_NAME.to_string()]
        } else {
            self.signature_names.clone()
        }
    }

    pub fn method_for(&self, signature_name: &str) -> RequestMethod {
        self.signature_methods
            .get(signature_name)
            .copied()
            .unwrap_or_default()
    }
}

/// Método de inferencia del endpoint REST
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMethod {
    Classify,
    Regress,
    #[default]
    Predict,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Classify => "classify",
            RequestMethod::Regress => "regress",
            RequestMethod::Predict => "predict",
        }
    }

    /// Body field carrying the inputs for this method.
    pub fn inputs_field(&self) -> &'static str {
        match self {
            RequestMethod::Classify | RequestMethod::Regress => "examples",
            RequestMethod::Predict => "instances",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RequestSpec {
    pub fn tensorflow_serving(spec: TensorflowServingRequestSpec) -> Self {
        Self {
            kind: RequestKind::TensorflowServing(spec),
            split_name: None,
            num_examples: default_num_examples(),
            make_warmup: false,
        }
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split_name = Some(split.into());
        self
    }

    pub fn with_num_examples(mut self, num_examples: u32) -> Self {
        self.num_examples = num_examples;
        self
    }

    pub fn with_warmup(mut self, make_warmup: bool) -> Self {
        self.make_warmup = make_warmup;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_examples == 0 {
            return Err(DomainError::InvalidRequestSpec {
                message: "num_examples must be at least 1".to_string(),
            });
        }
        if matches!(&self.split_name, Some(split) if split.is_empty()) {
            return Err(DomainError::InvalidRequestSpec {
                message: "split_name cannot be empty".to_string(),
            });
        }
        match &self.kind {
            RequestKind::TensorflowServing(tfs) => {
                if tfs.signature_names.iter().any(|s| s.is_empty()) {
                    return Err(DomainError::InvalidRequestSpec {
                        message: "signature names cannot be empty".to_string(),
                    });
                }
                if tfs.tag_set.iter().any(|t| t.is_empty()) {
                    return Err(DomainError::InvalidRequestSpec {
                        message: "tags in tag_set cannot be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A single serialized inference request, addressed to one signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub model_name: String,
    pub signature_name: String,
    pub method: RequestMethod,
    pub tag_set: Vec<String>,
    pub body: serde_json::Value,
}

impl ProbeRequest {
    /// REST path relative to the server endpoint.
    pub fn path(&self) -> String {
        format!("/v1/models/{}:{}", self.model_name, self.method.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_lists_are_empty() {
        let tfs = TensorflowServingRequestSpec::default();
        assert_eq!(tfs.resolved_tag_set(), vec!["serve".to_string()]);
        assert_eq!(
            tfs.resolved_signature_names(),
            vec![DEFAULT_SIGNATURE_NAME.to_string()]
        );
        assert_eq!(tfs.method_for("serving_default"), RequestMethod::Predict);
    }

    #[test]
    fn test_method_lookup_and_path() {
        let mut tfs = TensorflowServingRequestSpec::default();
        tfs.signature_methods
            .insert("classification".to_string(), RequestMethod::Classify);
        assert_eq!(tfs.method_for("classification"), RequestMethod::Classify);

        let request = ProbeRequest {
            model_name: "taxi".to_string(),
            signature_name: "classification".to_string(),
            method: RequestMethod::Classify,
            tag_set: vec!["serve".to_string()],
            body: serde_json::json!({}),
        };
        assert_eq!(request.path(), "/v1/models/taxi:classify");
    }

    #[test]
    fn test_zero_examples_rejected() {
        let spec = RequestSpec::tensorflow_serving(TensorflowServingRequestSpec::default())
            .with_num_examples(0);
        assert!(matches!(
            spec.validate(),
            Err(DomainError::InvalidRequestSpec { .. })
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"kind": {"tensorflow_serving": {"signature_names": ["a", "b"]}}}"#;
        let spec: RequestSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.num_examples, 1);
        assert!(!spec.make_warmup);
        assert!(spec.split_name.is_none());
    }
}

//! Request Builder
//!
//! Turns examples into TensorFlow Serving REST requests, one per example and
//! signature.

use infra_validator_domain::{
    DomainError, Example, ExampleSource, ProbeRequest, RequestKind, RequestSpec, Result,
};
use serde_json::json;
use tracing::info;

/// Probe requests plus the warmup trace when one was asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltRequests {
    pub probes: Vec<ProbeRequest>,
    pub warmup: Option<Vec<ProbeRequest>>,
}

pub struct RequestBuilder;

impl RequestBuilder {
    pub fn build(
        source: &dyn ExampleSource,
        spec: &RequestSpec,
        model_name: &str,
    ) -> Result<BuiltRequests> {
        spec.validate()?;

        let split = Self::select_split(source, spec.split_name.as_deref())?;
        let examples = source.read_examples(&split, spec.num_examples as usize)?;
        if examples.is_empty() {
            return Err(DomainError::NoExamples { split });
        }

        let probes = match &spec.kind {
            RequestKind::TensorflowServing(tfs) => {
                let tag_set = tfs.resolved_tag_set();
                let mut probes = Vec::new();
                for signature_name in tfs.resolved_signature_names() {
                    let method = tfs.method_for(&signature_name);
                    for example in &examples {
                        probes.push(ProbeRequest {
                            model_name: model_name.to_string(),
                            signature_name: signature_name.clone(),
                            method,
                            tag_set: tag_set.clone(),
                            body: Self::body(&signature_name, method.inputs_field(), example),
                        });
                    }
                }
                probes
            }
        };

        info!(
            "Built {} request(s) from {} example(s) of split {}",
            probes.len(),
            examples.len(),
            split
        );

        let warmup = spec.make_warmup.then(|| probes.clone());
        Ok(BuiltRequests { probes, warmup })
    }

    /// Exact name when given, else the first split in sorted order.
    fn select_split(source: &dyn ExampleSource, requested: Option<&str>) -> Result<String> {
        let mut available = source.split_names()?;
        available.sort();

        match requested {
            Some(name) if available.iter().any(|s| s == name) => Ok(name.to_string()),
            Some(name) => Err(DomainError::SplitNotFound {
                split: name.to_string(),
                available,
            }),
            None => available
                .into_iter()
                .next()
                .ok_or_else(|| DomainError::ExamplesSource {
                    message: "examples source has no splits".to_string(),
                }),
        }
    }

    fn body(signature_name: &str, inputs_field: &str, example: &Example) -> serde_json::Value {
        let mut body = json!({ "signature_name": signature_name });
        body[inputs_field] = json!([example]);
        body
    }
}

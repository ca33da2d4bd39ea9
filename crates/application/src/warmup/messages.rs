//! TensorFlow Serving `PredictionLog` messages
//!
//! Hand-written prost messages covering the fields a warmup record needs.
//! Field tags follow `tensorflow_serving/apis/prediction_log.proto` and the
//! protos it imports.

use infra_validator_domain::{DomainError, ProbeRequest, RequestMethod, Result};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct PredictionLog {
    #[prost(oneof = "prediction_log::LogType", tags = "2, 3, 6")]
    pub log_type: Option<prediction_log::LogType>,
}

pub mod prediction_log {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum LogType {
        #[prost(message, tag = "2")]
        ClassifyLog(super::ClassifyLog),
        #[prost(message, tag = "3")]
        RegressLog(super::RegressLog),
        #[prost(message, tag = "6")]
        PredictLog(super::PredictLog),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClassifyLog {
    #[prost(message, optional, tag = "1")]
    pub request: Option<ClassificationRequest>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegressLog {
    #[prost(message, optional, tag = "1")]
    pub request: Option<RegressionRequest>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PredictLog {
    #[prost(message, optional, tag = "1")]
    pub request: Option<PredictRequest>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ModelSpec {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub signature_name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClassificationRequest {
    #[prost(message, optional, tag = "1")]
    pub model_spec: Option<ModelSpec>,
    #[prost(message, optional, tag = "2")]
    pub input: Option<Input>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegressionRequest {
    #[prost(message, optional, tag = "1")]
    pub model_spec: Option<ModelSpec>,
    #[prost(message, optional, tag = "2")]
    pub input: Option<Input>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PredictRequest {
    #[prost(message, optional, tag = "1")]
    pub model_spec: Option<ModelSpec>,
    #[prost(map = "string, message", tag = "2")]
    pub inputs: HashMap<String, TensorProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Input {
    #[prost(oneof = "input::Kind", tags = "1")]
    pub kind: Option<input::Kind>,
}

pub mod input {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        ExampleList(super::ExampleList),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExampleList {
    #[prost(message, repeated, tag = "1")]
    pub examples: Vec<Example>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    DtInvalid = 0,
    DtFloat = 1,
    DtString = 7,
    DtInt64 = 9,
    DtBool = 10,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorProto {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub tensor_shape: Option<TensorShapeProto>,
    #[prost(float, repeated, tag = "5")]
    pub float_val: Vec<f32>,
    #[prost(bytes = "vec", repeated, tag = "8")]
    pub string_val: Vec<Vec<u8>>,
    #[prost(int64, repeated, tag = "10")]
    pub int64_val: Vec<i64>,
    #[prost(bool, repeated, tag = "11")]
    pub bool_val: Vec<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: Vec<TensorShapeDim>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorShapeDim {
    #[prost(int64, tag = "1")]
    pub size: i64,
}

impl PredictionLog {
    /// Convert a REST request body into the log record the server replays.
    pub fn from_request(request: &ProbeRequest) -> Result<Self> {
        let field = request.method.inputs_field();
        let examples = request
            .body
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| warmup_error(format!("request body has no `{}` array", field)))?;

        let model_spec = Some(ModelSpec {
            name: request.model_name.clone(),
            signature_name: request.signature_name.clone(),
        });

        let log_type = match request.method {
            RequestMethod::Classify => prediction_log::LogType::ClassifyLog(ClassifyLog {
                request: Some(ClassificationRequest {
                    model_spec,
                    input: Some(example_input(examples)?),
                }),
            }),
            RequestMethod::Regress => prediction_log::LogType::RegressLog(RegressLog {
                request: Some(RegressionRequest {
                    model_spec,
                    input: Some(example_input(examples)?),
                }),
            }),
            RequestMethod::Predict => prediction_log::LogType::PredictLog(PredictLog {
                request: Some(PredictRequest {
                    model_spec,
                    inputs: batch_tensors(examples)?,
                }),
            }),
        };

        Ok(Self {
            log_type: Some(log_type),
        })
    }
}

fn warmup_error(message: String) -> DomainError {
    DomainError::Warmup { message }
}

/// Flattened values of one feature, all of a single type.
#[derive(Debug, PartialEq)]
enum Values {
    Bytes(Vec<Vec<u8>>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Bools(Vec<bool>),
}

impl Values {
    fn scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Values::Bools(vec![*b])),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Values::Ints(vec![i])),
                None => n.as_f64().map(|f| Values::Floats(vec![f as f32])),
            },
            Value::String(s) => Some(Values::Bytes(vec![s.clone().into_bytes()])),
            _ => None,
        }
    }

    fn merge(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Values::Bytes(mut a), Values::Bytes(b)) => {
                a.extend(b);
                Some(Values::Bytes(a))
            }
            (Values::Ints(mut a), Values::Ints(b)) => {
                a.extend(b);
                Some(Values::Ints(a))
            }
            (Values::Bools(mut a), Values::Bools(b)) => {
                a.extend(b);
                Some(Values::Bools(a))
            }
            (Values::Floats(mut a), Values::Floats(b)) => {
                a.extend(b);
                Some(Values::Floats(a))
            }
            (Values::Ints(a), Values::Floats(b)) => Some(Values::Floats(
                a.into_iter().map(|i| i as f32).chain(b).collect(),
            )),
            (Values::Floats(mut a), Values::Ints(b)) => {
                a.extend(b.into_iter().map(|i| i as f32));
                Some(Values::Floats(a))
            }
            _ => None,
        }
    }

    /// A scalar or a flat array of scalars, with the array length if any.
    fn from_json(key: &str, value: &Value) -> Result<(Self, Option<usize>)> {
        let unsupported = || warmup_error(format!("feature `{}` has an unsupported value", key));
        match value {
            Value::Array(items) => {
                let mut merged: Option<Values> = None;
                for item in items {
                    let next = Values::scalar(item).ok_or_else(unsupported)?;
                    merged = Some(match merged {
                        Some(acc) => acc.merge(next).ok_or_else(unsupported)?,
                        None => next,
                    });
                }
                Ok((merged.unwrap_or(Values::Floats(Vec::new())), Some(items.len())))
            }
            other => Ok((Values::scalar(other).ok_or_else(unsupported)?, None)),
        }
    }

    fn into_feature(self) -> Feature {
        let kind = match self {
            Values::Bytes(value) => feature::Kind::BytesList(BytesList { value }),
            Values::Floats(value) => feature::Kind::FloatList(FloatList { value }),
            Values::Ints(value) => feature::Kind::Int64List(Int64List { value }),
            Values::Bools(value) => feature::Kind::Int64List(Int64List {
                value: value.into_iter().map(i64::from).collect(),
            }),
        };
        Feature { kind: Some(kind) }
    }

    fn into_tensor(self, shape: Vec<i64>) -> TensorProto {
        let mut tensor = TensorProto {
            tensor_shape: Some(TensorShapeProto {
                dim: shape.into_iter().map(|size| TensorShapeDim { size }).collect(),
            }),
            ..Default::default()
        };
        match self {
            Values::Bytes(v) => {
                tensor.set_dtype(DataType::DtString);
                tensor.string_val = v;
            }
            Values::Floats(v) => {
                tensor.set_dtype(DataType::DtFloat);
                tensor.float_val = v;
            }
            Values::Ints(v) => {
                tensor.set_dtype(DataType::DtInt64);
                tensor.int64_val = v;
            }
            Values::Bools(v) => {
                tensor.set_dtype(DataType::DtBool);
                tensor.bool_val = v;
            }
        }
        tensor
    }
}

fn example_object(example: &Value) -> Result<&serde_json::Map<String, Value>> {
    example
        .as_object()
        .ok_or_else(|| warmup_error("examples must be JSON objects".to_string()))
}

fn example_input(examples: &[Value]) -> Result<Input> {
    let examples = examples
        .iter()
        .map(|example| {
            let feature = example_object(example)?
                .iter()
                .map(|(key, value)| {
                    let (values, _) = Values::from_json(key, value)?;
                    Ok((key.clone(), values.into_feature()))
                })
                .collect::<Result<HashMap<_, _>>>()?;
            Ok(Example {
                features: Some(Features { feature }),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Input {
        kind: Some(input::Kind::ExampleList(ExampleList { examples })),
    })
}

/// Batch the instances column-wise, one tensor per key with a leading batch
/// dimension.
fn batch_tensors(instances: &[Value]) -> Result<HashMap<String, TensorProto>> {
    let Some(first) = instances.first() else {
        return Err(warmup_error("request has no instances".to_string()));
    };

    let mut tensors = HashMap::new();
    for key in example_object(first)?.keys() {
        let mut merged: Option<Values> = None;
        let mut inner: Option<Option<usize>> = None;

        for instance in instances {
            let value = example_object(instance)?
                .get(key)
                .ok_or_else(|| warmup_error(format!("instance is missing `{}`", key)))?;
            let (values, len) = Values::from_json(key, value)?;

            match inner {
                Some(expected) if expected != len => {
                    return Err(warmup_error(format!("`{}` has a ragged shape", key)));
                }
                _ => inner = Some(len),
            }
            merged = Some(match merged {
                Some(acc) => acc.merge(values).ok_or_else(|| {
                    warmup_error(format!("`{}` mixes value types across instances", key))
                })?,
                None => values,
            });
        }

        let mut shape = vec![instances.len() as i64];
        if let Some(Some(len)) = inner {
            shape.push(len as i64);
        }
        if let Some(values) = merged {
            tensors.insert(key.clone(), values.into_tensor(shape));
        }
    }
    Ok(tensors)
}

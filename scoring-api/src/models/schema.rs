//! Model input schema and best-effort type coercion
//!
//! The schema comes from the `signature.inputs` entry of the `MLmodel`
//! descriptor. Before a frame reaches the model, each declared column is
//! converted to the numeric width the model was trained with. A column that
//! cannot be converted is logged and left as it is.

use serde::Deserialize;

use crate::table::{Frame, Value};

/// One declared model input
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputSchema {
    pub inputs: Vec<ColumnSpec>,
}

/// Target representation for a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    Float32,
    Int32,
    Passthrough,
}

impl DeclaredType {
    pub fn from_type_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("double") || name.contains("float") {
            DeclaredType::Float32
        } else if name.contains("int") {
            DeclaredType::Int32
        } else {
            DeclaredType::Passthrough
        }
    }
}

impl InputSchema {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            inputs: serde_json::from_str(raw)?,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inputs.iter().any(|c| c.name == name)
    }

    /// Convert declared columns of `frame` in place
    pub fn coerce(&self, frame: &mut Frame) {
        for spec in &self.inputs {
            let target = DeclaredType::from_type_name(&spec.dtype);
            if target == DeclaredType::Passthrough {
                continue;
            }
            let Some(column) = frame.column_mut(&spec.name) else {
                continue;
            };
            match convert_column(&column.values, target) {
                Ok(values) => column.values = values,
                Err(e) => {
                    tracing::warn!("Conversion failed on {} to {:?}: {}", spec.name, target, e);
                }
            }
        }
    }
}

fn convert_column(values: &[Value], target: DeclaredType) -> Result<Vec<Value>, String> {
    values
        .iter()
        .map(|v| match target {
            DeclaredType::Float32 => to_float32(v),
            DeclaredType::Int32 => to_int32(v),
            DeclaredType::Passthrough => Ok(v.clone()),
        })
        .collect()
}

fn to_float32(value: &Value) -> Result<Value, String> {
    match value {
        Value::Text(s) => s
            .trim()
            .parse::<f32>()
            .map(Value::Float32)
            .map_err(|_| format!("could not convert string to float: '{}'", s)),
        other => other
            .as_f64()
            .map(|v| Value::Float32(v as f32))
            .ok_or_else(|| format!("unsupported value {:?}", other)),
    }
}

fn to_int32(value: &Value) -> Result<Value, String> {
    let wide: f64 = match value {
        Value::Null => return Err("cannot convert missing values to integer".to_string()),
        Value::Text(s) => {
            return s
                .trim()
                .parse::<i32>()
                .map(Value::Int32)
                .map_err(|_| format!("invalid literal for int: '{}'", s));
        }
        Value::Int(v) => {
            return i32::try_from(*v)
                .map(Value::Int32)
                .map_err(|_| format!("{} does not fit in int32", v));
        }
        other => other.as_f64().unwrap_or(f64::NAN),
    };
    if !wide.is_finite() {
        return Err("cannot convert non-finite values (NA or inf) to integer".to_string());
    }
    let truncated = wide.trunc();
    if truncated < i32::MIN as f64 || truncated > i32::MAX as f64 {
        return Err(format!("{} does not fit in int32", wide));
    }
    Ok(Value::Int32(truncated as i32))
}

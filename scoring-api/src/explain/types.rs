use ndarray::Array2;

/// Attribution values as returned by the explainer
///
/// Single-output models give one `rows x features` matrix, multi-output
/// models one matrix per class.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapOutput {
    Single(Array2<f64>),
    PerClass(Vec<Array2<f64>>),
}

impl ShapOutput {
    /// Matrix of the positive class of a binary model
    pub fn positive_class(self) -> Option<Array2<f64>> {
        match self {
            ShapOutput::Single(values) => Some(values),
            ShapOutput::PerClass(mut per_class) if per_class.len() == 2 => per_class.pop(),
            ShapOutput::PerClass(_) => None,
        }
    }
}

/// Baseline model output
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedValue {
    Single(f64),
    PerClass(Vec<f64>),
}

impl ExpectedValue {
    pub fn positive_class(&self) -> Option<f64> {
        match self {
            ExpectedValue::Single(v) => Some(*v),
            ExpectedValue::PerClass(values) if values.len() == 2 => Some(values[1]),
            ExpectedValue::PerClass(_) => None,
        }
    }
}

//! Predictor name resolution.
//!
//! A model lists its predictors as [`PredictorSpec`]s. Each grid cell
//! resolves them into concrete column names, since names such as
//! `temperature_d+{horizon}` change from one horizon to the next.

use std::fmt;
use std::sync::Arc;

use super::grid::GridError;

/// Values a predictor spec may depend on.
#[derive(Debug, Clone, Copy)]
pub struct PredictorScope<'a> {
    pub hour: u32,
    pub horizon: usize,
    pub day_in_testing_period: usize,
    pub dataset_offset: usize,
    pub training_window: usize,
    /// Base target column name, without the `_d+h` suffix.
    pub target: &'a str,
}

impl PredictorScope<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "hour" => Some(self.hour.to_string()),
            "horizon" => Some(self.horizon.to_string()),
            "day" => Some(self.day_in_testing_period.to_string()),
            "offset" => Some(self.dataset_offset.to_string()),
            "window" => Some(self.training_window.to_string()),
            "target" => Some(self.target.to_string()),
            _ => None,
        }
    }
}

type ComputeFn = dyn Fn(&PredictorScope<'_>) -> Vec<String> + Send + Sync;

/// One entry of a model's predictor list.
#[derive(Clone)]
pub enum PredictorSpec {
    /// A column name used as is.
    Literal(String),
    /// A name with `{key}` placeholders, e.g. `load_d-{horizon}`.
    Template(String),
    /// A function of the cell returning one or more names.
    Computed(Arc<ComputeFn>),
}

impl PredictorSpec {
    pub fn literal(name: &str) -> Self {
        Self::Literal(name.to_string())
    }

    pub fn template(pattern: &str) -> Self {
        Self::Template(pattern.to_string())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&PredictorScope<'_>) -> Vec<String> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Resolve into concrete names for one cell.
    pub fn resolve(&self, scope: &PredictorScope<'_>) -> Result<Vec<String>, GridError> {
        match self {
            Self::Literal(name) => Ok(vec![name.clone()]),
            Self::Template(pattern) => Ok(vec![render_template(pattern, scope)?]),
            Self::Computed(f) => Ok(f(scope)),
        }
    }
}

impl fmt::Debug for PredictorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(name) => f.debug_tuple("Literal").field(name).finish(),
            Self::Template(pattern) => f.debug_tuple("Template").field(pattern).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Strings containing `{` are templates, everything else is a literal.
impl From<&str> for PredictorSpec {
    fn from(value: &str) -> Self {
        if value.contains('{') {
            Self::template(value)
        } else {
            Self::literal(value)
        }
    }
}

impl From<String> for PredictorSpec {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Resolve a whole predictor list, keeping order and duplicates.
pub fn resolve_all(
    specs: &[PredictorSpec],
    scope: &PredictorScope<'_>,
) -> Result<Vec<String>, GridError> {
    let mut names = Vec::with_capacity(specs.len());
    for spec in specs {
        names.extend(spec.resolve(scope)?);
    }
    Ok(names)
}

fn render_template(pattern: &str, scope: &PredictorScope<'_>) -> Result<String, GridError> {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| GridError::UnterminatedPlaceholder(pattern.to_string()))?;
        let key = &after[..close];
        let value = scope.lookup(key).ok_or_else(|| GridError::UnknownPlaceholder {
            pattern: pattern.to_string(),
            token: key.to_string(),
        })?;
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

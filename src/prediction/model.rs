//! Opaque points-model abstraction.
//!
//! The service only ever sees `features -> score`. The shipped
//! implementation is a linear spec loaded from the model registry;
//! training happens elsewhere entirely.

use crate::models::Position;
use crate::prediction::features::Features;
use crate::storage::Database;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub trait PointsModel: Send + Sync {
    fn predict(&self, features: &Features) -> f64;
    fn version(&self) -> &str;
}

/// Dot-product model over named feature columns.
pub struct LinearModel {
    version: String,
    intercept: f64,
    coefficients: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct LinearSpec {
    #[serde(default)]
    intercept: f64,
    coefficients: HashMap<String, f64>,
}

impl LinearModel {
    pub fn new(version: impl Into<String>, intercept: f64, coefficients: HashMap<String, f64>) -> Self {
        Self {
            version: version.into(),
            intercept,
            coefficients,
        }
    }

    pub fn from_spec(version: &str, spec: &serde_json::Value) -> Result<Self> {
        let spec: LinearSpec =
            serde_json::from_value(spec.clone()).context("malformed linear model spec")?;
        Ok(Self {
            version: version.to_string(),
            intercept: spec.intercept,
            coefficients: spec.coefficients,
        })
    }
}

impl PointsModel for LinearModel {
    fn predict(&self, features: &Features) -> f64 {
        let score = self.intercept
            + self
                .coefficients
                .iter()
                .map(|(column, coefficient)| coefficient * features.get(column))
                .sum::<f64>();
        score.max(0.0)
    }

    fn version(&self) -> &str {
        &self.version
    }
}

pub type ModelSet = HashMap<Position, Arc<dyn PointsModel>>;

/// Load the active model per position from the registry. Positions
/// without an active registered model are simply absent; the prediction
/// service falls back to the form heuristic for them.
pub fn load_from_registry(db: &Database) -> ModelSet {
    let mut models: ModelSet = HashMap::new();
    for position in Position::ALL {
        match db.active_model_spec("linear", "xp", position) {
            Ok(Some((version, spec))) => match LinearModel::from_spec(&version, &spec) {
                Ok(model) => {
                    debug!("Loaded {} model {version}", position.short_name());
                    models.insert(position, Arc::new(model));
                }
                Err(e) => {
                    info!("Skipping {} model {version}: {e:#}", position.short_name());
                }
            },
            _ => {}
        }
    }
    info!("Model registry: {} of 4 positions covered", models.len());
    models
}

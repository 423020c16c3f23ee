//! CLI command implementations.

pub mod fetch;
pub mod inspect;
pub mod model;

use faultline_store::Model;
use std::path::Path;

/// Loads and validates a JSON model file.
pub fn load_model(path: &Path) -> Result<Model, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read model {}: {e}", path.display()))?;
    let model = Model::from_json(&json)?;
    model.validate()?;
    Ok(model)
}

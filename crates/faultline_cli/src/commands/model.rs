//! Model command implementation.

use faultline_store::Model;
use serde::Serialize;
use std::path::Path;

/// Summary of one entity.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Entity name.
    pub name: String,
    /// Attribute names with their types.
    pub attributes: Vec<String>,
    /// Relationship names with their destinations.
    pub relationships: Vec<String>,
}

/// Summarizes every entity in a model.
pub fn summarize(model: &Model) -> Vec<EntitySummary> {
    model
        .entities
        .iter()
        .map(|entity| EntitySummary {
            name: entity.name.clone(),
            attributes: entity
                .attributes
                .iter()
                .map(|a| {
                    let optional = if a.optional { "?" } else { "" };
                    format!("{}: {}{optional}", a.name, a.kind)
                })
                .collect(),
            relationships: entity
                .relationships
                .iter()
                .map(|r| {
                    if r.is_to_many() {
                        format!("{} -> [{}]", r.name, r.destination)
                    } else {
                        format!("{} -> {}", r.name, r.destination)
                    }
                })
                .collect(),
        })
        .collect()
}

/// Runs the model command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let model = super::load_model(path)?;
    let summary = summarize(&model);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => {
            println!("Model {} is valid", path.display());
            println!("Entities: {}", summary.len());
            for entity in &summary {
                println!();
                println!("  {}", entity.name);
                for attribute in &entity.attributes {
                    println!("    {attribute}");
                }
                for relationship in &entity.relationships {
                    println!("    {relationship}");
                }
            }
        }
    }

    Ok(())
}

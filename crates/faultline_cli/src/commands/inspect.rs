//! Inspect command implementation.

use faultline_store::Database;
use serde::Serialize;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Snapshot file size in bytes.
    pub size: u64,
    /// Commit sequence the snapshot was taken at.
    pub sequence: u64,
    /// Total number of objects.
    pub object_count: usize,
    /// Objects with a remote identifier.
    pub bound_count: usize,
    /// Per-entity statistics.
    pub entities: Vec<EntityStats>,
}

/// Statistics for a single entity.
#[derive(Debug, Serialize)]
pub struct EntityStats {
    /// Entity name.
    pub name: String,
    /// Number of objects.
    pub object_count: usize,
    /// Objects that have no attributes loaded yet.
    pub shell_count: usize,
}

/// Inspects a snapshot opened against a model.
pub fn inspect(
    model_path: &Path,
    snapshot: &Path,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !snapshot.exists() {
        return Err(format!("No snapshot found at {}", snapshot.display()).into());
    }
    let model = super::load_model(model_path)?;
    let names: Vec<String> = model.entities.iter().map(|e| e.name.clone()).collect();
    let db = Database::open_from(model, snapshot)?;

    let mut result = InspectResult {
        path: snapshot.display().to_string(),
        size: std::fs::metadata(snapshot)?.len(),
        sequence: db.committed_seq().as_u64(),
        object_count: db.len(),
        bound_count: 0,
        entities: Vec::new(),
    };
    for name in names {
        let rows = db.list(&name)?;
        result.bound_count += rows.iter().filter(|(_, r)| r.resource_id.is_some()).count();
        result.entities.push(EntityStats {
            object_count: rows.len(),
            shell_count: rows.iter().filter(|(_, r)| r.is_shell()).count(),
            name,
        });
    }
    Ok(result)
}

/// Runs the inspect command.
pub fn run(
    model_path: &Path,
    snapshot: &Path,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(model_path, snapshot)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Snapshot: {}", result.path);
    println!();
    println!("Size:       {} bytes", result.size);
    println!("Sequence:   {}", result.sequence);
    println!("Objects:    {}", result.object_count);
    println!("  bound:    {}", result.bound_count);
    println!();
    println!("  {:<24} {:>8} {:>8}", "Entity", "Objects", "Shells");
    for entity in &result.entities {
        println!(
            "  {:<24} {:>8} {:>8}",
            entity.name, entity.object_count, entity.shell_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_store::{AttributeType, EntitySchema, Model, ObjectRecord};

    #[test]
    fn counts_objects_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::new()
            .with_entity(EntitySchema::new("Post").with_attribute("title", AttributeType::Text))
            .with_entity(EntitySchema::new("Tag"));
        let model_path = dir.path().join("model.json");
        std::fs::write(&model_path, model.to_json().unwrap()).unwrap();

        let db = Database::open_in_memory(model).unwrap();
        db.transaction(|txn| {
            let mut post = ObjectRecord::new("Post");
            post.resource_id = Some("1".into());
            post.set_attribute("title", "Hello".into());
            txn.insert(post)?;
            txn.insert(ObjectRecord::shell("Post", "2"))?;
            Ok::<_, faultline_store::StoreError>(())
        })
        .unwrap();
        let snapshot = dir.path().join("cache.snap");
        db.save_to(&snapshot).unwrap();

        let result = inspect(&model_path, &snapshot).unwrap();
        assert_eq!(result.object_count, 2);
        assert_eq!(result.bound_count, 2);
        assert_eq!(result.entities[0].object_count, 2);
        assert_eq!(result.entities[0].shell_count, 1);
        assert_eq!(result.entities[1].object_count, 0);
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = inspect(&dir.path().join("model.json"), &dir.path().join("none.snap"));
        assert!(err.is_err());
    }
}

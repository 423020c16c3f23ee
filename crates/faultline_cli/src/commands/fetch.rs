//! Fetch command implementation.

use faultline_codec::to_json;
use faultline_engine::{
    Context, HttpConfig, HttpTransport, IncrementalStore, Query, RestClient, RetryConfig,
    StoreConfig,
};
use faultline_store::{Database, ObjectId, ObjectRecord, RelationshipValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Options of the fetch command.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Model file.
    pub model: PathBuf,
    /// API base URL.
    pub base_url: String,
    /// Entity to fetch.
    pub entity: String,
    /// Remote identifier of a single object.
    pub id: Option<String>,
    /// Relationship of that object to fetch instead of its attributes.
    pub relationship: Option<String>,
    /// Maximum number of query results.
    pub limit: Option<usize>,
    /// Snapshot file loaded before and saved after the fetch.
    pub snapshot: Option<PathBuf>,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Maximum attempts per request.
    pub retries: u32,
}

/// A fetched object as printed by the command.
#[derive(Debug, Serialize)]
pub struct ObjectView {
    /// Local object ID.
    pub id: String,
    /// Entity name.
    pub entity: String,
    /// Remote identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Attribute values.
    pub attributes: serde_json::Value,
    /// Relationship targets by local object ID.
    pub relationships: BTreeMap<String, serde_json::Value>,
}

impl ObjectView {
    /// Renders a record.
    pub fn new(id: ObjectId, record: &ObjectRecord) -> Self {
        let relationships = record
            .relationships
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    RelationshipValue::ToOne(target) => target
                        .map(|t| serde_json::Value::String(t.to_string()))
                        .unwrap_or(serde_json::Value::Null),
                    RelationshipValue::ToMany(targets) => serde_json::Value::Array(
                        targets
                            .iter()
                            .map(|t| serde_json::Value::String(t.to_string()))
                            .collect(),
                    ),
                };
                (name.clone(), json)
            })
            .collect();
        Self {
            id: id.to_string(),
            entity: record.entity.clone(),
            resource_id: record.resource_id.clone(),
            attributes: to_json(&record.attributes_value()),
            relationships,
        }
    }
}

/// Runs the fetch command.
pub fn run(options: FetchOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let views = runtime.block_on(fetch(&options))?;
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

/// Fetches through the engine and returns the merged objects.
pub async fn fetch(options: &FetchOptions) -> Result<Vec<ObjectView>, Box<dyn std::error::Error>> {
    let model = Arc::new(super::load_model(&options.model)?);
    let db = match &options.snapshot {
        Some(path) if path.exists() => Database::open_from(Arc::clone(&model), path)?,
        _ => Database::open_in_memory(Arc::clone(&model))?,
    };

    let http = HttpConfig::new(&options.base_url)
        .with_timeout(Duration::from_secs(options.timeout))
        .with_retry(RetryConfig::new(options.retries));
    let store = IncrementalStore::with_database(
        StoreConfig::new("rest", Arc::clone(&model)),
        Arc::new(db),
        RestClient::new(model),
        HttpTransport::new(http)?,
    )?;

    let mut context = Context::new().with_label("cli");
    if let Some(token) = &options.token {
        context = context.with_header("Authorization", format!("Bearer {token}"));
    }

    let ids = match (&options.id, &options.relationship) {
        (Some(id), Some(relationship)) => {
            let object = store.resolve_object(&options.entity, id)?;
            store
                .relationship(object, relationship, &context)
                .await?
                .targets()
                .collect()
        }
        (Some(id), None) => {
            let object = store.resolve_object(&options.entity, id)?;
            store.object_attributes(object, &context).await?;
            vec![object]
        }
        (None, Some(_)) => return Err("--relationship requires --id".into()),
        (None, None) => {
            let mut query = Query::new(&options.entity);
            if let Some(limit) = options.limit {
                query = query.with_limit(limit);
            }
            store.execute_query(query, &context).await?
        }
    };

    let mut views = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = store.object(id)? {
            views.push(ObjectView::new(id, &record));
        }
    }

    if let Some(path) = &options.snapshot {
        save_snapshot(store.database(), path)?;
    }
    tracing::info!(
        objects = views.len(),
        requests = store.stats().dispatched,
        "fetch complete"
    );
    Ok(views)
}

fn save_snapshot(db: &Database, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    db.save_to(path)?;
    tracing::debug!(path = %path.display(), objects = db.len(), "snapshot written");
    Ok(())
}

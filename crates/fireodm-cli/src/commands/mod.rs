pub mod config;
pub mod document;
pub mod schema;

pub use document::{
    delete_document, get_document, list_documents, save_document, validate_document,
    DocumentInput,
};
pub use schema::{check_schema, show_schema};

use anyhow::{Context, Result};
use fireodm_core::schema::load_registry;
use fireodm_core::storage::SqliteDriver;
use fireodm_core::SchemaRegistry;
use fireodm_runtime::{Config, Odm};

/// Load the schema file named by the configuration.
pub fn load_schema(config: &Config) -> Result<SchemaRegistry> {
    load_registry(&config.schema_path).with_context(|| {
        format!(
            "Failed to load schema from {} (use --schema or FIREODM_SCHEMA_PATH)",
            config.schema_path.display()
        )
    })
}

/// Open the configured database behind a mapper for the configured schema.
pub fn open_odm(config: &Config) -> Result<Odm> {
    let registry = load_schema(config)?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let driver = SqliteDriver::open(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;

    Ok(Odm::builder(registry)
        .driver(driver)
        .settings(config.settings())
        .build()?)
}

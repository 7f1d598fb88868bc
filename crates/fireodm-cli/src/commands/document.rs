use anyhow::{Context, Result};
use fireodm_core::validation::{validate_document as validate, ValidationResult};
use fireodm_core::Document;
use fireodm_runtime::{Config, Filter, OnMissing, PopulateOptions};
use serde_json::Value as JsonValue;
use std::io::Read;
use std::path::PathBuf;

use super::{load_schema, open_odm};

/// Where a document's JSON comes from. Stdin is read when neither flag is
/// given.
#[derive(Debug, clap::Args)]
pub struct DocumentInput {
    /// Inline JSON object
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// File containing a JSON object
    #[arg(long)]
    file: Option<PathBuf>,
}

impl DocumentInput {
    fn read(&self) -> Result<JsonValue> {
        let text = match (&self.json, &self.file) {
            (Some(json), _) => json.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read document from stdin")?;
                buf
            }
        };
        serde_json::from_str(&text).context("Document is not valid JSON")
    }
}

pub fn validate_document(config: &Config, model: &str, input: &DocumentInput) -> Result<()> {
    let registry = load_schema(config)?;
    let doc = Document::from_json(registry.lookup(model)?, &input.read()?)?;

    match validate(&doc) {
        ValidationResult::Valid(normalized) => {
            println!("✓ valid {model}");
            println!("{}", serde_json::to_string_pretty(&normalized.to_json())?);
            Ok(())
        }
        ValidationResult::Invalid(violations) => {
            for violation in &violations {
                println!("✗ {violation}");
            }
            anyhow::bail!("{model} document has {} violation(s)", violations.len())
        }
    }
}

pub async fn save_document(config: &Config, model: &str, input: &DocumentInput) -> Result<()> {
    let odm = open_odm(config)?;
    let mut doc = odm.create_from_json(model, &input.read()?)?;
    odm.save(&mut doc).await?;
    println!("{}", serde_json::to_string_pretty(&doc.to_json())?);
    Ok(())
}

pub async fn get_document(
    config: &Config,
    model: &str,
    id: &str,
    populate: &[String],
    depth: Option<usize>,
    fail_on_missing: bool,
) -> Result<()> {
    let odm = open_odm(config)?;
    let mut doc = odm.get(model, id).await?;

    if !populate.is_empty() {
        let options = populate_options(odm.settings().populate, depth, fail_on_missing);
        let paths: Vec<&str> = populate.iter().map(String::as_str).collect();
        odm.populate(&mut doc, &paths, Some(options)).await?;
    }

    println!("{}", serde_json::to_string_pretty(&doc.to_json())?);
    Ok(())
}

fn populate_options(
    defaults: PopulateOptions,
    depth: Option<usize>,
    fail_on_missing: bool,
) -> PopulateOptions {
    let options = depth.map_or(defaults, |depth| defaults.with_max_depth(depth));
    if fail_on_missing {
        options.with_on_missing(OnMissing::Fail)
    } else {
        options
    }
}

pub async fn list_documents(config: &Config, model: &str, conditions: &[String]) -> Result<()> {
    let filter = conditions
        .iter()
        .try_fold(Filter::new(), |filter, expr| filter.condition(expr))?;

    let odm = open_odm(config)?;
    let docs = odm.find_where(model, &filter).await?;
    let rendered: Vec<JsonValue> = docs.iter().map(Document::to_json).collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    log::info!("{} {model} document(s)", docs.len());
    Ok(())
}

pub async fn delete_document(config: &Config, model: &str, id: &str) -> Result<()> {
    let odm = open_odm(config)?;
    if odm.delete_by_id(model, id).await? {
        println!("✓ deleted {model} {id}");
        Ok(())
    } else {
        anyhow::bail!("{model} {id} does not exist")
    }
}

use anyhow::Result;
use fireodm_core::{FieldDescriptor, FieldKind, ModelDescriptor, SchemaRegistry};

use super::load_schema;
use fireodm_runtime::Config;

/// Print every model (or one model) of the schema file.
pub fn show_schema(config: &Config, model: Option<&str>) -> Result<()> {
    let registry = load_schema(config)?;

    match model {
        Some(id) => print!("{}", render_model(&*registry.lookup(id)?)),
        None => {
            println!("Schema: {}", config.schema_path.display());
            println!("Models: {}\n", registry.len());
            for model in registry.models() {
                println!("{}", render_model(model));
            }
        }
    }
    Ok(())
}

/// Verify that every relation points at a declared model.
pub fn check_schema(config: &Config) -> Result<()> {
    let registry = load_schema(config)?;
    let dangling = registry.dangling_relations();

    if dangling.is_empty() {
        println!(
            "✓ {} models, {} relations, all targets declared",
            registry.len(),
            relation_count(&registry)
        );
        return Ok(());
    }

    for (model, field, target) in &dangling {
        println!("✗ {model}.{field} -> {target} (not declared)");
    }
    anyhow::bail!("{} dangling relation(s)", dangling.len())
}

fn relation_count(registry: &SchemaRegistry) -> usize {
    registry.models().map(|m| m.relations().count()).sum()
}

fn render_model(model: &ModelDescriptor) -> String {
    let strict = if model.is_strict() { " [strict]" } else { "" };
    let mut lines = vec![format!(
        "{} (collection: {}){strict}",
        model.id(),
        model.collection()
    )];
    render_fields(&mut lines, model.fields(), 1);
    lines.extend(model.rules().iter().map(|rule| format!("  rule: {}", rule.name())));
    lines.push(String::new());
    lines.join("\n")
}

fn render_fields(lines: &mut Vec<String>, fields: &[FieldDescriptor], indent: usize) {
    let pad = "  ".repeat(indent);
    for field in fields {
        let mut line = format!("{pad}{:<16} {}", field.name(), field.kind());
        if field.is_required() {
            line.push_str(" required");
        }
        if let Some(default) = field.default_value() {
            line = format!("{line} default={}", default.to_json());
        }
        if !field.rules().is_empty() {
            let names: Vec<&str> = field.rules().iter().map(|r| r.name()).collect();
            line = format!("{line} [{}]", names.join(", "));
        }
        lines.push(line);
        if let FieldKind::Nested(children) = field.kind() {
            render_fields(lines, children, indent + 1);
        }
    }
}

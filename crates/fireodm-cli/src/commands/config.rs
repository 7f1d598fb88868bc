use anyhow::Result;
use fireodm_runtime::config::{self, Config};

/// Show the current effective configuration.
pub fn show_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config::config_file_path().display());

    let exists = config::config_file_path().exists();
    println!(
        "File exists: {}\n",
        if exists { "yes" } else { "no (using defaults)" }
    );

    println!("Settings:");
    println!("  database_path: {}", config.database_path.display());
    println!("  schema_path: {}", config.schema_path.display());
    println!("  storage_timeout_ms: {}", config.storage_timeout_ms);
    println!("  populate_max_depth: {}", config.populate_max_depth);
    println!("  populate_on_missing: {}", config.populate_on_missing);
    println!("  on_codec_error: {:?}", config.on_codec_error);
    println!("  log_level: {}", config.log_level);

    println!("\nPriority: CLI args > ENV vars (FIREODM_*) > Config file > Defaults");
}

pub fn show_path() {
    println!("{}", config::config_file_path().display());
}

/// Write the example config file unless one already exists.
pub fn init_config() -> Result<()> {
    let path = config::config_file_path();
    if config::ensure_config_file()? {
        println!("✓ Created {}", path.display());
    } else {
        println!("Config file already exists: {}", path.display());
    }
    Ok(())
}

pub fn show_example() {
    print!("{}", config::example_config());
}

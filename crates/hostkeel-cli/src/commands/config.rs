use super::{json_pretty, load_config, EXIT_SUCCESS};
use std::path::Path;

pub fn run(config_path: Option<&Path>, json_output: bool) -> Result<u8, String> {
    let (config, source) = load_config(config_path)?;
    if json_output {
        let value = serde_json::json!({
            "source": source,
            "config": config,
        });
        println!("{}", json_pretty(&value)?);
    } else {
        match &source {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# built-in defaults"),
        }
        print!("{}", config.to_toml_string().map_err(|e| e.to_string())?);
    }
    Ok(EXIT_SUCCESS)
}

use anyhow::Result;
use std::path::Path;
use zserve_core::Config;

pub fn execute(config: &Config, path: Option<&Path>, key: Option<&str>) -> Result<()> {
    match key {
        Some(key) => println!("{}", config.get(key)?),
        None => {
            let source = match path {
                Some(path) => path.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("# Configuration file: {:?}\n", source);

            let mut shown = config.clone();
            if shown.model.hf_token.is_some() {
                shown.model.hf_token = Some("***".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
        }
    }
    Ok(())
}

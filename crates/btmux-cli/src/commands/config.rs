use std::path::PathBuf;

use anyhow::Result;
use btmux_core::config::ConfigService;
use btmux_types::DeviceClass;
use strum::IntoEnumIterator;

/// Prints the resolved configuration as TOML, defaults included, followed
/// by the admission priority each device class resolves to.
pub fn show(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| PathBuf::from("btmux.toml"));
    let config = ConfigService::new(&path).get_config();

    println!("# resolved from {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);

    println!("\n# resolved priorities (profile '{}')", config.active_profile);
    for class in DeviceClass::iter() {
        println!("# {:<15} -> {}", class.to_string(), config.resolve_priority(class));
    }
    Ok(())
}

use std::fs;

use flashbake_config::Config;
use tracing::*;

use crate::{
    args::{apply_override, parse_override, Args},
    errors::{ConfigError, InitError},
};

/// Loads the config file and applies the overrides given on the command
/// line. Values passed as arguments take precedence over the file.
pub fn get_config(args: &Args) -> Result<Config, InitError> {
    let config_str = fs::read_to_string(&args.config)?;
    let config = load_configuration(&config_str, &args.get_overrides())?;
    debug!(path = %args.config.display(), "loaded config");
    Ok(config)
}

fn load_configuration(config_str: &str, overrides: &[String]) -> Result<Config, ConfigError> {
    let mut value: toml::Value = toml::from_str(config_str)?;
    let table = value.as_table_mut().ok_or(ConfigError::NotATable)?;

    for ov in overrides {
        let (path, val) = parse_override(ov)?;
        apply_override(&path, val, table)?;
    }

    Ok(value.try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_before_deserializing() {
        let config = load_configuration(
            "[tezos]\nrpc_url = \"http://localhost:8732\"\n",
            &["relay.port=9999".to_string()],
        )
        .unwrap();
        assert_eq!(config.relay.port, 9999);
        assert_eq!(config.tezos.rpc_url, "http://localhost:8732");
    }

    #[test]
    fn missing_node_section_is_an_error() {
        let err = load_configuration("[relay]\nport = 1\n", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

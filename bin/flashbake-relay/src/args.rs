use std::path::PathBuf;

use argh::FromArgs;
use toml::value::Table;

use crate::errors::ConfigError;

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "Flashbake relay")]
pub struct Args {
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: PathBuf,

    /// Node RPC url that will override the one in the config toml.
    #[argh(option, description = "tezos node rpc url")]
    pub rpc_url: Option<String>,

    /// Host the relay http server will listen on.
    #[argh(option, description = "relay host")]
    pub host: Option<String>,

    /// Port the relay http server will listen on.
    #[argh(option, short = 'p', description = "relay port")]
    pub port: Option<u16>,

    /// Other generic overrides to the config toml.
    /// Will be used, for example, as `-o rights.window_lead=3 -o bundles.expiration_secs=600`
    #[argh(option, short = 'o', description = "generic config overrides")]
    pub overrides: Vec<String>,
}

impl Args {
    /// Get strings of overrides gathered from args.
    pub fn get_overrides(&self) -> Vec<String> {
        let mut overrides = self.overrides.clone();
        overrides.extend(self.get_direct_overrides());
        overrides
    }

    /// Overrides passed directly as args and not as overrides.
    fn get_direct_overrides(&self) -> Vec<String> {
        let mut overrides = Vec::new();
        if let Some(rpc_url) = &self.rpc_url {
            overrides.push(format!("tezos.rpc_url={rpc_url}"));
        }
        if let Some(host) = &self.host {
            overrides.push(format!("relay.host={host}"));
        }
        if let Some(port) = &self.port {
            overrides.push(format!("relay.port={port}"));
        }
        overrides
    }
}

type Override = (String, toml::Value);

/// Parses an override. This first splits the string by '=' to get key and
/// value and then splits the key by '.' which is the update path.
pub fn parse_override(override_str: &str) -> Result<Override, ConfigError> {
    let (key, value_str) = override_str
        .split_once('=')
        .ok_or(ConfigError::InvalidOverride(override_str.to_string()))?;
    Ok((key.to_string(), parse_value(value_str)))
}

/// Apply override to config.
///
/// Sections left out of the file take their defaults, so a missing
/// intermediate table is created rather than rejected.
pub fn apply_override(
    path: &str,
    value: toml::Value,
    table: &mut Table,
) -> Result<(), ConfigError> {
    match path.split_once('.') {
        None => {
            table.insert(path.to_string(), value);
            Ok(())
        }
        Some((key, rest)) => {
            let entry = table
                .entry(key.to_string())
                .or_insert_with(|| toml::Value::Table(Table::new()));
            match entry.as_table_mut() {
                Some(t) => apply_override(rest, value, t),
                None => Err(ConfigError::TraverseNonTableAt(key.to_string())),
            }
        }
    }
}

/// Parses a string into a toml value. First tries as `i64`, then as `bool` and then defaults to
/// `String`.
fn parse_value(str_value: &str) -> toml::Value {
    str_value
        .parse::<i64>()
        .map(toml::Value::Integer)
        .or_else(|_| str_value.parse::<bool>().map(toml::Value::Boolean))
        .unwrap_or_else(|_| toml::Value::String(str_value.to_string()))
}

#[cfg(test)]
mod test {
    use flashbake_config::{Config, WindowSource};

    use super::*;

    #[test]
    fn test_apply_override() {
        let mut toml: toml::Value = toml::from_str(
            r#"
            [tezos]
            rpc_url = "http://localhost:8732"

            [rights]
            max_round = 0
            "#,
        )
        .unwrap();
        let table = toml.as_table_mut().unwrap();
        let args = Args {
            config: "config_path".into(),
            rpc_url: Some("http://node:8732".to_string()),
            host: None,
            port: Some(9000),
            overrides: vec![
                "rights.window_lead=3".to_string(),
                "rights.window_source=cycle".to_string(),
                "bundles.expiration_secs=600".to_string(),
                "monitor.prefill_concurrency=5".to_string(),
            ],
        };

        for (path, val) in args
            .get_overrides()
            .into_iter()
            .map(|x| parse_override(&x).unwrap())
        {
            apply_override(&path, val, table).unwrap();
        }

        let config: Config = toml.try_into().unwrap();
        assert_eq!(config.tezos.rpc_url, "http://node:8732");
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.relay.host, "0.0.0.0");
        assert_eq!(config.rights.window_lead, 3);
        assert_eq!(config.rights.window_source, WindowSource::Cycle);
        assert_eq!(config.bundles.expiration_secs, 600);
        assert_eq!(config.monitor.prefill_concurrency, 5);
    }

    #[test]
    fn rejects_bad_overrides() {
        assert!(matches!(
            parse_override("no_equals_sign"),
            Err(ConfigError::InvalidOverride(_))
        ));

        let mut table = Table::new();
        table.insert("tezos".into(), toml::Value::Integer(1));
        let (path, val) = parse_override("tezos.rpc_url=http://x").unwrap();
        assert!(matches!(
            apply_override(&path, val, &mut table),
            Err(ConfigError::TraverseNonTableAt(k)) if k == "tezos"
        ));
    }
}

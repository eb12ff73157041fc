/// Connection settings
///
/// Each setting comes from the provider variables when present, otherwise from the
/// `ESXI_*` environment (a `.env` file included), otherwise from its default.

use common::models::ConnectionInfo;
use common::{Error, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;

const VARIABLE_PREFIX: &str = "esxi-native:config:";

/// Provider variable name and settings key for every overridable setting.
const VARIABLES: [(&str, &str); 6] = [
    ("host", "host"),
    ("username", "username"),
    ("password", "password"),
    ("sshPort", "ssh_port"),
    ("sslPort", "ssl_port"),
    ("ovfToolLocation", "ovftool_location"),
];

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    host: String,
    username: String,
    #[serde(default)]
    password: String,
    ssh_port: u16,
    ssl_port: u16,
    ovftool_location: String,
}

pub struct ProviderConfig;

impl ProviderConfig {
    /// Resolve the connection details from `vars`, keyed `esxi-native:config:{name}`.
    pub fn load(vars: &HashMap<String, String>) -> Result<ConnectionInfo> {
        dotenvy::dotenv().ok();
        Self::build(vars, Environment::with_prefix("ESXI").try_parsing(true))
    }

    fn build(vars: &HashMap<String, String>, environment: Environment) -> Result<ConnectionInfo> {
        let mut builder = Config::builder()
            .set_default("username", "root")
            .and_then(|b| b.set_default("ssh_port", 22))
            .and_then(|b| b.set_default("ssl_port", 443))
            .and_then(|b| b.set_default("ovftool_location", "ovftool"))
            .map_err(config_error)?
            .add_source(environment);

        for (variable, key) in VARIABLES {
            let value = vars
                .get(&format!("{}{}", VARIABLE_PREFIX, variable))
                .filter(|v| !v.is_empty())
                .cloned();
            builder = builder.set_override_option(key, value).map_err(config_error)?;
        }

        let settings: Settings = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)?;

        if settings.host.is_empty() {
            return Err(Error::Config(format!(
                "the esxi host is not set; use {}host or ESXI_HOST",
                VARIABLE_PREFIX
            )));
        }

        Ok(ConnectionInfo {
            host: settings.host,
            ssh_port: settings.ssh_port,
            ssl_port: settings.ssl_port,
            username: settings.username,
            password: settings.password,
            ovf_tool_location: settings.ovftool_location,
        })
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}

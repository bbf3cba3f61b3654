use std::{net::SocketAddr, path::Path};

use clap::Parser;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};

use crate::pipeline::{self, safety, PipelineSettings};

const DEFAULT_ADDR: &str = "127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Path to the local configuration TOML file. Defaults apply when omitted.
    #[arg(short, value_name = "CONFIG_PATH")]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Web {
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub address: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSettings {
    pub ollama_url: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuerySettings {
    pub max_attempts: u32,
    pub blocked_keywords: Vec<String>,
    pub dialect_directives: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    pub web: Web,
    pub database: DatabaseSettings,
    pub model: ModelSettings,
    pub query: QuerySettings,
}

impl Settings {
    /// Load settings from the given TOML file, with sane defaults.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::<DefaultState>::default()
            .set_default("web.address", DEFAULT_ADDR)?
            .set_default("database.url", "sqlite://data.db")?
            .set_default("model.ollama_url", "http://127.0.0.1:11434")?
            .set_default("model.name", "llama3.1:8b")?
            .set_default("query.max_attempts", i64::from(pipeline::DEFAULT_MAX_ATTEMPTS))?
            .set_default(
                "query.blocked_keywords",
                safety::DEFAULT_BLOCKED_KEYWORDS
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>(),
            )?
            .set_default(
                "query.dialect_directives",
                pipeline::default_dialect_directives(),
            )?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder.build()?.try_deserialize()
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_attempts: self.query.max_attempts,
            policy: safety::SafetyPolicy::new(self.query.blocked_keywords.iter().cloned()),
            dialect_directives: self.query.dialect_directives.clone(),
        }
    }
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

//! CLI entry point for turnstream.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::ImageAttachment;

/// turnstream CLI
#[derive(Parser, Debug)]
#[command(name = "turnstream", version, about = "Streaming conversation client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and stream the reply
    Chat(ChatArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Attach an image (disables streaming)
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the generation endpoint
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Locale for error messages
    #[arg(short, long)]
    pub locale: Option<String>,

    /// User prompt (positional)
    pub prompt: String,
}

/// Arguments for the `config` subcommand.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Resolve configuration for a command: file, then env, then flags.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::from_env(),
    }
}

impl ChatArgs {
    pub fn resolve_config(&self) -> Result<EngineConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(locale) = &self.locale {
            config.locale = locale.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn read_image(&self) -> Result<Option<ImageAttachment>> {
        let Some(path) = &self.image else {
            return Ok(None);
        };
        let mime = mime_for(path).ok_or_else(|| {
            EngineError::Configuration(format!("unsupported image type: {}", path.display()))
        })?;
        let data = std::fs::read(path)?;
        Ok(Some(ImageAttachment::new(data, mime)))
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

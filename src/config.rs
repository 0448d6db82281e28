//! Configuration module for builder settings and per-build options

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Process-level settings shared by every build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Parent directory for per-fetch temporary roots
    pub work_dir: PathBuf,
    /// State directory for the build engine. The pipeline never reads it; callers hand it
    /// to whatever constructs their [`crate::BuildEngine`] so every build shares one store.
    pub state_dir: PathBuf,
    /// Passed to the engine's push call as the "insecure-allowed" flag
    pub insecure_registry: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None).unwrap_or_else(|_| Self {
            work_dir: env::temp_dir(),
            state_dir: PathBuf::from("/tmp/forge"),
            insecure_registry: true,
            verbose: false,
            quiet: false,
        })
    }
}

impl BuilderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let work_dir = lookup("FORGE_WORK_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let state_dir = match lookup("FORGE_STATE_DIR").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_state_dir(&lookup),
        };

        Ok(Self {
            work_dir,
            state_dir,
            insecure_registry: parse_flag(&lookup, "FORGE_INSECURE_REGISTRY", true)?,
            verbose: parse_flag(&lookup, "FORGE_VERBOSE", false)?,
            quiet: parse_flag(&lookup, "FORGE_QUIET", false)?,
        })
    }

    pub fn logger(&self) -> crate::logging::Logger {
        if self.quiet {
            crate::logging::Logger::new_quiet()
        } else {
            crate::logging::Logger::new(self.verbose)
        }
    }
}

fn default_state_dir<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(xdg_data_home) = lookup("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        let first = xdg_data_home.split(':').next().unwrap_or_default();
        return PathBuf::from(first).join("forge");
    }
    if let Some(home) = lookup("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local").join("share").join("forge");
    }
    PathBuf::from("/tmp/forge")
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Configuration(format!(
                "{} must be a boolean, got {:?}",
                key, other
            ))),
        },
    }
}

/// Options for a single image build. Immutable once handed to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// URL of the remote build context archive
    pub context: String,
    #[serde(rename = "registryURL")]
    pub registry_url: String,
    pub image_name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub no_cache: bool,
    /// Maximum image content size in bytes; 0 disables the check
    #[serde(default)]
    pub size_limit: u64,
}

impl BuildOptions {
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Parse a `KEY=VALUE` build argument as given on a command line
    pub fn parse_build_arg(arg: &str) -> Result<(String, String)> {
        let (key, value) = arg.split_once('=').ok_or_else(|| Error::MalformedBuildArg {
            arg: arg.to_string(),
            reason: "expected KEY=VALUE".to_string(),
        })?;
        validate_build_arg_key(arg, key)?;
        Ok((key.to_string(), value.to_string()))
    }
}

/// Keys must be non-empty and free of whitespace, `=` and quotes
pub(crate) fn validate_build_arg_key(arg: &str, key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("empty key")
    } else if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("key contains whitespace")
    } else if key.contains('=') {
        Some("key contains '='")
    } else if key.contains('"') || key.contains('\'') {
        Some("key contains a quote")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::MalformedBuildArg {
            arg: arg.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

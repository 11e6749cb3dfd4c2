use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::data_model::{FunctionDefinition, Route};

/// Directory next to the config file where built function executables land.
pub const RUNTIME_DIR: &str = ".trivet";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
    #[serde(default)]
    pub functions: HashMap<String, FunctionConfig>,
    /// Declaration order is matching order.
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Where the config was loaded from; anchors the runtime directory.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Explicit path to the function's executable. Defaults to the built
    /// output in the runtime directory.
    #[serde(default)]
    pub handler: Option<String>,
    /// Cargo package directory `trivet build` compiles the function from.
    #[serde(default)]
    pub package: Option<String>,
}

fn default_http_addr() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_rpc_addr() -> String {
    "127.0.0.1:9001".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            rpc_addr: default_rpc_addr(),
            functions: HashMap::new(),
            routes: Vec::new(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = Figment::new()
            .merge(Yaml::string(&raw))
            .extract()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.http_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid http address: {}", self.http_addr))?;
        self.rpc_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid rpc address: {}", self.rpc_addr))?;

        for (name, function) in &self.functions {
            if name.is_empty() {
                anyhow::bail!("function names must be non-empty");
            }
            if function.handler.is_none() && function.package.is_none() {
                anyhow::bail!("function {name}: declare a handler path or a package to build");
            }
        }
        for route in &self.routes {
            if !self.functions.contains_key(&route.target) {
                anyhow::bail!(
                    "route {}: target {} is not a declared function",
                    route.route,
                    route.target
                );
            }
        }
        Ok(())
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(RUNTIME_DIR)
    }

    pub fn ensure_runtime_dir(&self) -> Result<PathBuf> {
        let dir = self.runtime_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create runtime dir {}", dir.display()))?;
        Ok(dir)
    }

    /// The executable the runtime launches for a function: the declared
    /// handler path, or the build output named after the function.
    pub fn function_executable(&self, name: &str, function: &FunctionConfig) -> PathBuf {
        match &function.handler {
            Some(handler) => PathBuf::from(handler),
            None => self.runtime_dir().join(name),
        }
    }

    /// Resolved definitions in a deterministic boot order.
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut definitions: Vec<FunctionDefinition> = self
            .functions
            .iter()
            .map(|(name, function)| FunctionDefinition {
                name: name.clone(),
                handler: self.function_executable(name, function),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

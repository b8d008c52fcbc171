//! Configuration management for sysvc.
use regex::{Captures, Regex};
use serde::Deserialize;
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::{CallbackError, ConfigError};

/// User callback invoked by the lifecycle controller.
pub type Callback = Arc<dyn Fn() -> Result<(), CallbackError> + Send + Sync + 'static>;

/// Immutable description of a managed service.
///
/// Built once at process start through [`ServiceConfig::builder`] and handed to the
/// lifecycle controller. Cloning shares the callbacks.
#[derive(Clone)]
pub struct ServiceConfig {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    on_init: Option<Callback>,
    on_start: Option<Callback>,
    on_stop: Option<Callback>,
    on_signal: Option<Callback>,
    pid_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

impl ServiceConfig {
    /// Starts building a configuration for the service identified by `name`.
    pub fn builder(name: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            name: name.into(),
            display_name: None,
            description: None,
            on_init: None,
            on_start: None,
            on_stop: None,
            on_signal: None,
            pid_file: None,
            log_file: None,
        }
    }

    /// Starts building a configuration from a loaded manifest. Callbacks still have to be
    /// supplied in code.
    pub fn from_manifest(manifest: &ServiceManifest) -> ServiceConfigBuilder {
        let mut builder = Self::builder(manifest.name.clone());
        builder.display_name = manifest.display_name.clone();
        builder.description = manifest.description.clone();
        builder.pid_file = manifest.pid_file.clone();
        builder.log_file = manifest.log_file.clone();
        builder
    }

    /// Service identifier used for manager registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name shown by the service manager; falls back to the identifier.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Optional description registered with the service manager.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn on_init(&self) -> Option<&Callback> {
        self.on_init.as_ref()
    }

    pub fn on_start(&self) -> Option<&Callback> {
        self.on_start.as_ref()
    }

    pub fn on_stop(&self) -> Option<&Callback> {
        self.on_stop.as_ref()
    }

    pub fn on_signal(&self) -> Option<&Callback> {
        self.on_signal.as_ref()
    }

    /// File that receives the daemon PID while the service runs.
    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    /// File that receives stdout/stderr once the process detaches.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("description", &self.description)
            .field("on_init", &self.on_init.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .field("on_signal", &self.on_signal.is_some())
            .field("pid_file", &self.pid_file)
            .field("log_file", &self.log_file)
            .finish()
    }
}

/// Builder for [`ServiceConfig`].
pub struct ServiceConfigBuilder {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    on_init: Option<Callback>,
    on_start: Option<Callback>,
    on_stop: Option<Callback>,
    on_signal: Option<Callback>,
    pid_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

impl ServiceConfigBuilder {
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Hook run by the platform bridge before the service reports itself running.
    pub fn on_init<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_init = Some(Arc::new(callback));
        self
    }

    /// Invoked once before the controller blocks.
    pub fn on_start<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(callback));
        self
    }

    /// Invoked once after the controller unblocks.
    pub fn on_stop<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(callback));
        self
    }

    /// Invoked on every reload request, independent of run/stop state.
    pub fn on_signal<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_signal = Some(Arc::new(callback));
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Finalises the configuration.
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        Ok(ServiceConfig {
            name: self.name,
            display_name: self.display_name,
            description: self.description,
            on_init: self.on_init,
            on_start: self.on_start,
            on_stop: self.on_stop,
            on_signal: self.on_signal,
            pid_file: self.pid_file,
            log_file: self.log_file,
        })
    }
}

/// Service metadata loaded from a YAML manifest.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceManifest {
    /// Service identifier.
    pub name: String,
    /// Name displayed by the service manager.
    pub display_name: Option<String>,
    /// Description registered with the service manager.
    pub description: Option<String>,
    /// Optional PID file written in daemon mode.
    pub pid_file: Option<PathBuf>,
    /// Optional log file receiving output in daemon mode.
    pub log_file: Option<PathBuf>,
    /// Directories observed by the filesystem watcher.
    #[serde(default)]
    pub watch: Vec<PathBuf>,
}

/// Expands `$VAR` and `${VAR}` references from the environment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let pattern = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")?;

    let mut missing = None;
    let expanded = pattern.replace_all(input, |caps: &Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingVariable(var_name)),
        None => Ok(expanded.into_owned()),
    }
}

fn resolve(base: &Path, path: &mut Option<PathBuf>) {
    if let Some(candidate) = path.as_mut()
        && candidate.is_relative()
    {
        *candidate = base.join(&*candidate);
    }
}

/// Loads and parses a manifest, expanding environment variables and resolving relative
/// paths against the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<ServiceManifest, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut manifest: ServiceManifest = serde_yaml::from_str(&expanded)?;

    if manifest.name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }

    let base = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let base = base.canonicalize().unwrap_or(base);

    resolve(&base, &mut manifest.pid_file);
    resolve(&base, &mut manifest.log_file);
    for watched in manifest.watch.iter_mut() {
        if watched.is_relative() {
            *watched = base.join(&*watched);
        }
    }

    Ok(manifest)
}

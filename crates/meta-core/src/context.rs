//! Per-invocation `Context`: holds the resolved config, workspace paths,
//! and reporter as one explicit value constructed by the CLI and threaded
//! through every engine call, instead of module-level singletons. This lets
//! tests run many invocations in the same process against independent
//! workspaces and reporters.

use std::path::{Path, PathBuf};

use crate::config::RuntimeOptions;
use crate::reporter::Reporter;

/// Everything an engine call needs that isn't its own explicit arguments:
/// where the workspace lives, the resolved runtime options, and where to
/// send progress lines. Holds no process-global state.
pub struct Context<'a> {
    pub workspace_root: PathBuf,
    pub options: RuntimeOptions,
    pub reporter: &'a mut dyn Reporter,
}

impl<'a> Context<'a> {
    pub fn new(workspace_root: impl Into<PathBuf>, options: RuntimeOptions, reporter: &'a mut dyn Reporter) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            options,
            reporter,
        }
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.options.manifests_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.workspace_root.join(".meta")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.workspace_root.join(".meta-store")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.workspace_root.join(".meta-cache")
    }

    pub fn components_dir(&self) -> PathBuf {
        self.workspace_root.join("components")
    }

    pub fn component_dir(&self, name: &str) -> PathBuf {
        self.components_dir().join(name)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.state_dir().join("conversion-checkpoints")
    }

    pub fn env_or_default<'s>(&'s self, requested: Option<&'s str>) -> &'s str {
        requested.unwrap_or(&self.options.default_env)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}

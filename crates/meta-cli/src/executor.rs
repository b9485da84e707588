//! Concrete [`meta_core::apply::ComponentExecutor`]: materializes one
//! component via the git driver (reference mode) or a direct vendor
//! materialization (vendored mode), then runs its package manager install
//! unless `skip_packages` is set. Owns no `Context`/`Reporter` reference —
//! `ComponentExecutor` must be `Sync` so scoped worker threads can call it
//! concurrently, and `Context` carries a `&mut dyn Reporter` that can't be
//! shared that way. Progress lines go straight to stderr instead, same as
//! the non-tty branch of [`crate::progress::ProgressReporter`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use meta_core::apply::{ComponentAction, ComponentExecutor};
use meta_core::error::{Error, Result};
use meta_core::manifest::{Component, Isolation, Mode};
use meta_core::{git, packagemanager, vendor};

pub struct CliExecutor {
    pub workspace_root: PathBuf,
    pub components_dir: PathBuf,
    pub mode: Mode,
    pub components: BTreeMap<String, Component>,
    pub pins: BTreeMap<String, String>,
    pub skip_packages: bool,
}

impl CliExecutor {
    fn component_dir(&self, name: &str) -> PathBuf {
        self.components_dir.join(name)
    }

    fn materialize_reference(&self, component: &Component, dir: &Path, pin: &str) -> Result<()> {
        if dir.exists() {
            git::fetch(&component.name, dir)?;
            git::checkout(&component.name, dir, pin)?;
        } else {
            git::clone(&component.name, &component.repo, dir)?;
            git::checkout(&component.name, dir, pin)?;
        }
        Ok(())
    }

    fn materialize_vendored(&self, component: &Component, dir: &Path, pin: &str) -> Result<()> {
        let staging = dir.with_extension("vendor-staging");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
        }
        git::clone(&component.name, &component.repo, &staging)?;
        git::checkout(&component.name, &staging, pin)?;

        let hits = vendor::scan_for_secrets(&staging)?;
        if let Some((path, pattern)) = hits.into_iter().next() {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(Error::SecretDetected {
                component: component.name.clone(),
                path,
                pattern,
            });
        }

        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        meta_core::hashing::copy_tree(&staging, dir, false)?;
        std::fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;

        vendor::write_provenance(
            dir,
            &vendor::Provenance {
                component: component.name.clone(),
                repo: component.repo.clone(),
                version: pin.to_string(),
                vendored_at: chrono::Utc::now(),
            },
        )?;
        Ok(())
    }

    fn install_packages(&self, component: &Component, dir: &Path) -> Result<()> {
        if self.skip_packages {
            return Ok(());
        }
        let manager = match packagemanager::detect_package_manager(dir) {
            Some(m) => m,
            None => return Ok(()),
        };
        if !packagemanager::needs_install(dir) {
            return Ok(());
        }

        let install_dir = match component.isolation {
            Isolation::None | Isolation::Container => dir.to_path_buf(),
            Isolation::Venv => {
                let venv_dir = dir.join(".venv");
                if !venv_dir.exists() {
                    let mut cmd = std::process::Command::new("python3");
                    cmd.args(["-m", "venv", ".venv"]).current_dir(dir);
                    let _ = meta_core::process::run_command_with_timeout(cmd, Duration::from_secs(120));
                }
                dir.to_path_buf()
            }
        };

        eprintln!("[info] {}: installing dependencies via {}", component.name, manager.program());
        packagemanager::install(&component.name, manager, &install_dir, Duration::from_secs(600))?;
        Ok(())
    }
}

impl ComponentExecutor for CliExecutor {
    fn execute(&self, component_name: &str, action: ComponentAction) -> Result<()> {
        let component = self
            .components
            .get(component_name)
            .ok_or_else(|| Error::dependency(component_name, "not present in loaded manifest"))?;
        let dir = self.component_dir(component_name);
        let pin = self
            .pins
            .get(component_name)
            .ok_or_else(|| Error::dependency(component_name, "no pin in effective plan"))?;

        eprintln!("[info] {component_name}: {action:?}");

        match action {
            ComponentAction::Noop => {}
            ComponentAction::Clone | ComponentAction::Checkout => match self.mode {
                Mode::Reference => self.materialize_reference(component, &dir, pin)?,
                Mode::Vendored => self.materialize_vendored(component, &dir, pin)?,
            },
            ComponentAction::VendorImport => self.materialize_vendored(component, &dir, pin)?,
            ComponentAction::UpdateDepsOnly => {}
        }

        if !matches!(action, ComponentAction::Noop) {
            self.install_packages(component, &dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meta_core::manifest::BuildKind;
    use tempfile::tempdir;

    #[test]
    fn noop_action_never_touches_the_filesystem() {
        let workspace = tempdir().unwrap();
        let components = BTreeMap::new();
        let executor = CliExecutor {
            workspace_root: workspace.path().to_path_buf(),
            components_dir: workspace.path().join("components"),
            mode: Mode::Reference,
            components,
            pins: BTreeMap::new(),
            skip_packages: true,
        };
        // Missing component + noop: still an error since the component must
        // be present in the manifest for execute() to do anything.
        let err = executor.execute("ghost", ComponentAction::Noop).unwrap_err();
        assert_eq!(err.kind_tag(), "DependencyError");
    }

    #[test]
    fn unknown_pin_is_a_dependency_error() {
        let workspace = tempdir().unwrap();
        let mut components = BTreeMap::new();
        components.insert(
            "a".to_string(),
            Component {
                name: "a".into(),
                repo: "repo-a".into(),
                version: "v1.0.0".into(),
                build_kind: BuildKind::Generic,
                build_target: None,
                depends_on: vec![],
                isolation: Isolation::None,
            },
        );
        let executor = CliExecutor {
            workspace_root: workspace.path().to_path_buf(),
            components_dir: workspace.path().join("components"),
            mode: Mode::Reference,
            components,
            pins: BTreeMap::new(),
            skip_packages: true,
        };
        let err = executor.execute("a", ComponentAction::Noop).unwrap_err();
        assert_eq!(err.kind_tag(), "DependencyError");
    }
}

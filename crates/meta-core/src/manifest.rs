//! Typed, read-only-after-load model for `components.yaml`,
//! `environments.yaml`, and `features.yaml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const RESERVED_ENVIRONMENTS: [&str; 3] = ["dev", "staging", "prod"];

/// Storage mode tag — an explicit sum-type variant, never duck-typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Reference,
    Vendored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Bazel,
    Python,
    Npm,
    Docker,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    None,
    Venv,
    Container,
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub repo: String,
    pub version: String,
    #[serde(rename = "type")]
    pub build_kind: BuildKind,
    pub build_target: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub isolation: Isolation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsFile {
    pub meta: ComponentsMeta,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsMeta {
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub repo: String,
    pub version: String,
    #[serde(rename = "type")]
    pub build_kind: BuildKind,
    pub build_target: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub isolation: Isolation,
}

/// A named pin set over all components. `dev`/`staging`/`prod` are reserved
/// and undeletable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsFile {
    #[serde(default)]
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub producer: String,
    pub consumer: String,
    pub output: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub contracts: Vec<Contract>,
    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesFile {
    #[serde(default)]
    pub features: BTreeMap<String, Feature>,
}

/// Read-only in-memory graph produced by [`load_workspace`].
#[derive(Debug, Clone)]
pub struct Manifest {
    pub mode: Mode,
    pub components: BTreeMap<String, Component>,
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
    pub features: BTreeMap<String, Feature>,
}

fn semver_tag_regex() -> Regex {
    Regex::new(r"^v\d+\.\d+\.\d+$").unwrap()
}

fn sha_regex() -> Regex {
    Regex::new(r"^[0-9a-fA-F]{40}$").unwrap()
}

fn branch_name_regex() -> Regex {
    Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap()
}

/// `v` followed only by digits and dots (`v1`, `v1.2`, `v1.2.3.4`, ...)
/// reads as an attempted, malformed version tag rather than an intentional
/// branch name, so the branch alternative never accepts it even though its
/// characters all fall inside the branch character class. The `regex` crate
/// has no lookaround to express this as one pattern, so it's a separate
/// check ahead of the branch match.
fn looks_like_a_malformed_version_tag(pin: &str) -> bool {
    Regex::new(r"^v\d+(\.\d+)*$").unwrap().is_match(pin)
}

fn is_valid_pin(pin: &str) -> bool {
    if semver_tag_regex().is_match(pin) {
        return true;
    }
    if sha_regex().is_match(pin) {
        return true;
    }
    if looks_like_a_malformed_version_tag(pin) {
        return false;
    }
    branch_name_regex().is_match(pin)
}

pub fn load_workspace(manifests_dir: &Path) -> Result<Manifest> {
    let components_raw = fs::read_to_string(manifests_dir.join("components.yaml"))
        .map_err(|e| Error::io(manifests_dir.join("components.yaml"), e))?;
    let components_file: ComponentsFile = serde_yaml::from_str(&components_raw)
        .map_err(|e| Error::manifest(format!("components.yaml: {e}")))?;

    let environments_raw = fs::read_to_string(manifests_dir.join("environments.yaml"))
        .map_err(|e| Error::io(manifests_dir.join("environments.yaml"), e))?;
    let environments_file: EnvironmentsFile = serde_yaml::from_str(&environments_raw)
        .map_err(|e| Error::manifest(format!("environments.yaml: {e}")))?;

    let features_raw = fs::read_to_string(manifests_dir.join("features.yaml")).ok();
    let features_file: FeaturesFile = match features_raw {
        Some(raw) => serde_yaml::from_str(&raw)
            .map_err(|e| Error::manifest(format!("features.yaml: {e}")))?,
        None => FeaturesFile {
            features: BTreeMap::new(),
        },
    };

    let mut components = BTreeMap::new();
    for (name, entry) in components_file.components {
        components.insert(
            name.clone(),
            Component {
                name,
                repo: entry.repo,
                version: entry.version,
                build_kind: entry.build_kind,
                build_target: entry.build_target,
                depends_on: entry.depends_on,
                isolation: entry.isolation,
            },
        );
    }

    let manifest = Manifest {
        mode: components_file.meta.mode,
        components,
        environments: environments_file.environments,
        features: features_file.features,
    };

    validate(&manifest)?;
    Ok(manifest)
}

pub fn validate(manifest: &Manifest) -> Result<()> {
    for (name, component) in &manifest.components {
        if component.repo.trim().is_empty() {
            return Err(Error::manifest(format!("component {name}: empty repo")));
        }
        if !is_valid_pin(&component.version) {
            return Err(Error::manifest(format!(
                "component {name}: invalid version pin {:?}",
                component.version
            )));
        }
        for dep in &component.depends_on {
            if !manifest.components.contains_key(dep) {
                return Err(Error::manifest(format!(
                    "component {name}: depends_on unknown component {dep}"
                )));
            }
        }
    }

    for (env, pins) in &manifest.environments {
        for (component, pin) in pins {
            if !manifest.components.contains_key(component) {
                return Err(Error::manifest(format!(
                    "environment {env}: unknown component {component}"
                )));
            }
            if !is_valid_pin(pin) {
                return Err(Error::manifest(format!(
                    "environment {env}: invalid version pin {pin:?} for {component}"
                )));
            }
        }
    }

    for (name, feature) in &manifest.features {
        for member in &feature.components {
            if !manifest.components.contains_key(member) {
                return Err(Error::manifest(format!(
                    "feature {name}: unknown component {member}"
                )));
            }
        }
        for contract in &feature.contracts {
            if !manifest.components.contains_key(&contract.producer) {
                return Err(Error::manifest(format!(
                    "feature {name}: contract producer {} unknown",
                    contract.producer
                )));
            }
            if !manifest.components.contains_key(&contract.consumer) {
                return Err(Error::manifest(format!(
                    "feature {name}: contract consumer {} unknown",
                    contract.consumer
                )));
            }
        }
    }

    Ok(())
}

/// Can `env` be removed? Reserved names never can.
pub fn is_removable_environment(env: &str) -> bool {
    !RESERVED_ENVIRONMENTS.contains(&env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn loads_a_minimal_valid_workspace() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "components.yaml",
            r#"
meta:
  mode: reference
components:
  a:
    repo: "git@example.com/a.git"
    version: "v1.0.0"
    type: generic
  b:
    repo: "git@example.com/b.git"
    version: "v1.0.0"
    type: generic
    depends_on: ["a"]
"#,
        );
        write(
            dir.path(),
            "environments.yaml",
            r#"
environments:
  dev:
    a: "v1.0.0"
    b: "v1.0.0"
"#,
        );

        let manifest = load_workspace(dir.path()).unwrap();
        assert_eq!(manifest.components.len(), 2);
        assert_eq!(manifest.mode, Mode::Reference);
        assert!(manifest.environments.contains_key("dev"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "components.yaml",
            r#"
meta:
  mode: reference
components:
  a:
    repo: "git@example.com/a.git"
    version: "v1.0.0"
    type: generic
    depends_on: ["ghost"]
"#,
        );
        write(dir.path(), "environments.yaml", "environments: {}\n");

        let err = load_workspace(dir.path()).unwrap_err();
        assert_eq!(err.kind_tag(), "ManifestError");
    }

    #[test]
    fn rejects_invalid_version_pin() {
        let mut components = Map::new();
        components.insert(
            "a".to_string(),
            Component {
                name: "a".into(),
                repo: "r".into(),
                version: "not a pin!".into(),
                build_kind: BuildKind::Generic,
                build_target: None,
                depends_on: vec![],
                isolation: Isolation::None,
            },
        );
        let manifest = Manifest {
            mode: Mode::Reference,
            components,
            environments: Map::new(),
            features: Map::new(),
        };
        assert!(validate(&manifest).is_err());
    }

    #[test]
    fn reserved_environments_are_not_removable() {
        assert!(!is_removable_environment("prod"));
        assert!(!is_removable_environment("dev"));
        assert!(!is_removable_environment("staging"));
        assert!(is_removable_environment("qa"));
    }

    #[test]
    fn valid_pin_grammar_accepts_semver_sha_and_branch() {
        assert!(is_valid_pin("v1.2.3"));
        assert!(is_valid_pin(&"a".repeat(40)));
        assert!(is_valid_pin("main"));
        assert!(!is_valid_pin("v1.2"));
    }
}

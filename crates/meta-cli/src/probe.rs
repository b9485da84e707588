//! Filesystem probing shared by `plan`, `apply`, and `status`: turns a
//! component directory into the [`meta_core::apply::OnDiskState`] the
//! (otherwise pure) planner needs as its one impure input.

use meta_core::apply::OnDiskState;
use meta_core::context::Context;
use meta_core::manifest::{Manifest, Mode};
use meta_core::{git, vendor};

fn deps_present(ctx: &Context, manifest: &Manifest, name: &str) -> bool {
    manifest
        .components
        .get(name)
        .map(|c| {
            c.depends_on
                .iter()
                .all(|dep| ctx.component_dir(dep).exists())
        })
        .unwrap_or(true)
}

/// Reads whatever is on disk for `name` and classifies it against
/// `desired_pin`. Never touches the network: reference-mode components are
/// compared by their checked-out commit sha, vendored components by their
/// provenance record.
pub fn on_disk_state(ctx: &Context, manifest: &Manifest, name: &str, desired_pin: &str) -> OnDiskState {
    let dir = ctx.component_dir(name);
    if !dir.exists() {
        return OnDiskState::Absent;
    }

    match manifest.mode {
        Mode::Reference => match git::commit_sha(name, &dir) {
            Ok(sha) if sha == desired_pin || sha.starts_with(desired_pin) => {
                OnDiskState::PresentMatching {
                    deps_satisfied: deps_present(ctx, manifest, name),
                }
            }
            Ok(sha) => OnDiskState::PresentMismatched { pin: sha },
            Err(_) => OnDiskState::PresentMismatched {
                pin: "unknown".to_string(),
            },
        },
        Mode::Vendored => match vendor::read_provenance(&dir) {
            Some(provenance) if provenance.version == desired_pin => OnDiskState::PresentMatching {
                deps_satisfied: deps_present(ctx, manifest, name),
            },
            Some(provenance) => OnDiskState::PresentMismatched {
                pin: provenance.version,
            },
            None => OnDiskState::PresentMismatched {
                pin: "unknown".to_string(),
            },
        },
    }
}

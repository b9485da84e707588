//! `meta vendor`: drives the transaction pipeline in
//! [`meta_core::vendor`] for both directions of the reference/vendored
//! conversion, plus the standalone import, status, verify, backup/restore,
//! and checkpoint-inspection subcommands built on top of it.

use std::path::{Path, PathBuf};

use meta_core::context::Context;
use meta_core::error::{Error, Result};
use meta_core::manifest::{Component, Manifest, Mode};
use meta_core::vendor::{self, Provenance, TransactionStep};
use meta_core::{git, hashing};

use crate::cli::VendorAction;

pub fn run(ctx: &mut Context, action: VendorAction) -> Result<()> {
    match action {
        VendorAction::Convert {
            mode,
            component,
            atomic,
            fail_on_secrets,
            dry_run,
            plan_output,
        } => convert(ctx, &mode, component.as_deref(), atomic, fail_on_secrets, dry_run, plan_output.as_deref()),
        VendorAction::Import { component } => import(ctx, &component),
        VendorAction::ImportAll => import_all(ctx),
        VendorAction::Status => status(ctx),
        VendorAction::Verify => verify(ctx),
        VendorAction::Backup => backup(ctx),
        VendorAction::Restore { backup_id } => restore(ctx, &backup_id),
        VendorAction::ListBackups => list_backups(ctx),
        VendorAction::Resume { component } => resume(ctx, &component),
        VendorAction::ListCheckpoints => list_checkpoints(ctx),
        VendorAction::Release { component } => release(ctx, &component),
    }
}

fn backup_dir(ctx: &Context, component: &str) -> PathBuf {
    ctx.backups_dir().join(component)
}

fn parse_mode(mode: &str) -> Result<Mode> {
    match mode {
        "vendored" => Ok(Mode::Vendored),
        "reference" => Ok(Mode::Reference),
        other => Err(Error::manifest(format!(
            "unknown vendor convert mode {other:?}, expected vendored or reference"
        ))),
    }
}

fn targets<'m>(manifest: &'m Manifest, component: Option<&str>) -> Result<Vec<&'m Component>> {
    match component {
        Some(name) => {
            let c = manifest
                .components
                .get(name)
                .ok_or_else(|| Error::dependency(name, "not present in the manifest"))?;
            Ok(vec![c])
        }
        None => Ok(manifest.components.values().collect()),
    }
}

fn convert_to_vendored_steps<'a>(
    component: &'a Component,
    source_dir: &'a Path,
    backup: &'a Path,
) -> Vec<TransactionStep<'a>> {
    vendor::build_steps(
        &component.name,
        source_dir,
        backup,
        {
            let source_dir = source_dir.to_path_buf();
            let version = component.version.clone();
            let repo = component.repo.clone();
            let name = component.name.clone();
            move || {
                let git_dir = source_dir.join(".git");
                if git_dir.exists() {
                    std::fs::remove_dir_all(&git_dir).map_err(|e| Error::io(&git_dir, e))?;
                }
                vendor::write_provenance(
                    &source_dir,
                    &Provenance {
                        component: name.clone(),
                        repo: repo.clone(),
                        version: version.clone(),
                        vendored_at: chrono::Utc::now(),
                    },
                )
            }
        },
        {
            let source_dir = source_dir.to_path_buf();
            let backup = backup.to_path_buf();
            move || {
                if backup.exists() {
                    let _ = std::fs::remove_dir_all(&source_dir);
                    let _ = hashing::copy_tree(&backup, &source_dir, false);
                }
            }
        },
    )
}

fn convert_to_reference_steps<'a>(
    component: &'a Component,
    source_dir: &'a Path,
    backup: &'a Path,
) -> Vec<TransactionStep<'a>> {
    vendor::build_steps(
        &component.name,
        source_dir,
        backup,
        {
            let source_dir = source_dir.to_path_buf();
            let repo = component.repo.clone();
            let version = component.version.clone();
            let name = component.name.clone();
            move || {
                let staging = source_dir.with_extension("vendor-cmd-staging");
                if staging.exists() {
                    std::fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
                }
                git::clone(&name, &repo, &staging)?;
                git::checkout(&name, &staging, &version)?;
                if source_dir.exists() {
                    std::fs::remove_dir_all(&source_dir).map_err(|e| Error::io(&source_dir, e))?;
                }
                std::fs::rename(&staging, &source_dir).map_err(|e| Error::io(&source_dir, e))
            }
        },
        {
            let source_dir = source_dir.to_path_buf();
            let backup = backup.to_path_buf();
            move || {
                if backup.exists() {
                    let _ = std::fs::remove_dir_all(&source_dir);
                    let _ = hashing::copy_tree(&backup, &source_dir, false);
                }
            }
        },
    )
}

fn verify_conversion(manifest: &Manifest, target_mode: Mode, dir: &Path, component: &Component) -> Result<()> {
    match target_mode {
        Mode::Vendored => {
            let provenance = vendor::read_provenance(dir).ok_or_else(|| Error::Vendor {
                component: component.name.clone(),
                message: "no provenance record after conversion".to_string(),
            })?;
            if provenance.version != component.version {
                return Err(Error::Vendor {
                    component: component.name.clone(),
                    message: format!(
                        "provenance version {} does not match manifest pin {}",
                        provenance.version, component.version
                    ),
                });
            }
        }
        Mode::Reference => {
            if !git::is_clean(dir)? {
                return Err(Error::Vendor {
                    component: component.name.clone(),
                    message: "working tree is dirty after conversion".to_string(),
                });
            }
        }
    }
    let _ = manifest;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn convert(
    ctx: &mut Context,
    mode: &str,
    component: Option<&str>,
    atomic: bool,
    fail_on_secrets: bool,
    dry_run: bool,
    plan_output: Option<&Path>,
) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let target_mode = parse_mode(mode)?;
    let selected = targets(&manifest, component)?;

    let mut converted: Vec<String> = Vec::new();
    for c in &selected {
        let dir = ctx.component_dir(&c.name);
        let backup = backup_dir(ctx, &c.name);

        let steps = match target_mode {
            Mode::Vendored => convert_to_vendored_steps(c, &dir, &backup),
            Mode::Reference => convert_to_reference_steps(c, &dir, &backup),
        };

        if fail_on_secrets {
            let hits = vendor::scan_for_secrets(&dir)?;
            if let Some((path, pattern)) = hits.into_iter().next() {
                return Err(Error::SecretDetected {
                    component: c.name.clone(),
                    path,
                    pattern,
                });
            }
        }

        let result = vendor::run_pipeline(
            ctx.workspace_root(),
            &c.name,
            steps,
            dry_run,
            plan_output,
            ctx.reporter,
        );

        match result {
            Ok(r) if dry_run => {
                println!("vendor: dry run plan written for {}", c.name);
                let _ = r;
            }
            Ok(_) => {
                if let Err(err) = verify_conversion(&manifest, target_mode, &dir, c) {
                    let _ = std::fs::remove_dir_all(&dir);
                    let _ = hashing::copy_tree(&backup, &dir, false);
                    if atomic {
                        for name in &converted {
                            let undo_backup = backup_dir(ctx, name);
                            let undo_dir = ctx.component_dir(name);
                            let _ = std::fs::remove_dir_all(&undo_dir);
                            let _ = hashing::copy_tree(&undo_backup, &undo_dir, false);
                        }
                    }
                    return Err(err);
                }
                println!("vendor: converted {} to {mode}", c.name);
                converted.push(c.name.clone());
            }
            Err(err) => {
                if atomic {
                    for name in &converted {
                        let undo_backup = backup_dir(ctx, name);
                        let undo_dir = ctx.component_dir(name);
                        let _ = std::fs::remove_dir_all(&undo_dir);
                        let _ = hashing::copy_tree(&undo_backup, &undo_dir, false);
                    }
                }
                return Err(err);
            }
        }
    }

    Ok(())
}

fn import_one(ctx: &mut Context, manifest: &Manifest, component: &Component) -> Result<()> {
    let default_env = ctx.options.default_env.clone();
    let pin = manifest
        .environments
        .get(&default_env)
        .and_then(|pins| pins.get(&component.name))
        .unwrap_or(&component.version);

    let dir = ctx.component_dir(&component.name);
    if dir.exists() {
        return Err(Error::manifest(format!(
            "{} is already present on disk; use `vendor convert` instead",
            component.name
        )));
    }

    let staging = dir.with_extension("vendor-import-staging");
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

    hashing::copy_tree(&staging, &dir, false)?;
    std::fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
    vendor::write_provenance(
        &dir,
        &Provenance {
            component: component.name.clone(),
            repo: component.repo.clone(),
            version: pin.clone(),
            vendored_at: chrono::Utc::now(),
        },
    )?;
    Ok(())
}

fn import(ctx: &mut Context, component: &str) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let c = manifest
        .components
        .get(component)
        .ok_or_else(|| Error::dependency(component, "not present in the manifest"))?
        .clone();
    import_one(ctx, &manifest, &c)?;
    println!("vendor: imported {component}");
    Ok(())
}

fn import_all(ctx: &mut Context) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let mut imported = 0;
    for c in manifest.components.values().cloned().collect::<Vec<_>>() {
        if ctx.component_dir(&c.name).exists() {
            continue;
        }
        import_one(ctx, &manifest, &c)?;
        println!("vendor: imported {}", c.name);
        imported += 1;
    }
    println!("vendor: imported {imported} component(s)");
    Ok(())
}

fn status(ctx: &mut Context) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    println!("vendor status:");
    for c in manifest.components.values() {
        let dir = ctx.component_dir(&c.name);
        if !dir.exists() {
            println!("  {}: absent", c.name);
            continue;
        }
        let mode = if vendor::read_provenance(&dir).is_some() {
            "vendored"
        } else {
            "reference"
        };
        let checkpoint = vendor::load_checkpoint(ctx.workspace_root(), &c.name)
            .map(|cp| format!(", resumable from {:?}", cp.last_completed_step))
            .unwrap_or_default();
        println!("  {}: {mode}{checkpoint}", c.name);
    }
    Ok(())
}

fn verify(ctx: &mut Context) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let mut failed = 0;
    for c in manifest.components.values() {
        let dir = ctx.component_dir(&c.name);
        if !dir.exists() {
            continue;
        }
        let mode = if vendor::read_provenance(&dir).is_some() {
            Mode::Vendored
        } else {
            Mode::Reference
        };
        match verify_conversion(&manifest, mode, &dir, c) {
            Ok(()) => println!("  {}: ok", c.name),
            Err(err) => {
                println!("  {}: FAILED ({err})", c.name);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(Error::manifest(format!("{failed} component(s) failed vendor verification")));
    }
    Ok(())
}

fn backup(ctx: &mut Context) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let mut count = 0;
    for c in manifest.components.values() {
        let dir = ctx.component_dir(&c.name);
        if !dir.exists() {
            continue;
        }
        let backup = backup_dir(ctx, &c.name);
        if backup.exists() {
            std::fs::remove_dir_all(&backup).map_err(|e| Error::io(&backup, e))?;
        }
        hashing::copy_tree(&dir, &backup, false)?;
        count += 1;
    }
    println!("vendor: backed up {count} component(s)");
    Ok(())
}

fn restore(ctx: &mut Context, backup_id: &str) -> Result<()> {
    let dir = ctx.component_dir(backup_id);
    let backup = backup_dir(ctx, backup_id);
    if !backup.exists() {
        return Err(Error::manifest(format!("no backup found for {backup_id}")));
    }
    if dir.exists() {
        std::fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    }
    hashing::copy_tree(&backup, &dir, false)?;
    println!("vendor: restored {backup_id} from backup");
    Ok(())
}

fn list_backups(ctx: &mut Context) -> Result<()> {
    println!("vendor backups:");
    let Ok(entries) = std::fs::read_dir(ctx.backups_dir()) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            println!("  {name}");
        }
    }
    Ok(())
}

fn resume(ctx: &mut Context, component: &str) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let c = manifest
        .components
        .get(component)
        .ok_or_else(|| Error::dependency(component, "not present in the manifest"))?
        .clone();
    let dir = ctx.component_dir(component);
    let backup = backup_dir(ctx, component);

    let resuming_to_vendored = !dir.join(".git").exists();
    let steps = if resuming_to_vendored {
        convert_to_vendored_steps(&c, &dir, &backup)
    } else {
        convert_to_reference_steps(&c, &dir, &backup)
    };

    vendor::resume_pipeline(ctx.workspace_root(), component, steps, ctx.reporter)?;
    println!("vendor: resumed and completed conversion for {component}");
    Ok(())
}

fn list_checkpoints(ctx: &mut Context) -> Result<()> {
    println!("vendor checkpoints:");
    let Ok(entries) = std::fs::read_dir(ctx.checkpoints_dir()) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            let component = name.trim_end_matches(".json");
            if let Some(cp) = vendor::load_checkpoint(ctx.workspace_root(), component) {
                println!("  {component}: last completed {:?}", cp.last_completed_step);
            }
        }
    }
    Ok(())
}

fn release(ctx: &mut Context, component: &str) -> Result<()> {
    vendor::clear_checkpoint(ctx.workspace_root(), component)?;
    println!("vendor: released checkpoint for {component}");
    Ok(())
}

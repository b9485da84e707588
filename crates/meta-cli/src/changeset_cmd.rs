//! `meta changeset`: create/inspect/finalize/rollback/bisect
//! over the append-only changeset log.

use std::time::Duration;

use chrono::Utc;

use meta_core::apply::{self, ApplyOptions};
use meta_core::changeset::{self, ChangesetStatus};
use meta_core::context::Context;
use meta_core::error::{Error, Result};
use meta_core::rollback::{self, RollbackTarget};
use meta_core::wslock::WorkspaceLock;
use meta_core::{git, process};

use crate::cli::ChangesetAction;
use crate::executor::CliExecutor;
use crate::probe;

pub fn run(ctx: &mut Context, action: ChangesetAction) -> Result<()> {
    match action {
        ChangesetAction::Create { author, description } => create(ctx, &author, &description),
        ChangesetAction::Show { id } => show(ctx, &id),
        ChangesetAction::List => list(ctx),
        ChangesetAction::Current => current(ctx),
        ChangesetAction::Finalize { id } => finalize(ctx, &id),
        ChangesetAction::Rollback { id } => rollback_cmd(ctx, &id),
        ChangesetAction::Bisect { start, end, command } => bisect(ctx, &start, &end, &command),
    }
}

fn create(ctx: &mut Context, author: &str, description: &str) -> Result<()> {
    let created = changeset::create(ctx.workspace_root(), author, description, Utc::now())?;
    println!("changeset: created {}", created.id);
    Ok(())
}

fn print_changeset(cs: &changeset::Changeset) {
    println!("changeset {} ({:?})", cs.id, cs.status);
    println!("  author: {}", cs.author);
    println!("  description: {}", cs.description);
    println!("  timestamp: {}", cs.timestamp);
    for commit in &cs.repos {
        println!("  {} @ {} ({})", commit.name, commit.commit, commit.message);
    }
}

fn show(ctx: &mut Context, id: &str) -> Result<()> {
    let cs = changeset::load(ctx.workspace_root(), id)?;
    print_changeset(&cs);
    Ok(())
}

fn list(ctx: &mut Context) -> Result<()> {
    let index = changeset::load_index(ctx.workspace_root())?;
    println!("changesets:");
    for id in &index.ids {
        let cs = changeset::load(ctx.workspace_root(), id)?;
        println!("  {} {:?} {}", cs.id, cs.status, cs.description);
    }
    Ok(())
}

fn current(ctx: &mut Context) -> Result<()> {
    let index = changeset::load_index(ctx.workspace_root())?;
    match index.in_progress {
        Some(id) => {
            let cs = changeset::load(ctx.workspace_root(), &id)?;
            print_changeset(&cs);
        }
        None => println!("changeset: none in progress"),
    }
    Ok(())
}

fn finalize(ctx: &mut Context, id: &str) -> Result<()> {
    let cs = changeset::finalize(ctx.workspace_root(), id)?;
    println!("changeset: finalized {} ({:?})", cs.id, cs.status);
    Ok(())
}

fn rollback_cmd(ctx: &mut Context, id: &str) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let workspace_root = ctx.workspace_root().to_path_buf();
    let components = manifest.components.clone();

    let rolled_back = changeset::rollback(&workspace_root, id, |repo, commit| {
        let component = components
            .values()
            .find(|c| c.repo == repo)
            .ok_or_else(|| Error::dependency(repo, "no component in manifest maps to this repo"))?;
        let dir = ctx.component_dir(&component.name);
        git::revert(&component.name, &dir, commit)?;
        git::commit_sha(&component.name, &dir)
    })?;

    println!("changeset: rolled back {} ({:?})", rolled_back.id, rolled_back.status);
    Ok(())
}

/// Binary-searches the committed sequence between `start` and `end`
/// (inclusive) for the first changeset whose materialized state fails
/// `command`. Each candidate is rolled out with `skip_packages` so the
/// search stays fast; a real `apply` after locating the culprit is left to
/// the caller.
fn bisect(ctx: &mut Context, start: &str, end: &str, command: &[String]) -> Result<()> {
    if command.is_empty() {
        return Err(Error::manifest("bisect requires a command after `--`"));
    }

    let manifest = crate::load_workspace_manifest(ctx)?;
    let index = changeset::load_index(ctx.workspace_root())?;

    let committed: Vec<String> = index
        .ids
        .iter()
        .filter(|id| {
            changeset::load(ctx.workspace_root(), id)
                .map(|cs| cs.status == ChangesetStatus::Committed)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let start_pos = committed
        .iter()
        .position(|id| id == start)
        .ok_or_else(|| Error::manifest(format!("{start} is not a committed changeset")))?;
    let end_pos = committed
        .iter()
        .position(|id| id == end)
        .ok_or_else(|| Error::manifest(format!("{end} is not a committed changeset")))?;
    if start_pos > end_pos {
        return Err(Error::manifest("bisect start must come before end"));
    }
    let sequence = committed[start_pos..=end_pos].to_vec();

    let lock = WorkspaceLock::acquire(&ctx.state_dir(), "changeset-bisect")?;

    let culprit = changeset::bisect(&sequence, |id| {
        let target = RollbackTarget::Changeset(id.to_string());
        let pins = rollback::resolve_pins(ctx.workspace_root(), &manifest, &target)?;

        let plan = apply::build_plan_from_pins(&manifest, id, &pins, |name| {
            probe::on_disk_state(ctx, &manifest, name, pins.get(name).map(|s| s.as_str()).unwrap_or(""))
        })?;

        let executor = CliExecutor {
            workspace_root: ctx.workspace_root().to_path_buf(),
            components_dir: ctx.components_dir(),
            mode: manifest.mode,
            components: manifest.components.clone(),
            pins,
            skip_packages: true,
        };
        let cancelled = std::sync::atomic::AtomicBool::new(false);
        let summary = apply::run(&manifest, &plan, &ApplyOptions::default(), &executor, &cancelled)?;
        if !summary.all_healthy() {
            return Ok(false);
        }

        let mut cmd = std::process::Command::new(&command[0]);
        cmd.args(&command[1..]).current_dir(ctx.workspace_root());
        let output = process::run_command_with_timeout(cmd, Duration::from_secs(600))
            .map_err(|e| Error::io(ctx.workspace_root(), e))?;
        Ok(output.success())
    })?;
    lock.release();

    match culprit {
        Some(id) => println!("bisect: first failing changeset is {id}"),
        None => println!("bisect: no committed changesets in range"),
    }
    Ok(())
}

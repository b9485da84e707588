//! Entry point: resolves configuration, builds a [`Context`], and dispatches
//! to one command module per concern (parse, build options, `match` over
//! `Commands`).

mod cache_cmd;
mod changeset_cmd;
mod cli;
mod config_cmd;
mod executor;
mod gc_cmd;
mod health_cmd;
mod lock_cmd;
mod plan_cmd;
mod probe;
mod progress;
mod rollback_cmd;
mod status_cmd;
mod store_cmd;
mod validate_cmd;
mod vendor_cmd;

use std::io;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use meta_core::config::{self, CliOverrides};
use meta_core::context::Context;
use meta_core::error::Error;
use meta_core::manifest::{self, Manifest};
use meta_core::reporter::StderrReporter;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.cmd {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let overrides = CliOverrides {
        default_env: cli.default_env.clone(),
        manifests_dir: cli.manifests_dir.clone(),
        parallel_jobs: cli.jobs,
        show_progress: if cli.no_progress { Some(false) } else { None },
        log_level: cli.log_level.clone(),
        remote_cache: cli.remote_cache.clone(),
        remote_store: cli.remote_store.clone(),
    };

    let mut reporter = StderrReporter;
    let workspace_root = cli.workspace.clone();

    let options = match resolve_options(&workspace_root, overrides) {
        Ok(options) => options,
        Err(err) => return report_error(&err),
    };

    let mut ctx = Context::new(workspace_root, options, &mut reporter);

    match dispatch(cli.cmd, &mut ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err),
    }
}

fn resolve_options(
    workspace_root: &std::path::Path,
    overrides: CliOverrides,
) -> meta_core::error::Result<meta_core::config::RuntimeOptions> {
    let env = config::env_overrides();
    let project = config::load_project_config(workspace_root)?;
    let global = config::load_global_config()?;
    Ok(config::resolve_runtime_options(overrides, env, project, global))
}

fn report_error(err: &Error) -> ExitCode {
    eprintln!("[error] {} ({})", err, err.kind_tag());
    ExitCode::from(meta_core::error::exit_code(err) as u8)
}

/// Loads the manifest from `ctx`'s resolved `manifests_dir`, wrapping a
/// missing directory in the same `ManifestError` every other manifest
/// failure already reports as.
fn load_manifest(ctx: &Context) -> meta_core::error::Result<Manifest> {
    manifest::load_workspace(&ctx.manifests_dir())
}

fn dispatch(cmd: Commands, ctx: &mut Context) -> meta_core::error::Result<()> {
    match cmd {
        Commands::Validate { env } => validate_cmd::run(ctx, env.as_deref()),
        Commands::Plan { env, component } => plan_cmd::run(ctx, env.as_deref(), component.as_deref()),
        Commands::Apply {
            env,
            locked,
            jobs,
            continue_on_error,
            retry,
            skip_packages,
        } => plan_cmd::run_apply(
            ctx,
            env.as_deref(),
            locked,
            jobs,
            continue_on_error,
            retry,
            skip_packages,
        ),
        Commands::Status { env } => status_cmd::run(ctx, env.as_deref()),
        Commands::Lock {
            env,
            changeset,
            validate,
            action,
        } => lock_cmd::run(ctx, env.as_deref(), changeset.as_deref(), validate, action),
        Commands::Rollback { target } => rollback_cmd::run(ctx, target),
        Commands::Changeset { action } => changeset_cmd::run(ctx, action),
        Commands::Vendor { action } => vendor_cmd::run(ctx, action),
        Commands::Cache { action } => cache_cmd::run(ctx, action),
        Commands::Store { action } => store_cmd::run(ctx, action),
        Commands::Gc => gc_cmd::run(ctx),
        Commands::Health {
            component,
            all,
            build,
            tests,
        } => health_cmd::run(ctx, component.as_deref(), all, build, tests),
        Commands::Config { global, action } => config_cmd::run(ctx, global, action),
        Commands::Completions { .. } => unreachable!("handled before Context construction"),
    }
}

pub(crate) use load_manifest as load_workspace_manifest;

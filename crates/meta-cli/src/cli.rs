//! Command-line surface: `validate`, `plan`, `apply`, `status`,
//! `lock` (+ `promote`/`compare`), `rollback`, `changeset`, `vendor`,
//! `cache`/`store`/`gc`, `health`, `config`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meta", version)]
#[command(about = "Control plane for declarative multi-repo component workspaces")]
pub struct Cli {
    /// Workspace root. Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Override `manifests_dir` for this invocation.
    #[arg(long, global = true)]
    pub manifests_dir: Option<String>,

    /// Override `default_env` for this invocation.
    #[arg(long, global = true)]
    pub default_env: Option<String>,

    /// Override `parallel_jobs` for this invocation.
    #[arg(long, global = true)]
    pub jobs: Option<usize>,

    /// Disable progress output regardless of `show_progress`.
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Override `log_level` for this invocation.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override `remote_cache` for this invocation.
    #[arg(long, global = true)]
    pub remote_cache: Option<String>,

    /// Override `remote_store` for this invocation.
    #[arg(long, global = true)]
    pub remote_store: Option<String>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest, dependency graph, and any present lock files.
    Validate {
        #[arg(long = "env")]
        env: Option<String>,
    },

    /// Produce the deterministic apply plan without side effects.
    Plan {
        #[arg(long = "env")]
        env: Option<String>,
        #[arg(long)]
        component: Option<String>,
    },

    /// Materialize the named environment's components.
    Apply {
        #[arg(long = "env")]
        env: Option<String>,
        /// Plan strictly from the environment's lock file rather than the manifest pins.
        #[arg(long)]
        locked: bool,
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        continue_on_error: bool,
        #[arg(long)]
        retry: Option<u32>,
        #[arg(long)]
        skip_packages: bool,
    },

    /// Report per-component desired/actual/status.
    Status {
        #[arg(long = "env")]
        env: Option<String>,
    },

    /// Generate or validate an environment lock file, or run a lock subcommand.
    Lock {
        #[arg(long = "env")]
        env: Option<String>,
        #[arg(long)]
        changeset: Option<String>,
        /// Validate the existing lock file against the manifest instead of regenerating it.
        #[arg(long)]
        validate: bool,
        #[command(subcommand)]
        action: Option<LockAction>,
    },

    /// Roll the workspace back to an earlier recorded state.
    Rollback {
        #[command(subcommand)]
        target: RollbackAction,
    },

    /// Manage multi-repo changesets.
    Changeset {
        #[command(subcommand)]
        action: ChangesetAction,
    },

    /// Convert components between reference and vendored mode.
    Vendor {
        #[command(subcommand)]
        action: VendorAction,
    },

    /// Inspect or invalidate build-cache entries.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect the content-addressed store.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Garbage-collect unreferenced store entries.
    Gc,

    /// Run pre-apply / post-apply health checks.
    Health {
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        build: bool,
        #[arg(long)]
        tests: bool,
    },

    /// Read or write resolved configuration.
    Config {
        #[arg(long)]
        global: bool,
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Copy a lock file's entries onto another environment.
    Promote { src: String, dst: String },
    /// Diff two environments' lock files.
    Compare { a: String, b: String },
}

#[derive(Subcommand, Debug)]
pub enum RollbackAction {
    /// Roll a single component back to an explicit pin.
    Component { name: String, pin: String },
    /// Roll every component back to the pins recorded in an environment's lock file.
    Lock { env: String },
    /// Roll a single component back to a content-store hash.
    Store { component: String, hash: String },
    /// Roll the workspace back to a named snapshot.
    Snapshot { id: String },
    /// Roll the workspace back to the pins a changeset committed.
    Changeset { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ChangesetAction {
    Create { author: String, description: String },
    Show { id: String },
    List,
    Current,
    Finalize { id: String },
    Rollback { id: String },
    /// Binary-search a committed sequence for the first changeset that fails `command`.
    Bisect {
        start: String,
        end: String,
        #[arg(last = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum VendorAction {
    /// Convert components in the named direction (`vendored` or `reference`).
    Convert {
        mode: String,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        atomic: bool,
        #[arg(long)]
        fail_on_secrets: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        plan_output: Option<PathBuf>,
    },
    /// Vendor a single component not currently present.
    Import { component: String },
    /// Vendor every component not currently present.
    ImportAll,
    Status,
    Verify,
    Backup,
    Restore { backup_id: String },
    ListBackups,
    Resume { component: String },
    ListCheckpoints,
    Release { component: String },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    List,
    Invalidate { key: String },
    InvalidateComponent { component: String },
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    Query { hash: String },
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
    /// Write out the built-in defaults so the config file exists and can be edited.
    Init,
}

//! `tab`: run model-backed agents from inheritable role bundles.
//!
//! Roles live under `roles/` in the project root, one directory per role.
//! `tab run` resolves a role and drives its session until the model is done
//! or an autonomy limit stops it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tab::core::governor::AutonomyHalt;
use tab::exit_codes;
use tab::io::checkpoint::TerminalCheckpoint;
use tab::io::config::{CONFIG_FILE, TabConfig, load_config, write_config};
use tab::io::role_loader::RoleLoader;
use tab::io::transport::AnthropicTransport;
use tab::logging;
use tab::session::{Runtime, run_role};
use tab::tools::ToolRegistry;
use tab::validate::{run_validate, write_starter_role};

#[derive(Parser)]
#[command(
    name = "tab",
    version,
    about = "Run model-backed agents from inheritable role bundles"
)]
struct Cli {
    /// Project root holding `tab.toml` and the roles directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a role against a task.
    Run {
        /// Task for the agent.
        #[arg(required_unless_present = "prompt_file", conflicts_with = "prompt_file")]
        prompt: Option<String>,
        /// Role to run (defaults to `default_role` from tab.toml).
        #[arg(short, long)]
        role: Option<String>,
        /// Run identifier threaded into templates and output paths.
        #[arg(long)]
        run_id: Option<String>,
        /// Read the task from a file.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },
    /// Check role bundles against the schema, inheritance rules and file references.
    Validate {
        /// Role names or role directories.
        roles: Vec<String>,
        /// Validate every bundle in the roles directory.
        #[arg(long, conflicts_with = "roles")]
        all: bool,
        /// Also validate abstract (`_`-prefixed) roles.
        #[arg(long)]
        allow_abstract: bool,
    },
    /// Create `tab.toml` and a starter role if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AutonomyHalt>() {
        Some(AutonomyHalt::Interrupted { .. }) => exit_codes::INTERRUPTED,
        Some(_) => exit_codes::HALTED,
        None => exit_codes::FAILED,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = fs::canonicalize(&cli.root)
        .with_context(|| format!("resolve project root {}", cli.root.display()))?;
    match cli.command {
        Command::Run {
            prompt,
            role,
            run_id,
            prompt_file,
        } => cmd_run(&root, prompt, role, run_id, prompt_file),
        Command::Validate {
            roles,
            all,
            allow_abstract,
        } => cmd_validate(&root, &roles, all, allow_abstract),
        Command::Init { force } => cmd_init(&root, force),
    }
}

fn cmd_run(
    root: &Path,
    prompt: Option<String>,
    role: Option<String>,
    run_id: Option<String>,
    prompt_file: Option<PathBuf>,
) -> Result<i32> {
    let cfg = load_config(&root.join(CONFIG_FILE))?;
    let task = match (prompt, prompt_file) {
        (Some(prompt), _) => prompt,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("read prompt file {}", path.display()))?,
        (None, None) => anyhow::bail!("a prompt or --prompt-file is required"),
    };
    let role = role.unwrap_or_else(|| cfg.default_role.clone());
    let run_id = run_id.unwrap_or_else(new_run_id);

    let loader = RoleLoader::new(root.join(&cfg.roles_dir))?;
    let registry = ToolRegistry::with_builtin_tools();
    let transport = AnthropicTransport::from_config(&cfg.api)?;
    let checkpoint = TerminalCheckpoint;
    let runtime = Runtime {
        loader: &loader,
        registry: &registry,
        transport: &transport,
        checkpoint: &checkpoint,
        settings: &cfg.tools,
        root,
    };

    info!(role = %role, run_id = %run_id, "run started");
    println!("[tab] role: {role} | run: {run_id}\n");
    run_role(runtime, &role, &task, &run_id)?;
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path, roles: &[String], all: bool, allow_abstract: bool) -> Result<i32> {
    let cfg = load_config(&root.join(CONFIG_FILE))?;
    let passed = run_validate(&root.join(&cfg.roles_dir), roles, all, allow_abstract)?;
    Ok(if passed {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let config_path = root.join(CONFIG_FILE);
    let cfg = if force || !config_path.exists() {
        let cfg = TabConfig::default();
        write_config(&config_path, &cfg)?;
        println!("Wrote {CONFIG_FILE}");
        cfg
    } else {
        load_config(&config_path)?
    };

    let roles_dir = root.join(&cfg.roles_dir);
    if write_starter_role(&roles_dir, force)? {
        println!("Wrote {}/assistant/role.yml", cfg.roles_dir);
    }
    Ok(exit_codes::OK)
}

/// `run-` plus eight hex characters.
fn new_run_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &hex[..8])
}

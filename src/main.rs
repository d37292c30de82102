use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use letstry::config::{Config, TrackingType};
use letstry::editor::{resolve_executable, SysinfoProcessLocator, SystemEditorLauncher};
use letstry::git::GitCli;
use letstry::liveness::{SystemLivenessTracker, WatchTarget};
use letstry::logging::{self, LogTarget};
use letstry::monitor::{
    DetachedMonitorLauncher, InProcessMonitorLauncher, MonitorLauncher, SessionMonitor,
};
use letstry::session::{parse_show_args, CreateSessionArgs, SessionManager, SessionRegistry};
use letstry::sleeper::TokioSleeper;
use letstry::source::SourceResolver;
use letstry::storage::Storage;
use letstry::templates::{template_name_from_url, TemplateStore};
use letstry::workspace::WorkspaceProvisioner;

#[derive(Parser)]
#[command(name = "lt")]
#[command(about = "Disposable development workspaces")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session and open it in the editor
    New {
        /// Template name, directory or git URL (blank when omitted)
        source: Option<String>,

        /// Create the workspace in a temporary directory that is deleted
        /// once the editor closes it
        #[arg(short, long)]
        temp: bool,

        /// Editor to use instead of the configured default
        #[arg(short, long)]
        editor: Option<String>,
    },

    /// List all sessions
    #[command(alias = "ls")]
    List,

    /// Show a session: `lt show [ID] [full|path|pid|editor|json]`
    Show {
        /// Session id and/or display mode. Defaults to the session containing
        /// the current directory.
        #[arg(num_args = 0..=2)]
        args: Vec<String>,
    },

    /// Remove inactive sessions (all of them when no id is given)
    Prune {
        /// Session to prune
        id: Option<String>,
    },

    /// Remove an inactive session and always delete its workspace
    Clean {
        /// Session to clean
        id: String,
    },

    /// Manage workspace templates
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Manage editors
    #[command(subcommand)]
    Editors(EditorsCommand),

    /// Print paths used by lt
    Path {
        #[arg(value_enum)]
        kind: Option<PathKind>,
    },

    /// Watch a workspace until it is closed, then reclaim its session
    #[command(hide = true)]
    Monitor {
        /// Poll interval in milliseconds
        delay_ms: u64,
        location: PathBuf,
        pid: u32,
        tracking: TrackingType,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// List stored templates
    #[command(alias = "ls")]
    List,

    /// Save a directory as a template (defaults to the current session's
    /// workspace, else the current directory)
    Save { name: String, path: Option<PathBuf> },

    /// Clone a git repository as a template
    Import { url: String, name: Option<String> },

    /// Delete a template
    #[command(alias = "rm")]
    Delete { name: String },

    /// Pull the latest changes into a git-backed template
    Update { name: String },
}

#[derive(Subcommand)]
enum EditorsCommand {
    /// List configured editors
    #[command(alias = "ls")]
    List,

    /// Set the default editor
    Set { name: String },

    /// Show the default editor
    Get,
}

#[derive(Clone, Copy, ValueEnum)]
enum PathKind {
    Config,
    Sessions,
    Projects,
    Templates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => Some(
            path.canonicalize()
                .with_context(|| format!("Config file {} not found", path.display()))?,
        ),
        None => None,
    };
    let config = Config::load(config_path.as_deref())?;

    let target = if matches!(cli.command, Commands::Monitor { .. }) {
        LogTarget::Monitor
    } else {
        LogTarget::Cli
    };
    let _logging_handle = logging::init_logging(&config, target, cli.debug)?;

    match cli.command {
        Commands::New {
            source,
            temp,
            editor,
        } => {
            cmd_new(&config, config_path, source, temp, editor).await?;
        }
        Commands::List => {
            cmd_list(&config)?;
        }
        Commands::Show { args } => {
            cmd_show(&config, &args)?;
        }
        Commands::Prune { id } => {
            cmd_prune(&config, id)?;
        }
        Commands::Clean { id } => {
            cmd_clean(&config, &id)?;
        }
        Commands::Template(command) => {
            cmd_template(&config, command).await?;
        }
        Commands::Editors(command) => {
            cmd_editors(config, command)?;
        }
        Commands::Path { kind } => {
            cmd_path(&config, kind);
        }
        Commands::Monitor {
            delay_ms,
            location,
            pid,
            tracking,
        } => {
            cmd_monitor(&config, delay_ms, location, pid, tracking).await?;
        }
    }

    Ok(())
}

fn storage(config: &Config) -> Storage {
    Storage::new(config.storage_path())
}

fn template_store(config: &Config) -> TemplateStore {
    TemplateStore::new(storage(config), Arc::new(GitCli::new()))
}

/// Wire the session manager from system collaborators
fn build_manager(config: &Config, config_path: Option<PathBuf>) -> Result<SessionManager> {
    let storage = storage(config);
    let git = Arc::new(GitCli::new());
    let templates = TemplateStore::new(storage.clone(), git.clone());
    let registry = SessionRegistry::new(storage);
    let tracker = Arc::new(SystemLivenessTracker);
    let sleeper = Arc::new(TokioSleeper);

    let monitor: Arc<dyn MonitorLauncher> = if config.monitor.attached {
        Arc::new(InProcessMonitorLauncher::new(
            registry.clone(),
            tracker.clone(),
            sleeper.clone(),
        ))
    } else {
        Arc::new(DetachedMonitorLauncher::current_exe(
            config_path,
            config.storage_path(),
        )?)
    };

    Ok(SessionManager::new(
        config.clone(),
        registry,
        SourceResolver::new(templates.clone()),
        WorkspaceProvisioner::new(templates, git),
        Arc::new(SystemEditorLauncher::new(
            Arc::new(SysinfoProcessLocator),
            sleeper,
        )),
        tracker,
        monitor,
    ))
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to read current directory")
}

async fn cmd_new(
    config: &Config,
    config_path: Option<PathBuf>,
    source: Option<String>,
    force_temp: bool,
    editor: Option<String>,
) -> Result<()> {
    let manager = build_manager(config, config_path)?;
    let session = manager
        .create_session(CreateSessionArgs {
            source: source.unwrap_or_default(),
            force_temp,
            editor,
        })
        .await?;

    println!("Created session {session}");
    println!("{}", session.location.display());
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let sessions = build_manager(config, None)?.list_sessions()?;

    if sessions.is_empty() {
        println!("no sessions found");
        return Ok(());
    }

    for session in &sessions {
        println!("{session}");
    }
    Ok(())
}

fn cmd_show(config: &Config, args: &[String]) -> Result<()> {
    let (id, mode) = parse_show_args(args)?;
    let manager = build_manager(config, None)?;
    let session = manager.show_session(id.as_deref(), &current_dir()?)?;
    println!("{}", mode.render(&session)?);
    Ok(())
}

fn cmd_prune(config: &Config, id: Option<String>) -> Result<()> {
    let manager = build_manager(config, None)?;

    if let Some(id) = id {
        let session = manager.prune_session(&id)?;
        println!("Pruned session {}", session.id);
        return Ok(());
    }

    let outcome = manager.prune_all()?;
    if outcome.is_empty() {
        println!("no inactive sessions to prune");
        return Ok(());
    }

    for session in &outcome.pruned {
        println!("Pruned session {}", session.id);
    }
    for (session, err) in &outcome.failed {
        eprintln!("Failed to prune session {}: {err}", session.id);
    }
    if !outcome.failed.is_empty() {
        bail!("{} session(s) could not be pruned", outcome.failed.len());
    }
    Ok(())
}

fn cmd_clean(config: &Config, id: &str) -> Result<()> {
    let manager = build_manager(config, None)?;
    let session = manager.clean_session(id)?;
    println!("Cleaned session {}", session.id);
    Ok(())
}

async fn cmd_template(config: &Config, command: TemplateCommand) -> Result<()> {
    let templates = template_store(config);

    match command {
        TemplateCommand::List => {
            let all = templates.list()?;
            if all.is_empty() {
                println!("no templates found");
            }
            for template in all {
                println!("{}", template.name);
            }
        }
        TemplateCommand::Save { name, path } => {
            let from = match path {
                Some(path) => path,
                None => default_template_source(config)?,
            };
            let template = templates.save(&name, &from)?;
            println!("Saved template {template}");
        }
        TemplateCommand::Import { url, name } => {
            let name = name.unwrap_or_else(|| template_name_from_url(&url));
            let template = templates.import(&url, &name).await?;
            println!("Imported template {template}");
        }
        TemplateCommand::Delete { name } => {
            let template = templates.delete(&name)?;
            println!("Deleted template {}", template.name);
        }
        TemplateCommand::Update { name } => {
            let template = templates.update(&name).await?;
            println!("Updated template {}", template.name);
        }
    }
    Ok(())
}

/// The current session's workspace, or the current directory outside one
fn default_template_source(config: &Config) -> Result<PathBuf> {
    let cwd = current_dir()?;
    let manager = build_manager(config, None)?;
    Ok(match manager.current_session(&cwd) {
        Ok(session) => session.location,
        Err(_) => cwd,
    })
}

fn cmd_editors(mut config: Config, command: EditorsCommand) -> Result<()> {
    match command {
        EditorsCommand::List => {
            for editor in &config.editors {
                let marker = if editor.name == config.default_editor {
                    "*"
                } else {
                    " "
                };
                let resolved = resolve_executable(&editor.exec_path).map_or_else(
                    |_| "not found".to_string(),
                    |path| path.display().to_string(),
                );
                println!("{marker} {} [{resolved}]", editor.summary());
            }
        }
        EditorsCommand::Set { name } => {
            config.get_editor(&name)?;
            config.default_editor = name;
            let path = config.save()?;
            println!(
                "Default editor set to {} ({})",
                config.default_editor,
                path.display()
            );
        }
        EditorsCommand::Get => {
            println!("{}", config.default_editor()?.summary());
        }
    }
    Ok(())
}

fn cmd_path(config: &Config, kind: Option<PathKind>) {
    let print = |kind: PathKind| match kind {
        PathKind::Config => match Config::user_config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("no user config directory on this platform"),
        },
        PathKind::Sessions => {
            println!("{}", SessionRegistry::new(storage(config)).path().display());
        }
        PathKind::Projects => match config.projects_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("projects path not set: every session is temporary"),
        },
        PathKind::Templates => println!("{}", template_store(config).root().display()),
    };

    match kind {
        Some(kind) => print(kind),
        None => {
            for kind in [
                PathKind::Config,
                PathKind::Sessions,
                PathKind::Projects,
                PathKind::Templates,
            ] {
                print(kind);
            }
        }
    }
}

async fn cmd_monitor(
    config: &Config,
    delay_ms: u64,
    location: PathBuf,
    pid: u32,
    tracking: TrackingType,
) -> Result<()> {
    let monitor = SessionMonitor::new(
        SessionRegistry::new(storage(config)),
        Arc::new(SystemLivenessTracker),
        Arc::new(TokioSleeper),
        WatchTarget {
            location: absolute(&location)?,
            pid,
            tracking,
        },
        Duration::from_millis(delay_ms),
    );
    monitor.run().await?;
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(current_dir()?.join(path))
    }
}

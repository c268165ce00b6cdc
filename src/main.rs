//! Tanuki - autonomous task backlog runner
//!
//! Command-line front end. Every command resolves the workspace, calls into
//! the library and renders the result.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tanuki::config::{materialize, RunnerConfig, TanukiConfig};
use tanuki::llm::{create_llm_client, LlmClient};
use tanuki::plan::Planner;
use tanuki::runner::{ChangeSource, PassOutcome, RunOptions, Runner, RunnerDeps, StopReason};
use tanuki::snapshot::RepoScanner;
use tanuki::task::{Priority, Status, Task, TaskFilter, TaskId};
use tanuki::vcs::{create_pr_host, GitCli, Vcs};
use tanuki::workspace::{init_project, run_doctor, ProjectContext, Workspace};
use tanuki::TanukiError;

#[derive(Parser)]
#[command(name = "tanuki")]
#[command(version)]
#[command(about = "Autonomous task backlog runner: plan, branch, patch, check, publish", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace directory (defaults to $TANUKI_HOME, then ~/.tanuki)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Initialize the active project's workspace (idempotent)
    Init,

    /// Store provider credentials and defaults
    Setup {
        /// API key to store in config.toml
        #[arg(long)]
        api_key: Option<String>,

        /// Provider: openai or claude-cli
        #[arg(long)]
        provider: Option<String>,

        /// Model name
        #[arg(long)]
        model: Option<String>,
    },

    /// Show or set the model
    Model {
        /// New model name
        name: Option<String>,
    },

    /// Replan the backlog from a brief
    Plan {
        /// Project brief
        brief: Option<String>,

        /// Read the brief from a file
        #[arg(short, long, conflicts_with = "brief")]
        file: Option<PathBuf>,
    },

    /// Inspect and edit tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Reset blocked tasks whose reason looks transient
    Unblock,

    /// Work through the backlog
    Run {
        /// Maximum number of task passes
        #[arg(short = 'n', long)]
        max_tasks: Option<usize>,

        /// Push but do not open pull requests
        #[arg(long)]
        no_pr: bool,

        /// Continue with the next task after a failure
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        keep_going: bool,

        /// Record what would happen without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Treat "only blocked tasks left" as finished
        #[arg(long)]
        ignore_blocked: bool,

        /// Keep polling for new tasks instead of stopping
        #[arg(long)]
        daemon: bool,

        /// Seconds between polls in daemon mode
        #[arg(long, default_value = "30")]
        poll_interval: u64,
    },

    /// Runner configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check the environment
    Doctor,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a repository
    Add {
        name: String,

        /// Repository path
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Do not make it the active project
        #[arg(long)]
        no_use: bool,
    },
    /// List registered projects
    List,
    /// Set the active project
    Use { id: String },
    /// Show a project (defaults to the active one)
    Show { id: Option<String> },
    /// Remove a project from the registry (the repository is untouched)
    Remove { id: String },
    /// Rename a project
    Rename { id: String, name: String },
    /// Change a project's repository path
    SetPath { id: String, path: PathBuf },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks
    List {
        #[arg(short, long)]
        status: Option<Status>,

        #[arg(short, long)]
        priority: Option<Priority>,

        #[arg(short, long)]
        tag: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Show { id: TaskId },
    /// Append new tasks from a brief
    Add {
        brief: Option<String>,

        /// Read the brief from a file
        #[arg(short, long, conflicts_with = "brief")]
        file: Option<PathBuf>,
    },
    /// Set a task's status manually
    Status {
        id: TaskId,
        status: Status,

        /// Reason, when blocking
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective runner configuration
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Write auto-detected sections into project.json
    Materialize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "tanuki=debug,info"
    } else {
        "tanuki=info,warn"
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    if let Err(err) = dispatch(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        let code = err
            .downcast_ref::<TanukiError>()
            .map_or(1, TanukiError::exit_code);
        std::process::exit(code);
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let ws = Workspace::resolve(cli.home)?;

    match cli.command {
        Commands::Project { action } => project_command(&ws, action)?,

        Commands::Init => {
            let ctx = ws.active_project()?;
            let created = init_project(&ctx)?;
            println!(
                "{} Initialized {} at {}",
                "OK".green().bold(),
                ctx.project.id,
                ctx.base().display()
            );
            for path in created {
                println!("  {} {}", "+".green(), path.display());
            }
        }

        Commands::Setup {
            api_key,
            provider,
            model,
        } => {
            ws.ensure()?;
            let mut config = TanukiConfig::load(&ws)?;
            if let Some(provider) = provider {
                config.llm.provider = provider.trim().to_lowercase();
            }
            if let Some(model) = model {
                config.llm.model = model.trim().to_string();
            }
            if let Some(key) = api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
                config.llm.api_key = Some(key);
                println!("{} API key saved", "OK".green().bold());
            } else if config.llm.provider == "openai" && config.llm.api_key.is_none() {
                println!(
                    "{} No API key stored; {} will be read from the environment",
                    "Warning:".yellow(),
                    config.llm.api_key_env
                );
            }
            config.llm.validate()?;
            config.save(&ws)?;
            println!(
                "{} Provider {} (model {})",
                "OK".green().bold(),
                config.llm.provider,
                config.llm.model
            );
        }

        Commands::Model { name } => {
            let mut config = TanukiConfig::load(&ws)?;
            match name {
                Some(name) => {
                    config.llm.model = name.trim().to_string();
                    config.llm.validate()?;
                    ws.ensure()?;
                    config.save(&ws)?;
                    println!("{} Model set -> {}", "OK".green().bold(), config.llm.model);
                }
                None => println!("Model -> {}", config.llm.model.bold()),
            }
        }

        Commands::Plan { brief, file } => {
            let brief = read_brief(brief, file.as_deref())?;
            let ctx = ws.active_project()?;
            let planner = Planner::new(llm_for(&ws, ctx.repo_path())?, Arc::new(RepoScanner::new()?));
            let outcome = planner.plan(&ctx, &brief).await?;

            if let Some(reason) = &outcome.tasks_error {
                println!("{} Tasks block unusable: {}", "Warning:".yellow(), reason);
            }
            if let Some(id) = outcome.failure_task {
                println!("  recorded as task #{id}");
            }
            println!(
                "{} Plan merged: {} added, {} updated, {} unchanged",
                "OK".green().bold(),
                outcome.report.added.len(),
                outcome.report.updated.len(),
                outcome.report.unchanged.len()
            );
            if outcome.architecture_updated {
                println!("  architecture: {}", ctx.architecture_path().display());
            }
            if outcome.context_updated {
                println!("  context:      {}", ctx.context_path().display());
            }
            println!("  tasks:        {}", ctx.tasks_path().display());
        }

        Commands::Task { action } => task_command(&ws, action).await?,

        Commands::Unblock => {
            let ctx = ws.active_project()?;
            let unblocked = build_runner(&ws, ctx)?.auto_unblock().await?;
            if unblocked.is_empty() {
                println!("No blocked task looks transient.");
            }
            for u in unblocked {
                println!("{} #{} -> todo ({})", "OK".green().bold(), u.id, u.cause);
            }
        }

        Commands::Run {
            max_tasks,
            no_pr,
            keep_going,
            dry_run,
            ignore_blocked,
            daemon,
            poll_interval,
        } => {
            let ctx = ws.active_project()?;
            if let Ok(mut registry) = ws.registry() {
                let _ = registry.touch_last_used(&ctx.project.id);
            }

            let mut options = RunOptions::default()
                .with_create_pr(!no_pr)
                .with_keep_going(keep_going)
                .with_dry_run(dry_run)
                .with_ignore_blocked(ignore_blocked);
            if let Some(max) = max_tasks {
                options = options.with_max_tasks(max);
            }
            if daemon {
                options = options.with_daemon(Duration::from_secs(poll_interval.max(1)));
            }

            let runner = build_runner(&ws, ctx)?;
            let summary = runner.run_loop(&options).await?;
            render_summary(&summary);
            if summary.stop.is_halt() {
                std::process::exit(1);
            }
        }

        Commands::Config { action } => {
            let ctx = ws.active_project()?;
            let vcs = GitCli::new(ctx.repo_path());
            let config = RunnerConfig::resolve(&ctx, &vcs)?;
            match action {
                ConfigAction::Show { json } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    } else {
                        render_config(&config);
                    }
                }
                ConfigAction::Materialize => {
                    materialize(&ctx, &config)?;
                    println!(
                        "{} Runner config written to {}",
                        "OK".green().bold(),
                        ctx.project_file().display()
                    );
                }
            }
        }

        Commands::Doctor => {
            let work_dir = ws
                .active_project()
                .map(|ctx| ctx.repo_path().to_path_buf())
                .unwrap_or_else(|_| ws.home().to_path_buf());
            let llm = llm_for(&ws, &work_dir)?;
            let checks = run_doctor(&ws, llm.as_ref()).await;

            let mut failed = false;
            for check in &checks {
                if check.ok {
                    println!("{} {}", "OK".green().bold(), check.message);
                } else {
                    failed = true;
                    println!("{} {}", "FAIL".red().bold(), check.message);
                }
            }
            if failed {
                println!("\n{}", "Some checks failed.".yellow());
                std::process::exit(1);
            }
            println!("\n{}", "All checks passed.".green());
        }
    }

    Ok(())
}

// =============================================================================
// Wiring
// =============================================================================

fn llm_for(ws: &Workspace, work_dir: &Path) -> anyhow::Result<Arc<dyn LlmClient>> {
    let config = TanukiConfig::load(ws)?;
    Ok(create_llm_client(&config.llm, work_dir)?)
}

fn build_runner(ws: &Workspace, ctx: ProjectContext) -> anyhow::Result<Runner> {
    let repo = ctx.repo_path().to_path_buf();
    let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new(&repo));
    let config = RunnerConfig::resolve(&ctx, vcs.as_ref())?;
    let deps = RunnerDeps {
        pr: create_pr_host(&config.pr_provider, &repo)?,
        llm: llm_for(ws, &repo)?,
        snapshot: Arc::new(RepoScanner::new()?),
        vcs,
    };
    Ok(Runner::new(ctx, config, deps))
}

fn read_brief(brief: Option<String>, file: Option<&Path>) -> anyhow::Result<String> {
    let text = match (brief, file) {
        (_, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read brief from {}", path.display()))?,
        (Some(brief), None) => brief,
        (None, None) => {
            return Err(TanukiError::validation("a brief is required (argument or --file)").into())
        }
    };
    Ok(text)
}

// =============================================================================
// Subcommands
// =============================================================================

fn project_command(ws: &Workspace, action: ProjectAction) -> anyhow::Result<()> {
    let mut registry = ws.registry()?;
    match action {
        ProjectAction::Add { name, path, no_use } => {
            ws.ensure()?;
            let project = registry.add(&name, &path)?;
            println!(
                "{} Registered {} -> {}",
                "OK".green().bold(),
                project.id.bold(),
                project.repo_path.display()
            );
            if !no_use {
                registry.set_active(&project.id)?;
                println!("  active project: {}", project.id);
            }
        }

        ProjectAction::List => {
            let active = registry.active_id()?;
            let projects = registry.list();
            if projects.is_empty() {
                println!("No projects registered. Run: tanuki project add <name> --path <repo>");
            }
            for project in projects {
                let marker = if active.as_deref() == Some(project.id.as_str()) {
                    "*".green().bold().to_string()
                } else {
                    " ".to_string()
                };
                println!(
                    "{} {:<20} {:<24} {}",
                    marker,
                    project.id.cyan(),
                    project.name,
                    project.repo_path.display().to_string().dimmed()
                );
            }
        }

        ProjectAction::Use { id } => {
            registry.set_active(&id)?;
            registry.touch_last_used(&id)?;
            println!("{} Active project: {}", "OK".green().bold(), id);
        }

        ProjectAction::Show { id } => {
            let ctx = match id {
                Some(id) => ws.project(&id)?,
                None => ws.active_project()?,
            };
            let p = &ctx.project;
            println!("{} {}", p.id.cyan().bold(), p.name);
            println!("{} {}", "repo:".dimmed(), p.repo_path.display());
            println!("{} {}", "workspace:".dimmed(), ctx.base().display());
            println!("{} {}", "created:".dimmed(), p.created_at.to_rfc3339());
            if let Some(used) = p.last_used_at {
                println!("{} {}", "last used:".dimmed(), used.to_rfc3339());
            }
            println!(
                "{} {}",
                "initialized:".dimmed(),
                if ctx.is_initialized() { "yes" } else { "no" }
            );
        }

        ProjectAction::Remove { id } => {
            let project = registry.remove(&id)?;
            println!(
                "{} Removed {} (repository at {} untouched)",
                "OK".green().bold(),
                project.id,
                project.repo_path.display()
            );
        }

        ProjectAction::Rename { id, name } => {
            registry.rename(&id, &name)?;
            println!("{} Renamed {} -> {}", "OK".green().bold(), id, name.trim());
        }

        ProjectAction::SetPath { id, path } => {
            registry.update_path(&id, &path)?;
            println!("{} Updated repository path for {}", "OK".green().bold(), id);
        }
    }
    Ok(())
}

async fn task_command(ws: &Workspace, action: TaskAction) -> anyhow::Result<()> {
    let ctx = ws.active_project()?;
    let store = ctx.store();
    match action {
        TaskAction::List {
            status,
            priority,
            tag,
            json,
        } => {
            let backlog = store.load()?;
            let filter = TaskFilter {
                status,
                priority,
                tag,
            };
            let tasks = backlog.filter(&filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
                return Ok(());
            }
            if tasks.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            println!(
                "{:>4}  {:<8} {:<4} {:<50} {}",
                "ID".bold(),
                "STATUS".bold(),
                "PRIO".bold(),
                "TITLE".bold(),
                "UPDATED".bold()
            );
            for task in tasks {
                println!(
                    "{:>4}  {:<8} {:<4} {:<50} {}",
                    task.id.to_string().cyan(),
                    colored_status(task.status),
                    task.priority.to_string(),
                    task.title,
                    task.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
                );
            }
        }

        TaskAction::Show { id } => {
            let backlog = store.load()?;
            let task = backlog
                .get(id)
                .ok_or_else(|| TanukiError::validation(format!("Task {id} not found")))?;
            render_task(task);
        }

        TaskAction::Add { brief, file } => {
            let brief = read_brief(brief, file.as_deref())?;
            let planner = Planner::new(llm_for(ws, ctx.repo_path())?, Arc::new(RepoScanner::new()?));
            let added = planner.add_tasks(&ctx, &brief).await?;
            let backlog = store.load()?;
            println!("{} {} task(s) appended", "OK".green().bold(), added.len());
            for id in added {
                if let Some(task) = backlog.get(id) {
                    println!("  #{} [{}] {}", task.id, task.priority, task.title);
                }
            }
        }

        TaskAction::Status { id, status, reason } => {
            let task = store.set_status(id, status, reason.as_deref())?;
            println!(
                "{} Task #{} is now {}",
                "OK".green().bold(),
                task.id,
                colored_status(task.status)
            );
        }
    }
    Ok(())
}

// =============================================================================
// Rendering
// =============================================================================

fn colored_status(status: Status) -> colored::ColoredString {
    let text = format!("{:<8}", status.as_str());
    match status {
        Status::Todo => text.normal(),
        Status::Doing => text.cyan(),
        Status::Review => text.blue(),
        Status::Blocked => text.red(),
        Status::Done => text.green(),
        Status::Skipped => text.dimmed(),
    }
}

fn render_task(task: &Task) {
    println!("{} {}", format!("#{}", task.id).cyan().bold(), task.title.bold());
    println!(
        "{} {}   {} {}",
        "status:".dimmed(),
        colored_status(task.status),
        "priority:".dimmed(),
        task.priority
    );
    let tags = if task.tags.is_empty() {
        "-".to_string()
    } else {
        task.tags.join(", ")
    };
    println!("{} {}", "tags:".dimmed(), tags);
    println!("{} {}", "created:".dimmed(), task.created_at.to_rfc3339());
    println!("{} {}", "updated:".dimmed(), task.updated_at.to_rfc3339());
    if let Some(started) = task.started_at {
        println!("{} {}", "started:".dimmed(), started.to_rfc3339());
    }
    if let Some(done) = task.done_at {
        println!("{} {}", "done:".dimmed(), done.to_rfc3339());
    }
    if let Some(reason) = &task.blocked_reason {
        println!("{} {}", "blocked_reason:".dimmed(), reason.red());
    }
    println!();
    if task.description.is_empty() {
        println!("{}", "(no description)".dimmed());
    } else {
        println!("{}", task.description);
    }
}

fn render_config(config: &RunnerConfig) {
    println!("{} {}", "base_branch:".dimmed(), config.base_branch);
    println!("{} {}", "remote:".dimmed(), config.remote);
    println!(
        "{} {} (base {}, draft {})",
        "pr:".dimmed(),
        config.pr_provider,
        config.pr_base,
        config.pr_draft
    );
    if config.checks.is_empty() {
        println!("{} none", "checks:".dimmed());
    } else {
        println!("{}", "checks:".dimmed());
        for check in &config.checks {
            println!("  - {check}");
        }
    }
    println!("{} {}m", "stale_doing:".dimmed(), config.stale_doing_minutes);
    if !config.detected.is_empty() {
        println!(
            "{} auto-detected: {} (run `tanuki config materialize` to pin)",
            "Note:".yellow(),
            config.detected.join(", ")
        );
    }
}

fn render_summary(summary: &tanuki::LoopSummary) {
    for id in &summary.recovered {
        println!("{} Task #{} was stale in doing; reset to todo", "Warning:".yellow(), id);
    }
    for u in &summary.unblocked {
        println!("{} Task #{} unblocked ({})", "OK".green().bold(), u.id, u.cause);
    }

    for pass in &summary.passes {
        match &pass.result {
            Ok(PassOutcome::Completed(report)) => {
                println!(
                    "{} Task #{}: {} -> {}",
                    "OK".green().bold(),
                    report.task_id,
                    report.title,
                    colored_status(report.status)
                );
                println!("  {} {} (from {})", "branch:".dimmed(), report.branch, report.base);
                match &report.change {
                    ChangeSource::LocalAction(name) => {
                        println!("  {} local action {}", "change:".dimmed(), name);
                    }
                    ChangeSource::Patch { attempts } => {
                        println!("  {} patch ({} attempt(s))", "change:".dimmed(), attempts);
                    }
                }
                if !report.committed {
                    println!("  {} nothing to commit", "commit:".dimmed());
                }
                if let Some(pr) = &report.pr {
                    println!("  {} {}", "pr:".dimmed(), pr);
                }
                println!("  {} {}", "run:".dimmed(), report.run_dir.display());
            }
            Ok(PassOutcome::DryRun {
                task_id,
                branch,
                run_dir,
            }) => {
                println!("{} Task #{} would run on {}", "Dry run:".cyan().bold(), task_id, branch);
                println!("  {} {}", "run:".dimmed(), run_dir.display());
            }
            Ok(PassOutcome::NoTodo) => {}
            Err(reason) => {
                println!("{} Task #{} blocked", "FAIL".red().bold(), pass.task_id);
                for line in reason.lines().take(6) {
                    println!("  {}", line.dimmed());
                }
            }
        }
    }

    match &summary.stop {
        StopReason::NoTodo => println!("\nNo runnable tasks left."),
        StopReason::Ceiling => println!("\nTask limit reached."),
        StopReason::DryRun => println!("\nDry run finished."),
        StopReason::Failure { task_id, .. } => {
            println!("\n{} Stopped after task #{} failed.", "Error:".red().bold(), task_id);
        }
        StopReason::OnlyBlocked { blocked } => {
            println!("\n{} Only blocked tasks remain:", "Warning:".yellow());
            for b in blocked {
                let reason = b.reason.lines().next().unwrap_or_default();
                println!("  #{} [{}] {} - {}", b.id, b.priority, b.title, reason.dimmed());
            }
            println!("Fix the causes, then: tanuki task status <id> todo");
        }
    }
}

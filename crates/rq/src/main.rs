mod config;
mod logging;
mod output;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rq_client::wait::{DaemonJobs, GitRefs, WaitArgs, run_wait};
use rq_client::{ClientError, DaemonClient};
use rq_core::Settings;
use rq_core::agent::AgentRegistry;
use rq_core::types::{EnqueueRequest, JobId, JobStatus};
use rq_git::{GitBackend, GitCli};
use rq_serve::{AppState, run_daemon};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "rq", version, about = "Queue and track code review jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the worker pool
    Daemon {
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Queue a review of a commit
    Enqueue {
        #[arg(default_value = "HEAD")]
        git_ref: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        reasoning: Option<String>,
        /// Extra agent option, repeatable
        #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },
    /// Wait for review jobs to finish; exits 0 only if every review passed
    Wait {
        /// Job ids or git refs (default: HEAD)
        args: Vec<String>,
        /// Git ref to find the most recent job for
        #[arg(long)]
        sha: Option<String>,
        /// Treat every argument as a job id
        #[arg(long)]
        job: bool,
        #[arg(short, long)]
        quiet: bool,
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Cancel a queued or running job
    Cancel { job_id: JobId },
    /// Show a job with its review and comments
    Show { job_id: JobId },
    /// Comment on a job
    Comment {
        job_id: JobId,
        #[arg(long = "by")]
        responder: String,
        text: String,
    },
    /// Queue a fix for a reviewed job
    Fix {
        job_id: JobId,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Apply a finished fix job's patch to the repository
    Apply { job_id: JobId },
    /// Queue a fresh fix job in place of a stale one
    Rerun { job_id: JobId },
    /// Job counts per status
    Status,
    /// Read or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {raw}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = match cli.command {
        Command::Daemon { .. } => logging::DAEMON_FILTER,
        _ => logging::CLIENT_FILTER,
    };
    logging::init(filter);

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Config { action } => run_config(action),
        Command::Daemon { addr, workers } => daemon(config::load()?, addr, workers).await,
        Command::Enqueue {
            git_ref,
            agent,
            model,
            reasoning,
            options,
        } => {
            let (client, settings) = connect()?;
            let git = GitCli::new();
            let cwd = std::env::current_dir()?;
            let repo = git.main_repo_root(&cwd).context("not in a git repository")?;
            let sha = git.resolve_sha(&repo, &git_ref)?;
            let info = git.commit_info(&repo, &sha)?;
            let job = client
                .enqueue(&EnqueueRequest {
                    repo_path: repo,
                    git_ref,
                    commit_sha: Some(info.sha),
                    commit_author: Some(info.author),
                    commit_subject: Some(info.subject),
                    agent,
                    model,
                    reasoning,
                    options: options.into_iter().collect::<BTreeMap<_, _>>(),
                    source_machine_id: Some(settings.machine_id.clone()),
                    ..EnqueueRequest::default()
                })
                .await?;
            println!("Enqueued {}", output::job_line(&job));
            Ok(ExitCode::SUCCESS)
        }
        Command::Wait {
            args,
            sha,
            job,
            quiet,
            timeout,
        } => {
            let (client, _) = connect()?;
            let git: Arc<dyn GitBackend> = Arc::new(GitCli::new());
            let refs = GitRefs::new(git, std::env::current_dir()?);
            let source = Arc::new(DaemonJobs::new(client, refs.main_root()));
            let args = WaitArgs {
                args,
                sha,
                force_job: job,
                quiet,
                timeout: timeout.map(Duration::from_secs),
            };
            let mut out = std::io::stdout();
            let code = run_wait(&args, &refs, source, &mut out).await;
            Ok(if code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Cancel { job_id } => {
            let (client, _) = connect()?;
            match client.cancel(job_id).await {
                Ok(job) => {
                    println!("Canceled {}", output::job_line(&job));
                    Ok(ExitCode::SUCCESS)
                }
                Err(ClientError::NotFound { .. }) => {
                    println!("Job {job_id} not found or already finished");
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::Show { job_id } => {
            let (client, _) = connect()?;
            let job = client.job(job_id).await?;
            let comments = client.comments(job_id).await?;
            println!("{}", output::job_details(&job, &comments));
            Ok(ExitCode::SUCCESS)
        }
        Command::Comment {
            job_id,
            responder,
            text,
        } => {
            let (client, _) = connect()?;
            let comment = client
                .comment(job_id, &responder, &text)
                .await?;
            println!("Added comment {} to job {job_id}", comment.id);
            Ok(ExitCode::SUCCESS)
        }
        Command::Fix { job_id, agent } => {
            let (client, settings) = connect()?;
            let parent = client.job(job_id).await?.job;
            if parent.is_fix_job() {
                bail!("job {job_id} is itself a fix job");
            }
            if parent.status != JobStatus::Done {
                bail!("job {job_id} is {}; only finished reviews can be fixed", parent.status);
            }
            let job = client
                .enqueue(&EnqueueRequest {
                    repo_path: parent.repo_path.clone(),
                    // The fix tracks HEAD so `apply` notices when the branch moves on.
                    git_ref: "HEAD".to_string(),
                    commit_sha: parent.commit_sha.clone(),
                    agent: agent.or(Some(parent.agent)),
                    model: parent.model,
                    reasoning: parent.reasoning,
                    options: parent.options,
                    parent_job_id: Some(job_id),
                    source_machine_id: Some(settings.machine_id.clone()),
                    ..EnqueueRequest::default()
                })
                .await?;
            println!("Enqueued {}", output::job_line(&job));
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply { job_id } => {
            let job = connect()?.0.apply(job_id).await?;
            println!("Applied {}", output::job_line(&job));
            Ok(ExitCode::SUCCESS)
        }
        Command::Rerun { job_id } => {
            let job = connect()?.0.rerun(job_id).await?;
            println!("Enqueued {} in place of job {job_id}", output::job_line(&job));
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let status = connect()?.0.status().await?;
            println!("{}", output::queue_status(&status));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn connect() -> Result<(DaemonClient, Settings)> {
    let settings = config::load()?;
    let client = DaemonClient::new(&settings.daemon_addr)?;
    Ok((client, settings))
}

async fn daemon(
    mut settings: Settings,
    addr: Option<String>,
    workers: Option<usize>,
) -> Result<ExitCode> {
    if let Some(addr) = addr {
        settings.set("daemon_addr", &addr)?;
    }
    if let Some(workers) = workers {
        settings.set("max_workers", &workers.to_string())?;
    }
    if let Some(parent) = settings.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let agents = AgentRegistry::from_settings(&settings)?;
    tracing::info!(agents = ?agents.names(), db = %settings.db_path.display(), "starting daemon");
    let listener = TcpListener::bind(settings.daemon_addr.as_str())
        .await
        .with_context(|| format!("bind {}", settings.daemon_addr))?;
    let state = AppState::new(settings, Arc::new(GitCli::new()))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        on_signal.cancel();
    });

    run_daemon(state, agents, listener, shutdown).await?;
    Ok(ExitCode::SUCCESS)
}

fn run_config(action: ConfigCommand) -> Result<ExitCode> {
    let path: PathBuf = config::config_path();
    match action {
        ConfigCommand::Get { key } => {
            let settings = config::load()?;
            println!("{}", settings.get(&key)?);
        }
        ConfigCommand::Set { key, value } => {
            config::set_key(&path, &key, &value)?;
            // Re-read so a value that clashes with the rest of the file is reported now.
            config::load()?;
        }
        ConfigCommand::List => {
            let settings = config::load()?;
            for (key, value) in settings.list() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

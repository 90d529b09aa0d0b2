use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

use helix_outreach::backend::HttpBackend;
use helix_outreach::notify::{Notice, NoticeLevel, Notifier};
use helix_outreach::realtime::{FeedStatus, SseFeed, Subscription};
use helix_outreach::session::{Message, Role};
use helix_outreach::settings::{resolve_config, ConfigOverrides};
use helix_outreach::transport::Transport;
use helix_outreach::{AppConfig, Page, Route};

#[derive(Debug, Parser)]
#[command(name = "helix")]
#[command(about = "Recruiting outreach assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the assistant page in the terminal.
    Chat {
        #[arg(long, default_value = "/")]
        route: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the resolved configuration as JSON.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    user: Option<String>,
    /// Talk to the LLM provider directly instead of the backend.
    #[arg(long)]
    no_backend: bool,
    /// Use the OpenAI-compatible provider for the fallback path.
    #[arg(long)]
    openai: bool,
    #[arg(long)]
    debug: bool,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<AppConfig> {
        let file = match &self.config {
            Some(path) => ConfigOverrides::from_file(path)?,
            None => ConfigOverrides::default(),
        };
        let cli = ConfigOverrides {
            api_base_url: self.api_url.clone(),
            user_id: self.user.clone(),
            use_backend_api: self.no_backend.then_some(false),
            use_anthropic: self.openai.then_some(false),
            debug_mode: self.debug.then_some(true),
            ..ConfigOverrides::default()
        };
        let config = resolve_config(&file, &ConfigOverrides::from_env(), &cli);
        config.validate()?;
        Ok(config)
    }
}

const HELP: &str = "commands: /save /add /remove <id> /edit <n> <text> /title <text> /position <text> /list /open <id> /delete <id> /user <id> /reset /clear /show /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (Commands::Chat { config, .. } | Commands::Config { config }) = &cli.command;
    let config = config.resolve()?;

    let default_level = if config.features.debug_mode { "debug" } else { "warn" };
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat { route, .. } => run_chat(config, &route).await?,
        Commands::Config { .. } => {
            let mut shown = config.clone();
            for provider in [&mut shown.openai, &mut shown.anthropic] {
                if provider.api_key.is_some() {
                    provider.api_key = Some("<redacted>".into());
                }
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }
    Ok(())
}

async fn run_chat(config: AppConfig, route: &str) -> anyhow::Result<()> {
    let transport = Transport::from_config(&config)?;
    // the transport client's request timeout would cut the event stream
    let feed = Arc::new(SseFeed::new(config.events_url(), reqwest::Client::new()));
    let (notifier, mut notices) = Notifier::channel();
    let mut page = Page::new(&config, Arc::new(HttpBackend::new(transport)), notifier);

    page.start().await;
    if page.open(Route::parse(route)).await == Route::NotFound {
        println!("nothing at {}, showing the home page", route);
    }
    println!("{}", HELP);

    let (subscription, mut status) = Subscription::spawn(feed, config.realtime.max_reconnect_attempts);
    let mut pushes = subscription.subscribe();
    let mut live = true;
    let mut poll = tokio::time::interval(config.realtime.poll_interval());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    loop {
        printed = print_messages(page.chat.messages(), printed);
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut page, line.trim()).await {
                    break;
                }
            }
            ev = pushes.recv(), if live => match ev {
                Ok(ev) => {
                    let report = page.handle_push(&ev);
                    debug!(?report, "push handled");
                }
                Err(RecvError::Lagged(n)) => warn!(n, "push events skipped"),
                Err(RecvError::Closed) => live = false,
            },
            Some(st) = status.recv() => {
                if st == FeedStatus::Degraded {
                    page.feed_degraded();
                    println!("[live updates unavailable, polling every {:?}]", config.realtime.poll_interval());
                }
            }
            _ = poll.tick() => {
                page.poll().await;
            }
            Some(notice) = notices.recv() => print_notice(&notice),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    drop(subscription);
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(page: &mut Page, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let Some(command) = line.strip_prefix('/') else {
        page.submit(line).await;
        print_draft(page);
        return true;
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "quit" | "exit" => return false,
        "save" => match page.save().await {
            Ok(id) => println!("saved as {}", id),
            Err(e) => debug!(error = %e, "save failed"),
        },
        "add" => println!("added step {}", page.sequence.add_step()),
        "remove" => {
            if !page.sequence.remove_step(rest) {
                println!("no step {}", rest);
            }
        }
        "edit" => edit_step(page, rest),
        "title" => page.sequence.set_title(rest),
        "position" => page.sequence.set_position(rest),
        "list" => {
            let user = page.user_id().to_string();
            page.directory.list_for_user(&user).await;
            for seq in page.directory.entries() {
                println!("  {}  {} ({} steps)", seq.id, seq.title, seq.steps.len());
            }
        }
        "open" => {
            if page.select(rest).await {
                print_draft(page);
            }
        }
        "delete" => {
            if let Err(e) = page.delete(rest).await {
                debug!(error = %e, "delete failed");
            }
        }
        "user" if !rest.is_empty() => page.set_user(rest).await,
        "reset" => page.sequence.reset(),
        "clear" => page.chat.clear(),
        "show" => print_draft(page),
        _ => println!("{}", HELP),
    }
    true
}

fn edit_step(page: &mut Page, args: &str) {
    let (n, text) = args.split_once(' ').unwrap_or((args, ""));
    let Some(index) = n.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) else {
        println!("usage: /edit <n> <text>");
        return;
    };
    let Some(mut step) = page.sequence.steps().get(index).cloned() else {
        println!("no step {}", n);
        return;
    };
    step.content = text.trim().to_string();
    if let Err(e) = page.sequence.update_step(index, step) {
        println!("{}", e);
    }
}

fn print_messages(messages: &[Message], from: usize) -> usize {
    for m in messages.iter().skip(from) {
        match m.role {
            Role::User => println!("you> {}", m.content),
            Role::Assistant => println!("helix> {}", m.content),
            Role::System => println!("  * {}", m.content),
        }
    }
    messages.len()
}

fn print_notice(notice: &Notice) {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    println!("[{}] {}", tag, notice.text);
}

fn print_draft(page: &Page) {
    let seq = &page.sequence;
    if seq.steps().is_empty() {
        return;
    }
    println!(
        "== {} | {} | {} | {:?}",
        if seq.title().is_empty() { "(untitled)" } else { seq.title() },
        if seq.position().is_empty() { "(no position)" } else { seq.position() },
        seq.id().unwrap_or("unsaved"),
        seq.state()
    );
    for (i, step) in seq.steps().iter().enumerate() {
        let mark = if step.highlight { "*" } else { " " };
        println!("{}{}. {} [{}]\n     {}", mark, i + 1, step.title, step.id, step.content.replace('\n', "\n     "));
    }
}

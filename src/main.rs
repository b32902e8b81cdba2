//! Topical CLI - subscribe to topics and invoke actions from the terminal.
//!
//! Values are printed to stdout as one JSON document per line; logs go to
//! stderr (`RUST_LOG` controls verbosity).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use topical::{Config, Listener, Session, Topic, Value};

/// How long `execute` and `notify` wait for the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "topical")]
#[command(version)]
#[command(about = "Subscribe to live topics and invoke actions over a topical WebSocket")]
struct Cli {
    /// Server URL (overrides the config file and TOPICAL_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that open a session.
#[derive(Subcommand)]
enum SessionCommand {
    /// Subscribe to a topic and print every value it takes
    Subscribe {
        #[command(flatten)]
        topic: TopicArgs,
        /// Exit after this many values
        #[arg(long)]
        count: Option<usize>,
    },
    /// Invoke an action and print its result
    Execute {
        #[command(flatten)]
        topic: TopicArgs,
        /// Action name
        #[arg(long)]
        action: String,
        /// Positional argument as JSON (repeatable)
        #[arg(long = "arg", value_name = "JSON", value_parser = parse_json)]
        args: Vec<serde_json::Value>,
    },
    /// Send an action without waiting for a reply
    Notify {
        #[command(flatten)]
        topic: TopicArgs,
        /// Action name
        #[arg(long)]
        action: String,
        /// Positional argument as JSON (repeatable)
        #[arg(long = "arg", value_name = "JSON", value_parser = parse_json)]
        args: Vec<serde_json::Value>,
    },
}

#[derive(Args)]
struct TopicArgs {
    /// Topic path segments
    #[arg(required = true)]
    segments: Vec<String>,
    /// Topic parameter (repeatable)
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

impl TopicArgs {
    fn topic(&self) -> Result<Topic> {
        let mut topic = Topic::new(self.segments.iter().cloned())?;
        for (name, value) in &self.params {
            topic = topic.with_param(name, value);
        }
        Ok(topic)
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON `{raw}`: {e}"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.url {
        config.url = url;
    }

    match cli.command {
        Commands::Config => {
            let dir = Config::config_dir()?;
            eprintln!("# {}", dir.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Session(command) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(run(command, &config))
        }
    }
}

async fn run(command: SessionCommand, config: &Config) -> Result<()> {
    let session = Session::from_config(config);

    let result = tokio::select! {
        () = session.run() => Err(anyhow!("session stopped unexpectedly")),
        result = execute_command(&session, command) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            log::info!("Interrupted");
            Ok(())
        }
    };

    session.close();
    result
}

/// What the subscribe listener reports back to the print loop.
enum Received {
    Value(serde_json::Value),
    Failed(serde_json::Value),
}

async fn execute_command(session: &Session, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Subscribe { topic, count } => {
            let topic = topic.topic()?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let errors = tx.clone();
            let listener = Listener::new(move |value: &Value| {
                let _ = tx.send(Received::Value(value.to_json()));
            })
            .on_error(move |error| {
                let _ = errors.send(Received::Failed(error.clone()));
            });
            let subscription = session.subscribe(&topic, listener)?;

            let mut printed = 0;
            while let Some(received) = rx.recv().await {
                match received {
                    Received::Value(value) => {
                        println!("{}", serde_json::to_string(&value)?);
                        printed += 1;
                        if count.is_some_and(|limit| printed >= limit) {
                            break;
                        }
                    }
                    Received::Failed(error) => bail!("subscription to {topic} failed: {error}"),
                }
            }
            subscription.unsubscribe();
            Ok(())
        }
        SessionCommand::Execute {
            topic,
            action,
            args,
        } => {
            let topic = topic.topic()?;
            wait_connected(session).await?;
            let value = session
                .execute(&topic, &action, &args)?
                .await
                .with_context(|| format!("`{action}` on {topic} failed"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        SessionCommand::Notify {
            topic,
            action,
            args,
        } => {
            let topic = topic.topic()?;
            wait_connected(session).await?;
            session.notify(&topic, &action, &args)?;
            log::info!("Sent `{action}` to {topic}");
            Ok(())
        }
    }
}

async fn wait_connected(session: &Session) -> Result<()> {
    tokio::time::timeout(CONNECT_TIMEOUT, session.until_connected())
        .await
        .with_context(|| format!("Timed out connecting to {}", session.url()))?
        .context("Session closed before connecting")
}

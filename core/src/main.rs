use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipstack::config::Config;
use clipstack::daemon::{self, Daemon};
use clipstack::ipc::{self, Command};
use clipstack::item::ItemId;
use tokio::signal;

#[derive(Parser)]
#[command(name = "clipstack")]
#[command(version)]
#[command(about = "clipboard history with pinning and search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clipboard daemon
    Daemon,
    /// Print clipboard history for rofi
    Print {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Copy a history item back to the clipboard (reads a line from stdin if no id)
    Copy {
        /// Item id or a printed history line ending in #id
        #[arg(trailing_var_arg = true)]
        selection: Vec<String>,
    },
    /// Pin an item
    Pin { id: ItemId },
    /// Unpin an item
    Unpin { id: ItemId },
    /// Delete an item
    Delete { id: ItemId },
    /// Clear unpinned history
    Clear {
        /// Remove pinned items too
        #[arg(long)]
        all: bool,
    },
    /// Do not record the next copy
    IgnoreNext,
    /// Stop recording copies
    Pause,
    /// Resume recording copies
    Resume,
    /// Rewrite the most recent copy with a configured prompt
    Reword {
        #[arg(default_value_t = 0)]
        prompt: usize,
    },
}

/// Accepts `42`, `#42` or a whole printed line whose last word is `#42`.
fn parse_selection(selection: &str) -> Result<ItemId> {
    let last = selection.split_whitespace().last().unwrap_or_default();
    last.parse()
        .with_context(|| format!("no item id in {:?}", selection))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    let sock_path = ipc::socket_path();

    let command = match cli.command {
        Commands::Daemon => {
            #[cfg(target_os = "linux")]
            {
                if std::env::var("DISPLAY").is_err() && std::env::var("WAYLAND_DISPLAY").is_err() {
                    anyhow::bail!("No display server available (neither X11 nor Wayland)");
                }
            }

            let daemon = Daemon::open(config)?;
            daemon
                .run(&sock_path, async {
                    let _ = signal::ctrl_c().await;
                    log::info!("shutting down");
                })
                .await?;
            return Ok(());
        }
        Commands::Print { json } => {
            for line in daemon::history_lines(&config, json)? {
                println!("{}", line);
            }
            return Ok(());
        }
        Commands::Copy { selection } => {
            let selection = if selection.is_empty() {
                use std::io::{self, Read};
                let mut buffer = String::new();
                io::stdin().read_to_string(&mut buffer)?;
                buffer.trim().to_string()
            } else {
                selection.join(" ")
            };

            if selection.is_empty() {
                return Ok(());
            }
            Command::Copy(parse_selection(&selection)?)
        }
        Commands::Pin { id } => Command::Pin(id),
        Commands::Unpin { id } => Command::Unpin(id),
        Commands::Delete { id } => Command::Delete(id),
        Commands::Clear { all: false } => Command::Clear,
        Commands::Clear { all: true } => Command::ClearAll,
        Commands::IgnoreNext => Command::IgnoreNext,
        Commands::Pause => Command::Pause,
        Commands::Resume => Command::Resume,
        Commands::Reword { prompt } => Command::Reword(prompt),
    };

    ipc::send_command(&command, &sock_path).await
}

//! jt808-cli - Operator command-line interface for jt808d
//!
//! Provides both a REPL and one-shot command execution against the
//! gateway's control socket.

mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jt808-cli")]
#[command(about = "Operator interface for the jt808d vehicle terminal gateway")]
#[command(version)]
struct Cli {
    /// Control socket path
    #[arg(short, long, default_value = "/tmp/jt808d.sock", env = "JT808_CONTROL_SOCKET")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send one command line, e.g. `send 013812345678 get startup`
    Send {
        /// Command tokens: <phone> <verb> [args...]
        #[arg(required = true)]
        words: Vec<String>,
    },
}

/// Sends one command line over a fresh control connection and returns the
/// single-line reply. The gateway closes the connection after each
/// exchange.
pub(crate) async fn send_command(
    socket: &PathBuf,
    line: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = UnixStream::connect(socket).await?;
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Send { words }) => {
            let line = words.join(" ");
            match send_command(&cli.socket, &line).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => {
                    eprintln!("{}: {}", "error".red(), e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Repl) | None => repl::run(&cli.socket).await?,
    }
    Ok(())
}

use std::io::{BufRead, Read, Write};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::debug;

use mlyn::protocol::Session;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Raise log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Answer a single request read from stdin.
    Single,
    /// Serve requests line by line until stdin closes.
    Server,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).context("failed to initialize logging")?;

    match args.command {
        Cmd::Single => single(),
        Cmd::Server => server(),
    }
}

fn single() -> anyhow::Result<()> {
    let mut request = String::new();
    std::io::stdin()
        .lock()
        .read_to_string(&mut request)
        .context("failed to read request")?;

    let mut session = Session::new();
    let response = session.dispatch_line(request.trim());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response).context("failed to write response")?;
    writeln!(out)?;
    Ok(())
}

fn server() -> anyhow::Result<()> {
    debug!("starting server loop");
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut session = Session::new();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = session.dispatch_line(&line);

        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &response).context("failed to write response")?;
        writeln!(out)?;
        out.flush()?;
    }

    debug!("stdin closed, shutting down");
    Ok(())
}

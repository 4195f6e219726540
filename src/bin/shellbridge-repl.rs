//! Minimal interactive harness for manual testing: reads commands from
//! stdin, prints the session's events, and answers secret prompts from
//! the terminal. Not a caller-facing surface.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use shellbridge::{Config, EventSink, ExecuteOutcome, KernelEvent, SecretProvider, Session};
use tracing_subscriber::EnvFilter;

struct StdoutSink;

impl EventSink for StdoutSink {
    fn send(&mut self, event: KernelEvent) {
        match event {
            KernelEvent::Stream { text } => {
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            KernelEvent::Display {
                kind, display_id, ..
            } => {
                println!("[display {:?} id={:?}]", kind, display_id);
            }
            KernelEvent::UpdateDisplay {
                kind, display_id, ..
            } => {
                println!("[update {:?} id={}]", kind, display_id);
            }
        }
    }
}

struct StdinSecrets;

impl SecretProvider for StdinSecrets {
    fn get_secret(&mut self, prompt: &str) -> String {
        eprint!("{}", prompt);
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
        line.trim_end_matches(['\r', '\n']).to_string()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = Config::load()?;
    let mut session = Session::start(config, Box::new(StdinSecrets))?;
    let mut sink = StdoutSink;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let outcome = session.execute(&line?, false, &mut sink)?;
        match outcome {
            ExecuteOutcome::Ok => {}
            other => eprintln!("[{:?}]", other),
        }
    }
    Ok(())
}

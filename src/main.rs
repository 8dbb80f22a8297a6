//! wirekit - schema checker
//!
//! Usage:
//!   wirekit [check|dump] [FILES...]
//!
//! Tanpa FILES, protocol bawaan (`protocols/*.wire`) yang diperiksa.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use wirekit::schema::{Direction, Interface, MessageDef};
use wirekit::{protocols, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Check,
    Dump,
}

fn parse_args() -> Result<(Command, Vec<PathBuf>)> {
    let mut args = std::env::args().skip(1).peekable();
    let first = args.peek().cloned();
    let command = match first.as_deref() {
        Some("check") => Command::Check,
        Some("dump") => Command::Dump,
        Some("--help") | Some("-h") => {
            print_help();
            std::process::exit(0);
        }
        Some(other) if other.starts_with('-') => bail!("unknown option: {}", other),
        _ => {
            // Default: check, argumen pertama sudah file
            return Ok((Command::Check, args.map(PathBuf::from).collect()));
        }
    };
    args.next();
    Ok((command, args.map(PathBuf::from).collect()))
}

fn print_help() {
    println!("wirekit - protocol schema checker");
    println!();
    println!("Usage: wirekit [check|dump] [FILES...]");
    println!();
    println!("Commands:");
    println!("  check    Validate schemas, one summary line per interface (default)");
    println!("  dump     Print every message with opcode, since and field types");
    println!();
    println!("Without FILES the bundled protocols are used.");
}

fn load(files: &[PathBuf]) -> Result<Schema> {
    if files.is_empty() {
        return Ok(protocols::bundled()?);
    }
    Ok(Schema::load(files)?)
}

fn print_message(msg: &MessageDef) {
    let mut line = format!("  {} {} {}", msg.direction, msg.opcode, msg.name);
    if msg.since > 1 {
        line.push_str(&format!(" (since {})", msg.since));
    }
    if msg.destructor {
        line.push_str(" (destructor)");
    }
    let fields: Vec<String> = msg
        .fields
        .iter()
        .map(|f| format!("{}: {}", f.name, f.ty))
        .collect();
    println!("{} {{ {} }}", line, fields.join(", "));
}

fn summary(iface: &Interface) -> String {
    format!(
        "{} v{}: {} requests, {} events",
        iface.name,
        iface.version,
        iface.messages(Direction::Request).len(),
        iface.messages(Direction::Event).len()
    )
}

fn run() -> Result<()> {
    let (command, files) = parse_args()?;
    let schema = load(&files)?;

    for iface in schema.interfaces() {
        match command {
            Command::Check => println!("{}", summary(iface)),
            Command::Dump => {
                println!("interface {} (version {})", iface.name, iface.version);
                for msg in iface
                    .messages(Direction::Request)
                    .iter()
                    .chain(iface.messages(Direction::Event))
                {
                    print_message(msg);
                }
            }
        }
    }
    if command == Command::Check {
        println!("ok: {} interfaces", schema.interfaces().len());
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

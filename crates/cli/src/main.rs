//! # CLI - HeliosKV Interactive Shell
//!
//! A REPL-style command-line interface for the HeliosKV storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Works interactively and scripted (pipe commands via
//! stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! FLUSH              Force flush memtable to SSTable
//! COMPACT            Signal the background compactor
//! STATS              Print engine debug info
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! HELIOS_DATA_DIR           Database directory       (default: "data")
//! HELIOS_FLUSH_KB           Flush threshold in KiB   (default: 1024 = 1 MiB)
//! HELIOS_WAL_SYNC           fsync every WAL append   (default: "false")
//! HELIOS_COMPACT_THRESHOLD  Live tables that trigger compaction (default: 8)
//! ```
//!
//! `RUST_LOG` controls log verbosity (e.g. `RUST_LOG=engine=debug`).

use anyhow::Result;
use engine::{Engine, Options};
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let data_dir = env_or("HELIOS_DATA_DIR", "data");
    let flush_kb: usize = env_or("HELIOS_FLUSH_KB", "1024").parse().unwrap_or(1024);
    let wal_sync: bool = env_or("HELIOS_WAL_SYNC", "false").parse().unwrap_or(false);
    let compact_threshold: usize = env_or("HELIOS_COMPACT_THRESHOLD", "8").parse().unwrap_or(8);

    let opts = Options {
        flush_threshold: flush_kb * 1024,
        compact_threshold,
        wal_sync,
        ..Options::default()
    };
    let engine = Engine::open_with(&data_dir, opts)?;

    println!(
        "HeliosKV started (dir={}, flush={}KiB, wal_sync={}, compact_threshold={})",
        data_dir, flush_kb, wal_sync, compact_threshold
    );
    println!("Commands: SET key value | GET key | DEL key | FLUSH | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match engine.put(k.as_bytes().to_vec(), v.into_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {}", e),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match engine.get(k.as_bytes()) {
                            Some(v) => println!("{}", String::from_utf8_lossy(&v)),
                            None => println!("(nil)"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match engine.delete(k.as_bytes().to_vec()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "FLUSH" => match engine.flush() {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR flush failed: {}", e),
                },
                "COMPACT" => {
                    engine.compact();
                    println!("OK (compaction signalled)");
                }
                "STATS" => println!("{:#?}", engine),
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => println!("ERR unknown command: {}", other),
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close();
    Ok(())
}

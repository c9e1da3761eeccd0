//! `tinysql-cli`: an interactive REPL over a local `Engine`, plus a
//! `compact` subcommand for offline rebuilds.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser as ClapParser, Subcommand};
use tinysql::{Database, EngineError, QueryResult, Value};

#[derive(ClapParser)]
#[command(name = "tinysql-cli", about = "tinysql REPL and maintenance CLI")]
struct Config {
    /// Data directory holding the catalog, heap, and index files.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite a table's heap file and rebuild its indexes, dropping
    /// tombstoned rows.
    Compact { table: String },
}

fn main() {
    env_logger::init();
    let config = Config::parse();

    let db = match Database::open(&config.data_dir) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open database at {:?}: {}", config.data_dir, e);
            std::process::exit(1);
        }
    };

    let result = match config.command {
        Some(Command::Compact { table }) => db.compact(&table),
        None => repl(&db),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = db.close() {
        eprintln!("error closing database: {}", e);
        std::process::exit(1);
    }
}

const CONTROL_COMMANDS: &[&str] = &["BEGIN", "COMMIT", "ROLLBACK", "EXIT"];

fn repl(db: &Database) -> Result<(), EngineError> {
    let stdin = io::stdin();
    print!("tinysql> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.map_err(EngineError::Io)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            print!("tinysql> ");
            io::stdout().flush().ok();
            continue;
        }

        let upper = trimmed.trim_end_matches(';').to_ascii_uppercase();
        if upper == "EXIT" {
            break;
        }
        if let Some(rest) = upper.strip_prefix("COMPACT") {
            let table = rest.trim();
            if table.is_empty() {
                println!("usage: COMPACT <table>");
            } else if let Err(e) = db.compact(table) {
                println!("error: {}", e);
            }
            print!("tinysql> ");
            io::stdout().flush().ok();
            continue;
        }
        if CONTROL_COMMANDS.contains(&upper.as_str()) {
            let outcome = match upper.as_str() {
                "BEGIN" => db.execute("BEGIN;"),
                "COMMIT" => db.execute("COMMIT;"),
                "ROLLBACK" => db.execute("ROLLBACK;"),
                _ => unreachable!(),
            };
            if let Err(e) = outcome {
                println!("error: {}", e);
            }
            print!("tinysql> ");
            io::stdout().flush().ok();
            continue;
        }

        match db.execute(trimmed) {
            Ok(result) => print_table(&result),
            Err(e) => println!("error: {}", e),
        }
        print!("tinysql> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn print_table(result: &QueryResult) {
    if result.columns.is_empty() {
        return;
    }
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            result.rows.iter().map(|r| r[i].to_display_string().len()).chain(std::iter::once(c.len())).max().unwrap_or(0)
        })
        .collect();

    print_border(&widths);
    print_row(&result.columns, &widths);
    print_border(&widths);
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(Value::to_display_string).collect();
        print_row(&cells, &widths);
        print_border(&widths);
    }
}

fn print_border(widths: &[usize]) {
    let mut line = String::from("+");
    for w in widths {
        line.push_str(&"-".repeat(w + 2));
        line.push('+');
    }
    println!("{}", line);
}

fn print_row(cells: &[String], widths: &[usize]) {
    let mut line = String::from("|");
    for (cell, w) in cells.iter().zip(widths) {
        line.push_str(&format!(" {:<width$} |", cell, width = w));
    }
    println!("{}", line);
}

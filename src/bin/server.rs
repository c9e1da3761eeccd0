//! `tinysql-server`: a MySQL-like wire-protocol front end over a local
//! `Engine`. Single-threaded per the engine's concurrency model — one
//! connection is served to completion before the next is accepted.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use clap::Parser as ClapParser;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tinysql::{Database, EngineError, Result};

#[derive(ClapParser)]
#[command(name = "tinysql-server", about = "tinysql wire-protocol server")]
struct Config {
    /// Data directory holding the catalog, heap, and index files.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:4406")]
    listen: String,

    /// Password clients must authenticate with.
    #[arg(long, default_value = "tinysql")]
    password: String,
}

const PROTOCOL_VERSION: u8 = 10;
const SERVER_VERSION: &str = "tinysql-0.1.0";
const SALT_LEN: usize = 20;
const EOF_MARKER: u8 = 0xFE;
const CMD_QUERY: u8 = 0x03;

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

    let listener = match TcpListener::bind(&config.listen) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {}: {}", config.listen, e);
            std::process::exit(1);
        }
    };
    log::info!("tinysql-server listening on {}", config.listen);

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                if let Err(e) = handle_connection(stream, &db, &config.password) {
                    log::warn!("connection closed: {}", e);
                }
            }
            Err(e) => log::error!("accept failed: {}", e),
        }
    }
}

/// One packet: a 3-byte little-endian payload length, a 1-byte sequence
/// number, then the payload itself.
fn read_packet(stream: &mut TcpStream) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok((seq, payload))
}

fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > 0xFF_FFFF {
        return Err(EngineError::Protocol("packet payload too large".into()));
    }
    let len = payload.len() as u32;
    let mut header = [0u8; 4];
    header[0..3].copy_from_slice(&len.to_le_bytes()[0..3]);
    header[3] = seq;
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    Ok(())
}

fn write_length_prefixed_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend((bytes.len() as u32).to_le_bytes());
    out.extend(bytes);
}

fn expected_auth_response(password: &str, salt: &[u8]) -> [u8; 32] {
    let stage1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let stage1_hash: [u8; 32] = Sha256::digest(stage1).into();
    let mut combined = Vec::with_capacity(32 + salt.len());
    combined.extend(stage1_hash);
    combined.extend(salt);
    let stage2: [u8; 32] = Sha256::digest(&combined).into();
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = stage1[i] ^ stage2[i];
    }
    out
}

fn handle_connection(mut stream: TcpStream, db: &Database, password: &str) -> Result<()> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut greeting = Vec::new();
    greeting.push(PROTOCOL_VERSION);
    write_length_prefixed_string(&mut greeting, SERVER_VERSION);
    greeting.extend(salt);
    write_packet(&mut stream, 0, &greeting)?;

    let (login_seq, login_payload) = read_packet(&mut stream)?;
    if login_payload.len() != 32 {
        write_packet(&mut stream, login_seq + 1, &[1, b'b', b'a', b'd', b' ', b'a', b'u', b't', b'h'])?;
        return Err(EngineError::Protocol("malformed login response".into()));
    }
    let expected = expected_auth_response(password, &salt);
    if login_payload != expected {
        write_packet(&mut stream, login_seq + 1, &[1])?;
        return Err(EngineError::Protocol("authentication failed".into()));
    }
    write_packet(&mut stream, login_seq + 1, &[0])?;

    loop {
        let (seq, payload) = match read_packet(&mut stream) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        if payload.is_empty() || payload[0] != CMD_QUERY {
            write_packet(&mut stream, seq + 1, b"unsupported command")?;
            continue;
        }
        let sql = String::from_utf8_lossy(&payload[1..]).into_owned();
        let mut next_seq = seq + 1;
        match db.execute(&sql) {
            Ok(result) => {
                write_packet(&mut stream, next_seq, &[result.columns.len() as u8])?;
                next_seq += 1;
                for name in &result.columns {
                    let mut descriptor = Vec::new();
                    write_length_prefixed_string(&mut descriptor, name);
                    write_packet(&mut stream, next_seq, &descriptor)?;
                    next_seq += 1;
                }
                write_packet(&mut stream, next_seq, &[EOF_MARKER])?;
                next_seq += 1;
                for row in &result.rows {
                    let mut row_payload = Vec::new();
                    for value in row {
                        write_length_prefixed_string(&mut row_payload, &value.to_display_string());
                    }
                    write_packet(&mut stream, next_seq, &row_payload)?;
                    next_seq += 1;
                }
                write_packet(&mut stream, next_seq, &[EOF_MARKER])?;
            }
            Err(e) => {
                let mut error_payload = vec![0xFFu8];
                write_length_prefixed_string(&mut error_payload, &e.to_string());
                write_packet(&mut stream, next_seq, &error_payload)?;
            }
        }
    }
}

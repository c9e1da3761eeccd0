//! Narrow integration test for the wire-protocol server: spawns the real
//! `tinysql-server` binary and drives it over a loopback `TcpStream`,
//! exercising the greeting/login handshake and one query round trip.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::tempdir;

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    (seq, payload)
}

fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) {
    let len = payload.len() as u32;
    let mut header = [0u8; 4];
    header[0..3].copy_from_slice(&len.to_le_bytes()[0..3]);
    header[3] = seq;
    stream.write_all(&header).unwrap();
    stream.write_all(payload).unwrap();
}

fn auth_response(password: &str, salt: &[u8]) -> [u8; 32] {
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

#[test]
fn greeting_login_and_query_round_trip() {
    let dir = tempdir().unwrap();
    let addr = "127.0.0.1:43217";
    let bin = env!("CARGO_BIN_EXE_tinysql-server");
    let child = Command::new(bin)
        .arg("--data-dir")
        .arg(dir.path())
        .arg("--listen")
        .arg(addr)
        .arg("--password")
        .arg("secret")
        .spawn()
        .unwrap();
    let _guard = ServerGuard(child);

    let mut stream = connect_with_retry(addr);

    let (greet_seq, greeting) = read_packet(&mut stream);
    assert_eq!(greet_seq, 0);
    assert_eq!(greeting[0], 10);
    let salt = greeting[greeting.len() - 20..].to_vec();

    let response = auth_response("secret", &salt);
    write_packet(&mut stream, greet_seq + 1, &response);
    let (_, login_reply) = read_packet(&mut stream);
    assert_eq!(login_reply[0], 0, "login should succeed with the correct password");

    let mut query_payload = vec![0x03u8];
    query_payload.extend(b"CREATE TABLE t(id INT);".iter());
    write_packet(&mut stream, 0, &query_payload);
    let (seq, column_count) = read_packet(&mut stream);
    assert_eq!(column_count, vec![0]);
    let (_, eof) = read_packet(&mut stream);
    assert_eq!(eof, vec![0xFE]);
    let _ = seq;

    let mut insert_payload = vec![0x03u8];
    insert_payload.extend(b"INSERT INTO t VALUES (42);".iter());
    write_packet(&mut stream, 0, &insert_payload);
    read_packet(&mut stream); // column count
    read_packet(&mut stream); // eof

    let mut select_payload = vec![0x03u8];
    select_payload.extend(b"SELECT id FROM t;".iter());
    write_packet(&mut stream, 0, &select_payload);
    let (_, column_count) = read_packet(&mut stream);
    assert_eq!(column_count, vec![1]);
    let (_, descriptor) = read_packet(&mut stream);
    let name_len = u32::from_le_bytes([descriptor[0], descriptor[1], descriptor[2], descriptor[3]]) as usize;
    assert_eq!(&descriptor[4..4 + name_len], b"id");
    let (_, eof) = read_packet(&mut stream);
    assert_eq!(eof, vec![0xFE]);
    let (_, row) = read_packet(&mut stream);
    let val_len = u32::from_le_bytes([row[0], row[1], row[2], row[3]]) as usize;
    assert_eq!(&row[4..4 + val_len], b"42");
    let (_, final_eof) = read_packet(&mut stream);
    assert_eq!(final_eof, vec![0xFE]);
}

fn connect_with_retry(addr: &str) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("server never started listening on {}", addr);
}

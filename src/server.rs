//! Line-protocol TCP front-end.
//!
//! One client is served at a time and each connection drives at most one
//! running query; the engine core is never accessed concurrently. Records
//! travel as JSON arrays of base64-encoded columns.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{info, warn};

use crate::buffer::{BufferPool, BufferPoolManager};
use crate::disk::DiskManager;
use crate::errors::Error;
use crate::query::parser::Parser;
use crate::query::Executor;

/// Opens the database and serves clients forever. Startup errors (heap
/// file, schema blob, socket) are returned; per-connection errors are
/// logged and the loop keeps accepting.
pub fn serve(db_path: &Path, host: &str, port: u16, pool_size: usize) -> Result<(), Error> {
    let disk = DiskManager::open(db_path)?;
    let pool = BufferPool::new(pool_size);
    let mut bufmgr = BufferPoolManager::new(disk, pool);
    let parser = Parser::new(&mut bufmgr)?;

    let listener = TcpListener::bind((host, port))?;
    info!(host, port, pool_size, "server start");
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(_) => continue,
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(peer = %peer, "connected");
        match handle_client(stream, &mut bufmgr, &parser) {
            Ok(()) => info!(peer = %peer, "disconnected"),
            Err(err) => warn!(peer = %peer, error = %err, "connection error"),
        }
    }
    Ok(())
}

fn handle_client(
    stream: TcpStream,
    bufmgr: &mut BufferPoolManager,
    parser: &Parser,
) -> Result<(), Error> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    // Dropping the executor releases its pinned pages, so replacing or
    // clearing it below is always a clean finish.
    let mut executor: Option<Executor> = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let (head, rest) = match cmd.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (cmd, ""),
        };

        match head {
            "QUIT" | "EXIT" => return Ok(()),

            "PING" => writeln!(writer, "PONG")?,

            "ECHO" => writeln!(writer, "{}", rest)?,

            "FIND" => {
                if rest.is_empty() {
                    write_error(&mut writer, "Missing query string")?;
                    continue;
                }
                executor = None;
                match parser.parse(rest).and_then(|plan| plan.start(bufmgr)) {
                    Ok(exec) => {
                        executor = Some(exec);
                        writeln!(writer, "OK")?;
                    }
                    Err(err) => write_error(&mut writer, &err.to_string())?,
                }
            }

            "NEXT" => {
                let exec = match executor.as_mut() {
                    Some(exec) => exec,
                    None => {
                        write_error(&mut writer, "No query running")?;
                        continue;
                    }
                };
                let limit = if rest.is_empty() {
                    Some(1)
                } else {
                    rest.parse::<usize>().ok().filter(|&limit| limit > 0)
                };
                let limit = match limit {
                    Some(limit) => limit,
                    None => {
                        write_error(&mut writer, "Invalid argument")?;
                        continue;
                    }
                };

                let mut encoded_records: Vec<Vec<String>> = Vec::new();
                let mut eof = false;
                let mut failed = None;
                for _ in 0..limit {
                    match exec.next(bufmgr) {
                        Ok(record) => encoded_records
                            .push(record.iter().map(|col| BASE64.encode(col)).collect()),
                        Err(Error::EndOfIterator) => {
                            eof = true;
                            break;
                        }
                        Err(err) => {
                            failed = Some(err);
                            break;
                        }
                    }
                }
                if let Some(err) = failed {
                    write_error(&mut writer, &err.to_string())?;
                    continue;
                }
                if eof && encoded_records.is_empty() {
                    executor = None;
                    writeln!(writer, "END")?;
                    continue;
                }
                let msg = serde_json::to_string(&encoded_records)
                    .expect("record list always serializes");
                writeln!(writer, "RECORDS {}", msg)?;
            }

            "END" => {
                if executor.take().is_some() {
                    writeln!(writer, "OK")?;
                } else {
                    write_error(&mut writer, "No query running")?;
                }
            }

            _ => write_error(&mut writer, "Unknown command")?,
        }
    }
}

fn write_error(writer: &mut TcpStream, msg: &str) -> Result<(), Error> {
    writeln!(writer, "ERROR {}", msg)?;
    Ok(())
}

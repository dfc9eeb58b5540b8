//! Minimal MySQL server speaking enough of the wire protocol for the
//! driver to connect, ping, run `SET` statements and read one text result
//! set of `(id, name)` rows.

use mysql_via_ssh::models::MysqlConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH;

const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
const UTF8_GENERAL_CI: u8 = 33;

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;
const COM_PING: u8 = 0x0e;

const MYSQL_TYPE_LONGLONG: u8 = 0x08;
const MYSQL_TYPE_VAR_STRING: u8 = 0xfd;

/// Row served for every `SELECT` that is not a `SELECT @@variable`
pub type FakeRow = (i64, Option<&'static str>);

pub struct FakeMysql {
    pub addr: SocketAddr,
    queries: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl FakeMysql {
    pub async fn start(rows: Vec<FakeRow>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mysql");
        let addr = listener.local_addr().expect("mysql addr");
        let rows = Arc::new(rows);
        let queries = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let task = {
            let queries = queries.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    *connections.lock().unwrap() += 1;
                    let rows = rows.clone();
                    let queries = queries.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, rows, queries).await;
                    });
                }
            })
        };

        Self {
            addr,
            queries,
            connections,
            task,
        }
    }

    /// Every `COM_QUERY` text received so far
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    /// Database settings pointing at this server, as seen from the bastion
    pub fn mysql_config(&self) -> MysqlConfig {
        let mut config = MysqlConfig::new(self.addr.ip().to_string(), "app", "pw", "orders")
            .with_port(self.addr.port());
        config.connect_timeout_secs = 5;
        config
    }
}

impl Drop for FakeMysql {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    rows: Arc<Vec<FakeRow>>,
    queries: Arc<Mutex<Vec<String>>>,
) -> io::Result<()> {
    write_packet(&mut socket, 0, &handshake_v10()).await?;
    let (seq, _response) = read_packet(&mut socket).await?;
    write_packet(&mut socket, seq.wrapping_add(1), &ok_packet()).await?;

    loop {
        let (seq, payload) = match read_packet(&mut socket).await {
            Ok(packet) => packet,
            Err(_) => return Ok(()),
        };
        let Some((&command, body)) = payload.split_first() else {
            return Ok(());
        };

        let replies = match command {
            COM_QUIT => return Ok(()),
            COM_PING => vec![ok_packet()],
            COM_QUERY => {
                let sql = String::from_utf8_lossy(body).to_string();
                queries.lock().unwrap().push(sql.clone());
                answer(&sql, &rows)
            }
            _ => vec![ok_packet()],
        };

        let mut seq = seq.wrapping_add(1);
        for reply in replies {
            write_packet(&mut socket, seq, &reply).await?;
            seq = seq.wrapping_add(1);
        }
    }
}

fn answer(sql: &str, rows: &[FakeRow]) -> Vec<Vec<u8>> {
    let trimmed = sql.trim();
    let upper = trimmed.to_ascii_uppercase();

    if let Some(variables) = upper.strip_prefix("SELECT @@") {
        // Session settings the driver may read right after connecting
        let names: Vec<String> = variables
            .split(',')
            .map(|v| v.trim().trim_start_matches("@@").to_ascii_lowercase())
            .collect();
        let values: Vec<Option<String>> = names
            .iter()
            .map(|name| match name.as_str() {
                "max_allowed_packet" => Some("16777216".to_string()),
                "wait_timeout" => Some("28800".to_string()),
                _ => None,
            })
            .collect();
        let columns: Vec<(String, u8)> = names
            .iter()
            .map(|name| (format!("@@{}", name), MYSQL_TYPE_VAR_STRING))
            .collect();
        return result_set(&columns, &[values]);
    }

    if upper.starts_with("SELECT") {
        let columns = vec![
            ("id".to_string(), MYSQL_TYPE_LONGLONG),
            ("name".to_string(), MYSQL_TYPE_VAR_STRING),
        ];
        let values: Vec<Vec<Option<String>>> = rows
            .iter()
            .map(|(id, name)| vec![Some(id.to_string()), name.map(str::to_string)])
            .collect();
        return result_set(&columns, &values);
    }

    vec![ok_packet()]
}

/// Column count, definitions, EOF, rows, EOF
fn result_set(columns: &[(String, u8)], rows: &[Vec<Option<String>>]) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();

    let mut count = Vec::new();
    write_lenenc_int(&mut count, columns.len() as u64);
    packets.push(count);

    for (name, column_type) in columns {
        packets.push(column_definition(name, *column_type));
    }
    packets.push(eof_packet());

    for row in rows {
        let mut payload = Vec::new();
        for value in row {
            match value {
                Some(text) => write_lenenc_str(&mut payload, text.as_bytes()),
                None => payload.push(0xfb),
            }
        }
        packets.push(payload);
    }
    packets.push(eof_packet());
    packets
}

fn column_definition(name: &str, column_type: u8) -> Vec<u8> {
    let mut payload = Vec::new();
    write_lenenc_str(&mut payload, b"def");
    write_lenenc_str(&mut payload, b"orders");
    write_lenenc_str(&mut payload, b"table");
    write_lenenc_str(&mut payload, b"table");
    write_lenenc_str(&mut payload, name.as_bytes());
    write_lenenc_str(&mut payload, name.as_bytes());
    payload.push(0x0c);
    payload.extend_from_slice(&(UTF8_GENERAL_CI as u16).to_le_bytes());
    payload.extend_from_slice(&255u32.to_le_bytes());
    payload.push(column_type);
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.push(0);
    payload.extend_from_slice(&[0, 0]);
    payload
}

fn handshake_v10() -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);
    payload.push(10);
    payload.extend_from_slice(b"5.7.44-fake");
    payload.push(0);
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(b"abcdefgh");
    payload.push(0);
    payload.extend_from_slice(&((SERVER_CAPABILITIES & 0xffff) as u16).to_le_bytes());
    payload.push(UTF8_GENERAL_CI);
    payload.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    payload.extend_from_slice(&((SERVER_CAPABILITIES >> 16) as u16).to_le_bytes());
    payload.push(21);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(b"ijklmnopqrst");
    payload.push(0);
    payload.extend_from_slice(b"mysql_native_password");
    payload.push(0);
    payload
}

fn ok_packet() -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x00];
    payload.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload
}

fn eof_packet() -> Vec<u8> {
    let mut payload = vec![0xfe];
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    payload
}

fn write_lenenc_int(buf: &mut Vec<u8>, value: u64) {
    if value < 251 {
        buf.push(value as u8);
    } else if value < 65_536 {
        buf.push(0xfc);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 16_777_216 {
        buf.push(0xfd);
        buf.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        buf.push(0xfe);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_lenenc_str(buf: &mut Vec<u8>, value: &[u8]) {
    write_lenenc_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

async fn read_packet(socket: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; length];
    socket.read_exact(&mut payload).await?;
    Ok((header[3], payload))
}

async fn write_packet(socket: &mut TcpStream, seq: u8, payload: &[u8]) -> io::Result<()> {
    let length = (payload.len() as u32).to_le_bytes();
    let header = [length[0], length[1], length[2], seq];
    socket.write_all(&header).await?;
    socket.write_all(payload).await?;
    socket.flush().await
}

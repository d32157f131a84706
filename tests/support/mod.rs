//! In-process SMTP server for integration tests.
//!
//! Speaks just enough ESMTP for lettre: EHLO, AUTH PLAIN, MAIL, RCPT, DATA,
//! RSET, NOOP and QUIT. Every accepted message is recorded and pushed to a
//! channel the test can await.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use courier::{Timeouts, TransportConfig, TransportSecurity};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How the server behaves on each connection.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Advertise STARTTLS in the EHLO reply (the upgrade itself is refused).
    pub starttls: bool,
    /// Accept connections but never say anything.
    pub silent: bool,
    /// Answer every AUTH with 535.
    pub reject_auth: bool,
    /// Reject every RCPT with 550.
    pub reject_recipients: bool,
}

/// One message as seen by the server.
#[derive(Debug, Clone)]
pub struct Received {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub auth: Option<(String, String)>,
    pub data: String,
}

impl Received {
    /// Unfolded value of the first header called `name`, RFC 2047 words decoded.
    pub fn header(&self, name: &str) -> Option<String> {
        header_value(&split_headers(&self.data).0, name).map(|v| decode_words(&v))
    }

    /// Every leaf MIME part, decoded.
    pub fn parts(&self) -> Vec<Part> {
        parse_parts(&self.data)
    }

    /// Decoded text of the first `text/plain` part.
    pub fn text(&self) -> Option<String> {
        self.parts()
            .into_iter()
            .find(|p| p.content_type().starts_with("text/plain") && !p.is_attachment())
            .map(|p| p.text())
    }
}

pub struct FakeSmtp {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    inbox: mpsc::UnboundedReceiver<Received>,
    task: JoinHandle<()>,
}

impl FakeSmtp {
    pub async fn start() -> Self {
        Self::start_with(Behaviour::default()).await
    }

    pub async fn start_with(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (tx, inbox) = mpsc::unbounded_channel();

        let state = Shared {
            behaviour,
            received: Arc::clone(&received),
            commands: Arc::clone(&commands),
            inbox: tx,
        };
        let counter = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = session(stream, state).await;
                });
            }
        });

        Self {
            addr,
            received,
            commands,
            connections,
            inbox,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Plaintext configuration pointing at this server.
    pub fn config(&self) -> TransportConfig {
        TransportConfig::new("127.0.0.1", self.port(), TransportSecurity::None, "", "").unwrap()
    }

    /// Configuration with credentials and the given security mode.
    pub fn config_with(&self, security: TransportSecurity, user: &str, pass: &str) -> TransportConfig {
        TransportConfig::new("127.0.0.1", self.port(), security, user, pass).unwrap()
    }

    /// Wait for the next delivered message.
    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("no message within 5s")
            .expect("server stopped")
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Every command line received, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeSmtp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn timeouts(millis: u64) -> Timeouts {
    Timeouts::from_millis(millis).unwrap()
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[derive(Clone)]
struct Shared {
    behaviour: Behaviour,
    received: Arc<Mutex<Vec<Received>>>,
    commands: Arc<Mutex<Vec<String>>>,
    inbox: mpsc::UnboundedSender<Received>,
}

async fn session(stream: TcpStream, state: Shared) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    if state.behaviour.silent {
        let mut sink = Vec::new();
        while reader.read_until(b'\n', &mut sink).await? > 0 {
            sink.clear();
        }
        return Ok(());
    }

    write.write_all(b"220 fake.test ESMTP ready\r\n").await?;

    let mut auth = None;
    let mut mail_from = None;
    let mut rcpt_to = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let command = String::from_utf8_lossy(&line).trim_end().to_string();
        state.commands.lock().unwrap().push(command.clone());
        let upper = command.to_ascii_uppercase();

        if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            let mut reply = String::from("250-fake.test\r\n250-AUTH PLAIN LOGIN\r\n");
            if state.behaviour.starttls {
                reply.push_str("250-STARTTLS\r\n");
            }
            reply.push_str("250 8BITMIME\r\n");
            write.write_all(reply.as_bytes()).await?;
        } else if upper.starts_with("STARTTLS") {
            write.write_all(b"454 TLS not available\r\n").await?;
        } else if upper.starts_with("AUTH PLAIN") {
            if state.behaviour.reject_auth {
                write.write_all(b"535 5.7.8 Authentication credentials invalid\r\n").await?;
                continue;
            }
            let encoded = command[10..].trim();
            auth = decode_plain(encoded);
            write.write_all(b"235 2.7.0 Authentication successful\r\n").await?;
        } else if upper.starts_with("MAIL FROM:") {
            mail_from = Some(angle_addr(&command));
            rcpt_to.clear();
            write.write_all(b"250 2.1.0 OK\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            if state.behaviour.reject_recipients {
                write.write_all(b"550 5.1.1 No such user\r\n").await?;
                continue;
            }
            rcpt_to.push(angle_addr(&command));
            write.write_all(b"250 2.1.5 OK\r\n").await?;
        } else if upper == "DATA" {
            write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;
            let data = read_data(&mut reader).await?;
            let message = Received {
                mail_from: mail_from.take().unwrap_or_default(),
                rcpt_to: std::mem::take(&mut rcpt_to),
                auth: auth.clone(),
                data,
            };
            state.received.lock().unwrap().push(message.clone());
            let _ = state.inbox.send(message);
            write.write_all(b"250 2.0.0 OK queued\r\n").await?;
        } else if upper == "RSET" || upper == "NOOP" {
            write.write_all(b"250 OK\r\n").await?;
        } else if upper == "QUIT" {
            write.write_all(b"221 Bye\r\n").await?;
            return Ok(());
        } else {
            write.write_all(b"502 Command not implemented\r\n").await?;
        }
    }
}

async fn read_data<R>(reader: &mut BufReader<R>) -> std::io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut data = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(data);
        }
        let text = String::from_utf8_lossy(&line);
        if text == ".\r\n" || text == ".\n" {
            return Ok(data);
        }
        // Undo dot-stuffing.
        data.push_str(text.strip_prefix('.').unwrap_or(&text));
    }
}

fn angle_addr(command: &str) -> String {
    let start = command.find('<').map(|i| i + 1).unwrap_or(0);
    let end = command[start..].find('>').map(|i| start + i).unwrap_or(command.len());
    command[start..end].to_string()
}

fn decode_plain(encoded: &str) -> Option<(String, String)> {
    let raw = STANDARD.decode(encoded).ok()?;
    let mut fields = raw.split(|b| *b == 0).skip(1);
    let user = String::from_utf8(fields.next()?.to_vec()).ok()?;
    let pass = String::from_utf8(fields.next()?.to_vec()).ok()?;
    Some((user, pass))
}

// ============================================================================
// MIME helpers
// ============================================================================

/// A leaf MIME part with its body transfer-decoded.
#[derive(Debug, Clone)]
pub struct Part {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Part {
    pub fn header(&self, name: &str) -> Option<String> {
        header_value(&self.headers, name)
    }

    pub fn content_type(&self) -> String {
        self.header("Content-Type")
            .unwrap_or_else(|| "text/plain".to_string())
            .to_ascii_lowercase()
    }

    pub fn is_attachment(&self) -> bool {
        self.header("Content-Disposition")
            .map(|d| d.to_ascii_lowercase().starts_with("attachment"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn split_headers(raw: &str) -> (Vec<(String, String)>, String) {
    let (head, body) = match raw.find("\r\n\r\n") {
        Some(i) => (&raw[..i], &raw[i + 4..]),
        None => (raw, ""),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    (headers, body.to_string())
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

fn boundary_of(content_type: &str) -> Option<String> {
    let start = content_type.to_ascii_lowercase().find("boundary=")? + "boundary=".len();
    let rest = &content_type[start..];
    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split(';').next()?.trim(),
    };
    Some(value.to_string())
}

pub fn parse_parts(raw: &str) -> Vec<Part> {
    let (headers, body) = split_headers(raw);
    let content_type = header_value(&headers, "Content-Type").unwrap_or_default();

    if content_type.to_ascii_lowercase().starts_with("multipart/") {
        let Some(boundary) = boundary_of(&content_type) else {
            return Vec::new();
        };
        let delimiter = format!("--{}", boundary);
        return body
            .split(delimiter.as_str())
            .skip(1)
            .filter(|segment| !segment.starts_with("--"))
            .flat_map(|segment| parse_parts(segment.trim_start_matches("\r\n")))
            .collect();
    }

    let encoding = header_value(&headers, "Content-Transfer-Encoding")
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body = body.trim_end_matches("\r\n");
    let decoded = match encoding.as_str() {
        "base64" => STANDARD
            .decode(body.split_whitespace().collect::<String>())
            .unwrap_or_default(),
        "quoted-printable" => decode_quoted_printable(body),
        _ => body.as_bytes().to_vec(),
    };

    vec![Part {
        headers,
        body: decoded,
    }]
}

fn decode_quoted_printable(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'=' if bytes[i + 1..].starts_with(b"\r\n") => i += 3,
            b'=' if bytes[i + 1..].starts_with(b"\n") => i += 2,
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

/// Decode RFC 2047 encoded words (`=?utf-8?b?...?=` and `=?utf-8?q?...?=`).
pub fn decode_words(value: &str) -> String {
    let mut out = String::new();
    let mut rest = value;
    let mut last_was_word = false;

    while let Some(start) = rest.find("=?") {
        let prefix = &rest[..start];
        if !(last_was_word && prefix.trim().is_empty()) {
            out.push_str(prefix);
        }
        let word = &rest[start + 2..];
        let mut pieces = word.splitn(3, '?');
        let (Some(_charset), Some(encoding), Some(tail)) = (pieces.next(), pieces.next(), pieces.next())
        else {
            out.push_str(&rest[start..]);
            return out;
        };
        let Some(end) = tail.find("?=") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let text = &tail[..end];
        let bytes = if encoding.eq_ignore_ascii_case("b") {
            STANDARD.decode(text).unwrap_or_default()
        } else {
            decode_quoted_printable(&text.replace('_', " "))
        };
        out.push_str(&String::from_utf8_lossy(&bytes));
        rest = &tail[end + 2..];
        last_was_word = true;
    }
    out.push_str(rest);
    out
}

//! Per-connection session: an IRC transport on one side, an ICB client on
//! the other, and the [`Translator`] in between.
//!
//! Each accepted IRC connection is driven by exactly one task. During
//! registration only the IRC side is read; once NICK and USER are in, the
//! upstream ICB connection is established and the loop waits on whichever
//! side produces data first. Either side closing ends the session, closes
//! the other side and removes the registry entry.

mod translator;

pub use translator::Translator;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::error::Result;
use crate::icb::Client;
use crate::irc;

/// Process-wide map of live sessions to their peer addresses.
///
/// A session inserts its entry on connect and removes it on disconnect;
/// no session touches another session's entry.
pub type ConnectionRegistry = Arc<Mutex<HashMap<String, SocketAddr>>>;

/// Identity of the IRC side of a session.
#[derive(Debug, Clone)]
pub struct Session {
    pub nick: String,
    pub loginid: String,
    pub host: String,
    /// Opaque random token identifying this session in logs and the
    /// connection registry.
    pub session_id: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            nick: String::new(),
            loginid: String::new(),
            host: String::new(),
            session_id: token_hex(20),
        }
    }

    /// `nick!~loginid@host`, the prefix this session's user appears as.
    pub fn clientid(&self) -> String {
        format!("{}!~{}@{}", self.nick, self.loginid, self.host)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn token_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// How long a remembered away text stays valid.
pub(crate) const AWAY_TTL: Duration = Duration::from_secs(120);

/// Remembered away texts, so repeated WHOIS queries do not beep the target
/// over and over.
#[derive(Debug, Default)]
pub(crate) struct AwayCache {
    entries: HashMap<String, (Instant, String)>,
}

impl AwayCache {
    /// Fresh cached text for a nick; expired entries are evicted.
    pub(crate) fn get(&mut self, nick: &str) -> Option<String> {
        match self.entries.get(nick) {
            Some((stored, text)) if stored.elapsed() <= AWAY_TTL => Some(text.clone()),
            Some(_) => {
                self.entries.remove(nick);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(&mut self, nick: &str, text: &str) {
        self.entries
            .insert(nick.to_string(), (Instant::now(), text.to_string()));
    }
}

/// Drive one accepted IRC connection to completion.
pub async fn run<S>(stream: S, peer: SocketAddr, config: Arc<Config>, registry: ConnectionRegistry)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut translator = Translator::new(config.clone(), peer.ip());
    let session_id = translator.session_id().to_string();

    tracing::info!(session_id = %session_id, address = %peer.ip(), "client connected");
    registry.lock().unwrap().insert(session_id.clone(), peer);

    if let Err(e) = drive(stream, &config, &mut translator).await {
        tracing::warn!(session_id = %session_id, error = %e, "session ended with error");
    }

    registry.lock().unwrap().remove(&session_id);
    tracing::info!(session_id = %session_id, "closing session");
}

/// The two event sources a live session waits on.
enum Step {
    Irc(usize),
    Icb(Option<(char, Vec<String>)>),
}

async fn drive<S>(stream: S, config: &Config, translator: &mut Translator) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut decoder = irc::Decoder::new();
    let mut messages = Vec::new();
    let mut chunk = [0u8; 512];

    // registration phase: IRC side only, no upstream connection yet
    let mut client = loop {
        let n = rd.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        messages.clear();
        decoder.write(&chunk[..n], &mut messages)?;
        for msg in &messages {
            translator.handle_pre_login(msg).await;
        }
        flush(translator, &mut wr).await?;

        if translator.ready_for_login() {
            let (host, port) = config.icb_address()?;
            tracing::debug!("connecting to {host}:{port}");
            let mut client = Client::connect(&host, port).await?;
            let (loginid, nick) = {
                let session = translator.session();
                (session.loginid.clone(), session.nick.clone())
            };
            client
                .login(&loginid, &nick, "", "", &translator.peer_address())
                .await?;
            break client;
        }
    };

    // relay until either side closes
    loop {
        let step = tokio::select! {
            res = rd.read(&mut chunk) => Step::Irc(res?),
            res = client.next_message() => Step::Icb(res?),
        };

        match step {
            Step::Irc(0) => break,
            Step::Irc(n) => {
                messages.clear();
                decoder.write(&chunk[..n], &mut messages)?;
                for msg in &messages {
                    translator.handle_irc(&mut client, msg).await?;
                }
            }
            Step::Icb(None) => break,
            Step::Icb(Some((ty, fields))) => {
                client.process(ty, &fields).await?;
                translator.handle_icb(&mut client, ty, &fields).await?;
            }
        }

        flush(translator, &mut wr).await?;
    }

    flush(translator, &mut wr).await.ok();
    client.quit().await.ok();
    wr.shutdown().await.ok();
    Ok(())
}

async fn flush<W>(translator: &mut Translator, wr: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in translator.take_output() {
        tracing::debug!("=> {line}");
        wr.write_all(line.as_bytes()).await?;
        wr.write_all(b"\r\n").await?;
    }
    Ok(())
}

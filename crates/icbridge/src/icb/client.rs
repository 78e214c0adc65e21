//! ICB client: upstream socket, framing and built-in state tracking.
//!
//! [`Client::read`] applies built-in processing before handing a message to
//! the caller: pings are answered, a pong ends the joining phase, status
//! and output messages update the group [`State`], and an exit packet
//! closes the socket. The caller therefore always observes a message
//! *after* its effect on the state.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

use super::packet::{self, Encoder};
use super::state::State;

/// The status-text patterns the bridge understands.
///
/// The ICB server embeds structured events in human-readable status text;
/// these patterns are the protocol contract, fragile and kept in one place.
mod patterns {
    use regex::Regex;
    use std::sync::LazyLock;

    pub static GROUP_ENTERED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^You are now in group ([^\s.]+)").unwrap());
    pub static NICK_CHANGED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([^\s.]+) changed nickname to ([^\s.]+)").unwrap());
    pub static TOPIC_CHANGED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"^.* changed the topic to "(.+)""#).unwrap());
    pub static MODERATION_PASSED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\w+) has passed moderation to (\w+)").unwrap());
    pub static MODERATOR_IS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\w+) is now mod").unwrap());
    pub static GROUP_MADE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\w+ made group (\w+)").unwrap());
    pub static GROUP_NOW: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\w+ is now (\w+)").unwrap());
    pub static GROUP_HEADER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^Group: ([^\s.]+)\s+\((\w{3})\) Mod: ([^\s.]+)\s+Topic: (.*)").unwrap()
    });
}

/// Client for one upstream ICB connection.
///
/// Generic over the transport so the protocol handling can be exercised
/// against in-memory streams; production code uses [`Client::connect`].
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    stream: S,
    decoder: packet::Decoder,
    state: State,
    closed: bool,
}

impl Client<TcpStream> {
    /// Open a TCP connection to the upstream ICB server.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Wrap an established transport.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: packet::Decoder::new(),
            state: State::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// Log in and adopt `nick` as the session nick.
    pub async fn login(
        &mut self,
        loginid: &str,
        nick: &str,
        group: &str,
        password: &str,
        address: &str,
    ) -> Result<()> {
        let frame = Encoder::new('a')
            .field(loginid)
            .field(nick)
            .field(group)
            .field("login")
            .field(password)
            .field("")
            .field(address)
            .encode()?;
        self.send(frame).await?;
        self.state.set_nick(Some(nick.to_string()));
        Ok(())
    }

    /// Send a server command with a single argument.
    pub async fn command(&mut self, cmd: &str, arg: &str) -> Result<()> {
        let frame = Encoder::new('h').field(cmd).field(arg).encode()?;
        self.send(frame).await
    }

    /// Write a pre-encoded frame.
    pub async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.send(packet::empty('l')).await
    }

    pub async fn pong(&mut self) -> Result<()> {
        self.send(packet::empty('m')).await
    }

    /// Close the upstream socket; subsequent reads report end of stream.
    pub async fn quit(&mut self) -> Result<()> {
        self.closed = true;
        self.stream.shutdown().await.ok();
        Ok(())
    }

    /// Read the next message, applying built-in state updates first.
    ///
    /// Returns `None` once the connection is closed, locally or by the
    /// peer. Queued [`StateChange`](super::StateChange)s from the update
    /// are available via [`State::take_changes`].
    pub async fn read(&mut self) -> Result<Option<(char, Vec<String>)>> {
        match self.next_message().await? {
            Some((ty, fields)) => {
                self.process(ty, &fields).await?;
                Ok(Some((ty, fields)))
            }
            None => Ok(None),
        }
    }

    /// Fetch the next decoded message without built-in processing.
    ///
    /// Cancel safe: the only await is the socket read, and a decoded frame
    /// is returned before any further suspension. Callers racing this
    /// against other futures must follow up with [`Client::process`].
    pub(crate) async fn next_message(&mut self) -> Result<Option<(char, Vec<String>)>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            if let Some((ty, tail)) = self.decoder.next_frame()? {
                return Ok(Some((ty, packet::split_fields(&tail)?)));
            }

            let mut chunk = [0u8; 512];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                self.closed = true;
                return Ok(None);
            }
            self.decoder.write(&chunk[..n]);
        }
    }

    /// Apply a message's built-in effect: answer pings, end the joining
    /// phase on a pong, track status and output messages, close on exit.
    pub(crate) async fn process(&mut self, ty: char, fields: &[String]) -> Result<()> {
        match ty {
            'l' => self.pong().await?,
            'm' => self.state.set_joining(false),
            'd' => self.process_status(fields).await?,
            'i' => self.process_output(fields),
            'g' => self.quit().await?,
            _ => {}
        }
        Ok(())
    }

    async fn process_status(&mut self, fields: &[String]) -> Result<()> {
        let [category, text] = fields else {
            return Ok(());
        };

        match category.as_str() {
            "Status" => {
                if let Some(c) = patterns::GROUP_ENTERED.captures(text) {
                    self.state.set_group(Some(c[1].to_string()));
                    self.state.remove_all_members();

                    // ask for the member snapshot; the answering pong marks
                    // the end of the joining phase
                    self.command("w", ".").await?;
                    self.ping().await?;

                    self.state.set_joining(true);
                }
            }
            "Name" => {
                if let Some(c) = patterns::NICK_CHANGED.captures(text) {
                    let (old, new) = (&c[1], &c[2]);
                    if self.state.nick() == Some(old) {
                        self.state.set_nick(Some(new.to_string()));
                        self.state.set_registered(false);
                    }
                    self.state.rename_member(old, new);
                }
            }
            "Topic" => {
                if let Some(c) = patterns::TOPIC_CHANGED.captures(text) {
                    self.state.set_topic(Some(c[1].to_string()));
                }
            }
            "Sign-on" | "Arrive" => {
                let mut parts = text.split(' ');
                if let (Some(nick), Some(loginid)) = (parts.next(), parts.next()) {
                    let loginid = loginid.trim_start_matches('(').trim_end_matches(')');
                    self.state.add_member(nick, loginid);
                }
            }
            "Sign-off" | "Depart" => {
                if text.starts_with("Your moderator") {
                    if let Some(moderator) = self.state.moderator().map(str::to_string) {
                        self.state.remove_member(&moderator);
                    }
                    self.state.set_moderator(None);
                } else if let Some(nick) = text.split(' ').next() {
                    self.state.remove_member(nick);
                }
            }
            "Pass" => {
                let moderator = if let Some(c) = patterns::MODERATION_PASSED.captures(text) {
                    Some(c[2].to_string())
                } else {
                    patterns::MODERATOR_IS.captures(text).map(|c| c[1].to_string())
                };
                self.state.set_moderator(moderator);
            }
            "Register" if text.starts_with("Nick registered") => {
                self.state.set_registered(true);
            }
            "Change" => self.process_change(text),
            _ => {}
        }

        Ok(())
    }

    /// `Change` messages flip one character of the three-letter group
    /// status; which position depends on the class of the extracted flag.
    fn process_change(&mut self, text: &str) {
        let word = patterns::GROUP_MADE
            .captures(text)
            .or_else(|| patterns::GROUP_NOW.captures(text))
            .map(|c| c[1].to_string())
            .or_else(|| text.contains("now public").then(|| "public".to_string()));

        let Some(word) = word else {
            if text.contains("just relinquished moderation") {
                self.state.set_moderator(None);
            }
            return;
        };

        let (Some(flag), Some(status)) = (word.chars().next(), self.state.group_status()) else {
            return;
        };

        let mut chars: Vec<char> = status.chars().collect();
        if chars.len() != 3 {
            return;
        }
        match flag {
            'v' | 's' | 'i' => chars[1] = flag,
            'p' | 'm' | 'r' | 'c' => chars[0] = flag,
            'q' | 'n' | 'l' => chars[2] = flag,
            _ => return,
        }
        self.state.set_group_status(Some(chars.into_iter().collect()));
    }

    fn process_output(&mut self, fields: &[String]) {
        if fields.len() < 2 {
            return;
        }
        match fields[0].as_str() {
            "co" => {
                if self.state.joining()
                    && let Some(c) = patterns::GROUP_HEADER.captures(&fields[1])
                {
                    self.state.set_group_status(Some(c[2].to_string()));
                    let moderator = (&c[3] != "(None)").then(|| c[3].to_string());
                    self.state.set_moderator(moderator);
                    let topic = (&c[4] != "(None)").then(|| c[4].to_string());
                    self.state.set_topic(topic);
                }
            }
            "wl" if self.state.joining() => {
                if fields.len() > 7 {
                    let loginid = format!("{}@{}", fields[6], fields[7]);
                    self.state.add_member(&fields[2], &loginid);
                }
            }
            _ => {}
        }
    }
}

//! Composable consumers of multi-message ICB replies.
//!
//! ICB answers several queries as a run of output (`i`) or status (`d`)
//! messages with no explicit terminator. A stream parser is a small state
//! machine fed every incoming message; it pushes typed events and reports
//! whether it is still active. The session keeps active parsers in a FIFO
//! registry and drops the ones that complete.
//!
//! Parsers are single-shot: once completed they never match again.

use regex::Regex;
use std::sync::LazyLock;

static STATUS_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Name: (\w+) Mod: .*").unwrap());

/// Lifecycle of a stream parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Waiting,
    Started,
    ReadingInvitations,
    ReadingTalkers,
    Completed,
}

fn is_co(ty: char, fields: &[String]) -> bool {
    ty == 'i' && fields.len() == 2 && fields[0] == "co"
}

fn is_wl(ty: char, fields: &[String]) -> bool {
    ty == 'i' && fields.first().is_some_and(|f| f == "wl")
}

// ============================================================================
// Status listing
// ============================================================================

/// Events emitted by [`StatusParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A group block started.
    Begin { group: String },
    /// One invited name (or address) was listed.
    Invitation { name: String, is_address: bool },
    /// One talker name (or address) was listed.
    Talker { name: String, is_address: bool },
    /// The current group block (or the whole listing) ended.
    End,
}

/// Parses the `status` command's dump of consecutive `i co` lines.
#[derive(Debug)]
pub struct StatusParser {
    state: ParserState,
    is_address: bool,
}

impl Default for StatusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Waiting,
            is_address: false,
        }
    }

    /// Force termination, e.g. after the queried group has been seen.
    pub fn stop(&mut self) {
        self.state = ParserState::Completed;
    }

    /// Feed one message; returns whether the parser is still active.
    pub fn feed(&mut self, ty: char, fields: &[String], out: &mut Vec<StatusEvent>) -> bool {
        let mut again = true;

        while again {
            again = false;

            match self.state {
                ParserState::Completed => {}
                ParserState::Waiting => {
                    if is_co(ty, fields)
                        && let Some(c) = STATUS_HEADER.captures(&fields[1])
                    {
                        self.state = ParserState::Started;
                        out.push(StatusEvent::Begin {
                            group: c[1].to_string(),
                        });
                    }
                }
                _ => {
                    if is_co(ty, fields) {
                        again = self.read_line(&fields[1], out);
                    } else {
                        out.push(StatusEvent::End);
                        self.state = ParserState::Completed;
                    }
                }
            }
        }

        self.state != ParserState::Completed
    }

    /// Returns true when the line opens a fresh group block and must be
    /// re-examined from the waiting state.
    fn read_line(&mut self, line: &str, out: &mut Vec<StatusEvent>) -> bool {
        if line.starts_with("Nicks invited") || line.starts_with("Addresses invited") {
            self.state = ParserState::ReadingInvitations;
            let rest = if line.starts_with("Nicks") {
                self.is_address = false;
                line.get(13..).unwrap_or("")
            } else {
                self.is_address = true;
                line.get(17..).unwrap_or("")
            };
            self.emit_names(rest.trim_matches([':', ' ']), true, out);
        } else if line.starts_with("Talkers") {
            self.state = ParserState::ReadingTalkers;
            let rest = if line.starts_with("Talkers (") {
                self.is_address = true;
                line.get(19..).unwrap_or("")
            } else {
                self.is_address = false;
                line.get(7..).unwrap_or("")
            };
            self.emit_names(rest.trim_matches([':', ' ']), false, out);
        } else if line.starts_with("Name:") {
            out.push(StatusEvent::End);
            self.state = ParserState::Waiting;
            return true;
        } else {
            match self.state {
                ParserState::ReadingInvitations => self.emit_names(line, true, out),
                ParserState::ReadingTalkers => self.emit_names(line, false, out),
                _ => {}
            }
        }

        false
    }

    fn emit_names(&self, line: &str, invitations: bool, out: &mut Vec<StatusEvent>) {
        for name in line.split(',') {
            let name = name.trim().to_string();
            out.push(if invitations {
                StatusEvent::Invitation {
                    name,
                    is_address: self.is_address,
                }
            } else {
                StatusEvent::Talker {
                    name,
                    is_address: self.is_address,
                }
            });
        }
    }
}

// ============================================================================
// Who listing
// ============================================================================

/// One row of a who listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoEntry {
    pub is_moderator: bool,
    pub nick: String,
    /// Seconds the user has been idle.
    pub idle: u64,
    pub loginid: String,
    pub host: String,
    /// Raw status flags, e.g. `aw` for away.
    pub status: String,
}

/// Events emitted by [`WhoParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhoEvent {
    User(WhoEntry),
    End,
}

/// Parses the rows of a `w` who listing.
///
/// Messages before the first `wl` row are ignored (the listing is usually
/// preceded by a `co` header line); the first non-`wl` message after a row
/// ends the listing.
#[derive(Debug)]
pub struct WhoParser {
    state: ParserState,
}

impl Default for WhoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Waiting,
        }
    }

    pub fn stop(&mut self) {
        self.state = ParserState::Completed;
    }

    /// Feed one message; returns whether the parser is still active.
    pub fn feed(&mut self, ty: char, fields: &[String], out: &mut Vec<WhoEvent>) -> bool {
        match self.state {
            ParserState::Completed => false,
            _ if is_wl(ty, fields) => {
                self.state = ParserState::Started;
                if let Some(entry) = parse_row(fields) {
                    out.push(WhoEvent::User(entry));
                }
                true
            }
            ParserState::Started => {
                out.push(WhoEvent::End);
                self.state = ParserState::Completed;
                false
            }
            _ => true,
        }
    }
}

fn parse_row(fields: &[String]) -> Option<WhoEntry> {
    if fields.len() < 8 {
        return None;
    }
    Some(WhoEntry {
        is_moderator: fields[1].trim() == "m",
        nick: fields[2].clone(),
        idle: fields[3].parse().unwrap_or(0),
        loginid: fields[6].clone(),
        host: fields[7].clone(),
        status: fields.get(8).cloned().unwrap_or_default(),
    })
}

// ============================================================================
// Away notification
// ============================================================================

/// Events emitted by [`AwayParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwayEvent {
    /// The away text arrived.
    Found { text: String },
    /// The answering pong arrived without an away notification.
    End,
}

/// Waits for the away notification a `beep` provokes.
///
/// The session pairs the `beep` with a ping, so a pong while still waiting
/// means the target was not away after all.
#[derive(Debug)]
pub struct AwayParser {
    state: ParserState,
}

impl Default for AwayParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AwayParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Waiting,
        }
    }

    pub fn stop(&mut self) {
        self.state = ParserState::Completed;
    }

    /// Feed one message; returns whether the parser is still active.
    pub fn feed(&mut self, ty: char, fields: &[String], out: &mut Vec<AwayEvent>) -> bool {
        if self.state == ParserState::Completed {
            return false;
        }
        if ty == 'd' && fields.len() == 2 && fields[0] == "Away" {
            out.push(AwayEvent::Found {
                text: fields[1].clone(),
            });
            self.state = ParserState::Completed;
            false
        } else if ty == 'm' {
            out.push(AwayEvent::End);
            self.state = ParserState::Completed;
            false
        } else {
            true
        }
    }
}

// ============================================================================
// Translator-facing wrappers
// ============================================================================

/// Which list a `MODE +I` query extracts from the status dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Invitations,
    Talkers,
}

/// Events surfaced by [`ListFromStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    Found { name: String },
    End,
}

/// Collects invitation or talker names out of a status dump, stopping once
/// the queried group's block has been consumed.
#[derive(Debug)]
pub struct ListFromStatus {
    inner: StatusParser,
    group: String,
    kind: ListKind,
    found_group: Option<String>,
}

impl ListFromStatus {
    pub fn new(group: impl Into<String>, kind: ListKind) -> Self {
        Self {
            inner: StatusParser::new(),
            group: group.into(),
            kind,
            found_group: None,
        }
    }

    /// Feed one message; returns whether the wrapper is still active.
    pub fn feed(&mut self, ty: char, fields: &[String], out: &mut Vec<ListEvent>) -> bool {
        let mut events = Vec::new();
        let mut active = self.inner.feed(ty, fields, &mut events);

        for event in events {
            match event {
                StatusEvent::Begin { group } => self.found_group = Some(group),
                StatusEvent::Invitation { name, .. } if self.kind == ListKind::Invitations => {
                    out.push(ListEvent::Found { name });
                }
                StatusEvent::Talker { name, .. } if self.kind == ListKind::Talkers => {
                    out.push(ListEvent::Found { name });
                }
                StatusEvent::End => {
                    out.push(ListEvent::End);
                    if self.found_group.as_deref() == Some(self.group.as_str()) {
                        self.inner.stop();
                        active = false;
                    }
                }
                _ => {}
            }
        }

        active
    }
}

/// Outcome reported by [`FindUser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindUserEvent {
    Found(WhoEntry),
    NotFound,
}

/// Searches a who listing for a single nick, stopping early on a hit.
#[derive(Debug)]
pub struct FindUser {
    inner: WhoParser,
    nick: String,
    found: bool,
}

impl FindUser {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            inner: WhoParser::new(),
            nick: nick.into(),
            found: false,
        }
    }

    /// The nick this query is looking for.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Feed one message; returns whether the query is still active.
    pub fn feed(&mut self, ty: char, fields: &[String], out: &mut Vec<FindUserEvent>) -> bool {
        let mut events = Vec::new();
        let mut active = self.inner.feed(ty, fields, &mut events);

        for event in events {
            match event {
                WhoEvent::User(entry) if entry.nick == self.nick && !self.found => {
                    self.found = true;
                    out.push(FindUserEvent::Found(entry));
                    self.inner.stop();
                    active = false;
                }
                WhoEvent::End => {
                    if !self.found {
                        out.push(FindUserEvent::NotFound);
                    }
                }
                _ => {}
            }
        }

        active
    }
}

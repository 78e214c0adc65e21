//! The per-session translation engine.
//!
//! One [`Translator`] sits between an IRC client and an ICB connection. It
//! dispatches inbound IRC commands to upstream ICB commands, turns ICB
//! events into IRC numerics and messages, and mirrors group state changes
//! (membership, topic, flags, moderator) as IRC traffic.
//!
//! Output lines accumulate in an internal buffer; the driving task flushes
//! them after every handled event, so all writes to the IRC transport stay
//! serialized.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::Result;
use crate::icb::packet::Encoder;
use crate::icb::parsers::{
    AwayEvent, AwayParser, FindUser, FindUserEvent, ListEvent, ListFromStatus, ListKind, WhoEntry,
};
use crate::icb::state::{self, FieldChange, State, StateListener};
use crate::icb::Client;
use crate::irc;
use crate::validate;

use super::{AwayCache, Session};

mod patterns {
    use regex::Regex;
    use std::sync::LazyLock;

    pub static INVITED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^You are invited to group (\w+)").unwrap());
    pub static CAN_TALK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^You can now talk in group (\w+)").unwrap());
}

/// ICB messages are sent in chunks of at most this many characters.
const MESSAGE_CHUNK: usize = 200;

/// A pending multi-message ICB query, fed from the read loop.
enum PendingOp {
    InviteList(ListFromStatus),
    Whois(FindUser),
    Away { nick: String, parser: AwayParser },
}

/// Deferred effect of feeding the pending queries.
enum Action {
    ListFound(String),
    ListEnd,
    WhoisFound(WhoEntry),
    WhoisNotFound(String),
    AwayFound { nick: String, text: String },
    AwayEnd { nick: String },
}

/// Translation engine for one session.
pub struct Translator {
    config: Arc<Config>,
    session: Session,
    peer: IpAddr,
    away_cache: AwayCache,
    pending: Vec<PendingOp>,
    out: Vec<String>,
    shutdown: bool,
}

impl Translator {
    pub fn new(config: Arc<Config>, peer: IpAddr) -> Self {
        Self {
            config,
            session: Session::new(),
            peer,
            away_cache: AwayCache::default(),
            pending: Vec::new(),
            out: Vec::new(),
            shutdown: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// The peer address as passed to the ICB login packet.
    pub fn peer_address(&self) -> String {
        self.peer.to_string()
    }

    /// Both NICK and USER have been accepted; time to go upstream.
    pub fn ready_for_login(&self) -> bool {
        !self.shutdown && !self.session.nick.is_empty() && !self.session.loginid.is_empty()
    }

    /// Take the buffered IRC output lines.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.out)
    }

    fn writeln(&mut self, line: String) {
        self.out.push(line);
    }

    /// Emit a fatal numeric and stop reacting to further IRC input.
    fn die(&mut self, code: u16, params: String) {
        self.writeln(format!(
            ":{} {:03} {}",
            self.config.server_hostname, code, params
        ));
        self.shutdown = true;
    }

    // ========================================================================
    // IRC side, registration phase
    // ========================================================================

    /// Handle a message before the upstream connection exists. Only NICK
    /// and USER are recognized here.
    pub async fn handle_pre_login(&mut self, msg: &irc::Message) {
        if self.shutdown {
            return;
        }
        tracing::debug!(command = %msg.command, params = ?msg.params, "message received");

        match msg.command.to_lowercase().as_str() {
            "nick" => self.nick_received_pre(&msg.params),
            "user" => self.user_received_pre(&msg.params).await,
            _ => {}
        }
    }

    fn nick_received_pre(&mut self, params: &[String]) {
        if params.len() != 1 || !validate::is_valid_nick(&params[0]) {
            self.writeln(format!(
                ":{} 432 :Erroneous nickname",
                self.config.server_hostname
            ));
        } else {
            self.session.nick = params[0].clone();
        }
    }

    async fn user_received_pre(&mut self, params: &[String]) {
        if params.is_empty() || !validate::is_valid_loginid(&params[0]) {
            self.die(461, "No valid username found.".into());
        } else if params.len() < 4 {
            self.die(461, "No valid hostname found.".into());
        } else {
            self.session.loginid = params[0].clone();
            self.session.host = crate::util::fqdn(self.peer).await;
        }
    }

    // ========================================================================
    // IRC side, post-login dispatch
    // ========================================================================

    pub async fn handle_irc<S>(&mut self, client: &mut Client<S>, msg: &irc::Message) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.shutdown {
            return Ok(());
        }
        tracing::debug!(command = %msg.command, params = ?msg.params, "message received");

        match msg.command.to_lowercase().as_str() {
            "ping" => self.writeln(format!("PONG {}", self.config.server_hostname)),
            "nick" => self.nick_received(client, &msg.params).await?,
            "mode" => self.mode_received(client, &msg.params).await?,
            "who" => self.who_received(&msg.params),
            "whois" => self.whois_received(client, &msg.params).await?,
            "join" => self.join_received(client, &msg.params).await?,
            "privmsg" => self.privmsg_received(client, &msg.params).await?,
            "topic" => self.topic_received(client, &msg.params).await?,
            "quit" => client.quit().await?,
            _ => {}
        }
        Ok(())
    }

    async fn nick_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if params.len() != 1 || !validate::is_valid_nick(&params[0]) {
            self.writeln(format!(
                ":{} 432 :Erroneous nickname",
                self.config.server_hostname
            ));
        } else {
            client.command("name", &params[0]).await?;
        }
        Ok(())
    }

    async fn join_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if params.len() != 1 {
            self.writeln(format!(
                ":{} ERROR :You can only join a single channel.",
                self.config.server_hostname
            ));
        } else if !params[0].starts_with('#')
            || params[0].len() < 2
            || !validate::is_valid_group(&params[0][1..])
        {
            self.writeln(format!(
                ":{} 403 {} {} :No such channel",
                self.config.server_hostname, self.session.nick, params[0]
            ));
        } else {
            client.command("g", &params[0][1..]).await?;
        }
        Ok(())
    }

    async fn privmsg_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if params.len() < 2 {
            self.writeln(format!(
                ":{} 461 {} PRIVMSG :Not enough parameters",
                self.config.server_hostname, self.session.nick
            ));
            return Ok(());
        }
        if params[0].starts_with('#') {
            // open message to the current group
            for part in wrap(&params[1], MESSAGE_CHUNK) {
                let frame = Encoder::new('b').field(&part).encode()?;
                client.send(frame).await?;
            }
        } else {
            for part in wrap(&params[1], MESSAGE_CHUNK) {
                client
                    .command("m", &format!("{} {}", params[0], part))
                    .await?;
            }
        }
        Ok(())
    }

    async fn topic_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if params.len() < 2 {
            self.writeln(format!(
                ":{} 461 {} TOPIC :Not enough parameters",
                self.config.server_hostname, self.session.nick
            ));
        } else {
            client.command("topic", &params[1]).await?;
        }
        Ok(())
    }

    fn who_received(&mut self, params: &[String]) {
        for p in params {
            if p != "o" {
                self.writeln(format!(
                    ":{} 315 {} {} :End of WHO list",
                    self.config.server_hostname, self.session.nick, p
                ));
            }
        }
    }

    async fn whois_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(nick) = params.first() {
            self.pending.push(PendingOp::Whois(FindUser::new(nick.clone())));
            client.command("w", "").await?;
        }
        Ok(())
    }

    async fn mode_received<S>(&mut self, client: &mut Client<S>, params: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match params.first() {
            None => self.writeln(format!(
                ":{} 462 {} mode :Not enough Parameters.",
                self.config.server_hostname, self.session.nick
            )),
            Some(target) => match target.strip_prefix('#') {
                Some(channel) => self.channel_mode(client, channel, &params[1..]).await?,
                None => self.user_mode(target, &params[1..]),
            },
        }
        Ok(())
    }

    async fn channel_mode<S>(
        &mut self,
        client: &mut Client<S>,
        channel: &str,
        params: &[String],
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if Some(channel) != client.state().group() {
            self.writeln(format!(
                ":{} 441 {} #{} :You're not in this channel.",
                self.config.server_hostname, self.session.nick, channel
            ));
            return Ok(());
        }

        if params.is_empty() {
            let flags = map_group_status(client.state().group_status().unwrap_or_default());
            self.writeln(format!(
                ":{} 324 {} #{} {}",
                self.config.server_hostname, self.session.nick, channel, flags
            ));
        } else if params.len() == 1 {
            match params[0].as_str() {
                "+b" => self.writeln(format!(
                    ":{} 368 {} :End of BAN list",
                    self.config.server_hostname, self.session.nick
                )),
                "+e" => self.writeln(format!(
                    ":{} 349 {} :End of EXCEPTION list",
                    self.config.server_hostname, self.session.nick
                )),
                "+I" => self.send_invitations(client).await?,
                _ => self.writeln(format!(
                    ":{} 482 #{} :Cannot change mode over IRC protocol.",
                    self.config.server_hostname, channel
                )),
            }
        }
        Ok(())
    }

    fn user_mode(&mut self, user: &str, params: &[String]) {
        if user == self.session.nick {
            self.writeln(format!(
                ":{} 221 {} +i",
                self.config.server_hostname, self.session.nick
            ));
        } else if !params.is_empty() {
            self.writeln(format!(
                ":{} 502 {} :Cannot change mode for other users.",
                self.config.server_hostname, self.session.nick
            ));
        } else {
            self.writeln(format!(":{} 221 {} +i", self.config.server_hostname, user));
        }
    }

    /// `MODE #chan +I`: the invitation (or talker) list has to be dug out
    /// of the status dump. Restricted groups carry invitations, controlled
    /// groups carry talkers; anything else has an empty list.
    async fn send_invitations<S>(&mut self, client: &mut Client<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        client.command("status", "").await?;
        client.ping().await?;

        let kind = match client.state().group_status().and_then(|s| s.chars().next()) {
            Some('r') => Some(ListKind::Invitations),
            Some('c') => Some(ListKind::Talkers),
            _ => None,
        };
        let group = client.state().group().unwrap_or_default().to_string();

        if let Some(kind) = kind {
            self.pending
                .push(PendingOp::InviteList(ListFromStatus::new(group, kind)));
        } else {
            self.writeln(format!(
                ":{} 347 {} #{} :End of INVITATION list",
                self.config.server_hostname, self.session.nick, group
            ));
        }
        Ok(())
    }

    // ========================================================================
    // ICB side
    // ========================================================================

    /// Handle one upstream message after [`Client::process`] has applied
    /// its built-in effect. State changes fan out first, then the pending
    /// stream parsers are fed, then the message itself is translated.
    pub async fn handle_icb<S>(
        &mut self,
        client: &mut Client<S>,
        ty: char,
        fields: &[String],
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let changes = client.state_mut().take_changes();
        if !changes.is_empty() {
            let mut fanout = Fanout {
                tr: &mut *self,
                state: client.state(),
            };
            state::dispatch(changes, &mut fanout);
        }

        let actions = self.feed_pending(ty, fields);
        for action in actions {
            self.apply_action(client, action).await?;
        }

        match ty {
            'j' => self.welcome(),
            'b' => {
                if fields.len() >= 2 {
                    self.writeln(format!(
                        ":{} PRIVMSG #{} :{}",
                        fields[0],
                        client.state().group().unwrap_or_default(),
                        fields[1]
                    ));
                }
            }
            'c' => {
                if fields.len() >= 2 {
                    self.writeln(format!(
                        ":{} PRIVMSG {} :{}",
                        fields[0],
                        client.state().nick().unwrap_or_default(),
                        fields[1]
                    ));
                }
            }
            'd' => {
                if fields.len() >= 2 {
                    self.status_message(&fields[0], &fields[1]);
                }
            }
            'e' => {
                if let Some(text) = fields.first() {
                    self.error_message(text);
                }
            }
            'i' => {
                if fields.len() >= 2 && fields[0] == "co" && !client.state().joining() {
                    self.writeln(format!("NOTICE {} :{}", self.session.nick, fields[1]));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Feed every pending query, dropping the completed ones.
    fn feed_pending(&mut self, ty: char, fields: &[String]) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut still_active = Vec::new();

        for mut op in std::mem::take(&mut self.pending) {
            let active = match &mut op {
                PendingOp::InviteList(parser) => {
                    let mut events = Vec::new();
                    let active = parser.feed(ty, fields, &mut events);
                    for event in events {
                        actions.push(match event {
                            ListEvent::Found { name } => Action::ListFound(name),
                            ListEvent::End => Action::ListEnd,
                        });
                    }
                    active
                }
                PendingOp::Whois(parser) => {
                    let mut events = Vec::new();
                    let active = parser.feed(ty, fields, &mut events);
                    for event in events {
                        actions.push(match event {
                            FindUserEvent::Found(entry) => Action::WhoisFound(entry),
                            FindUserEvent::NotFound => {
                                Action::WhoisNotFound(parser.nick().to_string())
                            }
                        });
                    }
                    active
                }
                PendingOp::Away { nick, parser } => {
                    let mut events = Vec::new();
                    let active = parser.feed(ty, fields, &mut events);
                    for event in events {
                        actions.push(match event {
                            AwayEvent::Found { text } => Action::AwayFound {
                                nick: nick.clone(),
                                text,
                            },
                            AwayEvent::End => Action::AwayEnd { nick: nick.clone() },
                        });
                    }
                    active
                }
            };
            if active {
                still_active.push(op);
            }
        }

        self.pending = still_active;
        actions
    }

    async fn apply_action<S>(&mut self, client: &mut Client<S>, action: Action) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match action {
            Action::ListFound(name) => {
                let group = client.state().group().unwrap_or_default().to_string();
                self.writeln(format!(
                    ":{} 346 {} #{} :{}",
                    self.config.server_hostname, self.session.nick, group, name
                ));
            }
            Action::ListEnd => {
                let group = client.state().group().unwrap_or_default().to_string();
                self.writeln(format!(
                    ":{} 347 {} #{} :End of INVITATION list",
                    self.config.server_hostname, self.session.nick, group
                ));
            }
            Action::WhoisFound(entry) => self.send_whois(client, entry).await?,
            Action::WhoisNotFound(nick) => self.writeln(format!(
                ":{} 401 {} {} :No such nick.",
                self.config.server_hostname, self.session.nick, nick
            )),
            Action::AwayFound { nick, text } => self.end_of_whois(&nick, Some(&text), true),
            Action::AwayEnd { nick } => self.end_of_whois(&nick, None, false),
        }
        Ok(())
    }

    async fn send_whois<S>(&mut self, client: &mut Client<S>, entry: WhoEntry) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let host = self.config.server_hostname.clone();
        let nick = self.session.nick.clone();

        self.writeln(format!(
            ":{host} 311 {nick} {} {} {} * :{}",
            entry.nick, entry.loginid, entry.host, entry.loginid
        ));
        self.writeln(format!(":{host} 312 {nick} {} {host} :ICB Proxy", entry.nick));
        if entry.is_moderator {
            self.writeln(format!(":{host} 313 {nick} {} :Moderator", entry.nick));
        }
        self.writeln(format!(
            ":{host} 317 {nick} {} {} :seconds idle",
            entry.nick, entry.idle
        ));

        if entry.status.contains("aw") {
            if let Some(text) = self.away_cache.get(&entry.nick) {
                self.end_of_whois(&entry.nick, Some(&text), false);
            } else {
                self.pending.push(PendingOp::Away {
                    nick: entry.nick.clone(),
                    parser: AwayParser::new(),
                });
                client.command("beep", &entry.nick).await?;
                client.ping().await?;
            }
        } else {
            self.end_of_whois(&entry.nick, None, false);
        }
        Ok(())
    }

    fn end_of_whois(&mut self, nick: &str, away: Option<&str>, update_cache: bool) {
        if let Some(text) = away {
            self.writeln(format!(
                ":{} 301 {} {} :{}",
                self.config.server_hostname, self.session.nick, nick, text
            ));
            if update_cache {
                self.away_cache.insert(nick, text);
            }
        }
        self.writeln(format!(
            ":{} 318 {} {} :End of WHOIS",
            self.config.server_hostname, self.session.nick, nick
        ));
    }

    fn welcome(&mut self) {
        let host = self.config.server_hostname.clone();
        let nick = self.session.nick.clone();

        self.writeln(format!(
            ":{host} 001 {nick} :Welcome to the Internet Relay Network {nick}."
        ));
        self.writeln(format!(
            ":{host} 002 {nick} :Your host is {host}, running version v{}.",
            crate::VERSION
        ));
        self.writeln(format!(
            ":{host} 004 {nick} :{} v{} oi npstiqC",
            crate::NAME,
            crate::VERSION
        ));
        self.writeln(format!(":{host} 375 {nick} :Message of the Day"));
        self.writeln(format!(":{host} 376 {nick} :End of MOTD"));
        self.writeln(format!(":{host} 221 {nick} +i"));
    }

    fn status_message(&mut self, category: &str, text: &str) {
        match category {
            "Register" if text.starts_with("Nick already in use") => {
                self.die(436, format!("{} :Nickname collision", self.session.nick));
            }
            "FYI" => {
                if let Some(c) = patterns::INVITED.captures(text) {
                    self.invite(&c[1]);
                }
            }
            "RSVP" => {
                let invitation = patterns::CAN_TALK
                    .captures(text)
                    .or_else(|| patterns::INVITED.captures(text))
                    .map(|c| c[1].to_string());
                if let Some(group) = invitation {
                    self.invite(&group);
                }
            }
            _ => {}
        }
    }

    fn invite(&mut self, group: &str) {
        self.writeln(format!(
            ":{} INVITE {} #{}",
            self.config.server_hostname, self.session.nick, group
        ));
    }

    fn error_message(&mut self, text: &str) {
        let command = if text.starts_with("You don't have administrative privileges") {
            "481"
        } else if text.starts_with("You aren't the moderator") {
            "482"
        } else if text.starts_with("Access denied.") {
            "465"
        } else {
            "ERROR"
        };
        self.writeln(format!(
            ":{} {} :{}",
            self.config.server_hostname, command, text
        ));
    }
}

// ============================================================================
// State-change fan-out
// ============================================================================

/// Adapter replaying queued state changes as IRC traffic.
struct Fanout<'a> {
    tr: &'a mut Translator,
    state: &'a State,
}

impl Fanout<'_> {
    fn after_join(&mut self) {
        let host = self.tr.config.server_hostname.clone();
        let channel = self.state.group().unwrap_or_default().to_string();
        let state_nick = self.state.nick().unwrap_or_default().to_string();
        let status = self.state.group_status().unwrap_or_default();
        let moderator = self.state.moderator();

        self.tr
            .out
            .push(format!(":{} JOIN #{channel}", self.tr.session.clientid()));

        match self.state.topic() {
            Some(topic) => self.tr.out.push(format!(
                ":{host} 332 {} #{channel} :{topic}",
                self.tr.session.nick
            )),
            None => self
                .tr
                .out
                .push(format!(":{host} 331 #{channel} :Topic not set.")),
        }

        let visibility = if status.contains('i') {
            "@"
        } else if status.contains('s') {
            "*"
        } else {
            "="
        };
        for nick in self.state.members() {
            let user_flag = if Some(nick) == moderator { "@" } else { "" };
            self.tr.out.push(format!(
                ":{host} 353 {state_nick} {visibility} #{channel} :{user_flag}{nick}"
            ));
        }
        self.tr.out.push(format!(
            ":{host} 366 {state_nick} #{channel} :End of NAMES list"
        ));
    }

    fn mode_diff(&mut self, old: &str, new: &str) {
        let host = self.tr.config.server_hostname.clone();
        let group = self.state.group().unwrap_or_default().to_string();
        let (removed, added) = diff_modes(old, new);
        for c in removed {
            self.tr.out.push(format!(":{host} MODE #{group} -{c}"));
        }
        for c in added {
            self.tr.out.push(format!(":{host} MODE #{group} +{c}"));
        }
    }
}

impl StateListener for Fanout<'_> {
    fn changed(&mut self, change: &FieldChange) {
        match change {
            FieldChange::Group { old, .. } => {
                if let Some(old) = old {
                    let line = format!(":{} PART :#{}", self.tr.session.clientid(), old);
                    self.tr.out.push(line);
                }
            }
            FieldChange::Joining { new: false, .. } => self.after_join(),
            _ if self.state.joining() => {}
            FieldChange::Topic {
                new: Some(topic), ..
            } => {
                let line = format!(
                    ":{} 332 {} #{} :{topic}",
                    self.tr.config.server_hostname,
                    self.tr.session.nick,
                    self.state.group().unwrap_or_default()
                );
                self.tr.out.push(line);
            }
            FieldChange::Nick {
                old: Some(_),
                new: Some(new),
            } => {
                let line = format!(":{} NICK {new}", self.tr.session.clientid());
                self.tr.out.push(line);
                self.tr.session.nick = new.clone();
            }
            FieldChange::GroupStatus {
                old: Some(old),
                new: Some(new),
            } => self.mode_diff(old, new),
            FieldChange::Moderator { old, new } => {
                let host = self.tr.config.server_hostname.clone();
                let group = self.state.group().unwrap_or_default().to_string();
                if let Some(old) = old {
                    self.tr.out.push(format!(":{host} MODE #{group} -o {old}"));
                }
                if let Some(new) = new {
                    self.tr.out.push(format!(":{host} MODE #{group} +o {new}"));
                }
            }
            _ => {}
        }
    }

    fn member_added(&mut self, nick: &str, loginid: &str) {
        if !self.state.joining() && nick != self.tr.session.nick {
            let line = format!(
                ":{nick}!~{loginid} JOIN :#{}",
                self.state.group().unwrap_or_default()
            );
            self.tr.out.push(line);
        }
    }

    fn member_removed(&mut self, nick: &str, loginid: &str) {
        if !self.state.joining() && nick != self.tr.session.nick {
            let line = format!(
                ":{nick}!~{loginid} PART :#{}",
                self.state.group().unwrap_or_default()
            );
            self.tr.out.push(line);
        }
    }

    fn member_renamed(&mut self, old: &str, new: &str, loginid: &str) {
        if !self.state.joining() && new != self.tr.session.nick {
            let line = format!(":{old}!~{loginid} NICK {new}");
            self.tr.out.push(line);
        }
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Map a three-letter ICB group status onto an IRC channel mode string.
///
/// The base is `+n`; moderated, restricted and controlled groups add topic
/// and invitation flags, hidden visibilities replace the whole string, and
/// quiet groups append `q`.
fn map_group_status(flags: &str) -> String {
    let mut chars = flags.chars();
    let (control, visibility, volume) = (chars.next(), chars.next(), chars.next());

    let mut mapped = String::from("+n");
    match control {
        Some('m') => mapped.push('t'),
        Some('r') => mapped.push_str("ti"),
        Some('c') => mapped.push_str("tC"),
        _ => {}
    }
    match visibility {
        Some('s') => mapped = "p".into(),
        Some('i') => mapped = "s".into(),
        _ => {}
    }
    if volume == Some('q') {
        mapped.push('q');
    }
    mapped
}

/// Per-flag difference between two group status strings, in mapped IRC
/// terms. The leading mode character is not part of the comparison.
fn diff_modes(old: &str, new: &str) -> (Vec<char>, Vec<char>) {
    let old: Vec<char> = map_group_status(old).chars().skip(1).collect();
    let new: Vec<char> = map_group_status(new).chars().skip(1).collect();

    let removed = old.iter().copied().filter(|c| !new.contains(c)).collect();
    let added = new.iter().copied().filter(|c| !old.contains(c)).collect();
    (removed, added)
}

/// Greedy word wrap; words longer than the width are split hard.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut len = 0;

    for word in text.split_whitespace() {
        let mut word = word;
        let mut word_len = word.chars().count();

        while word_len > width {
            if len > 0 {
                lines.push(std::mem::take(&mut line));
                len = 0;
            }
            let split = word
                .char_indices()
                .nth(width)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            lines.push(word[..split].to_string());
            word = &word[split..];
            word_len = word.chars().count();
        }
        if word_len == 0 {
            continue;
        }

        if len == 0 {
            line.push_str(word);
            len = word_len;
        } else if len + 1 + word_len <= width {
            line.push(' ');
            line.push_str(word);
            len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
            len = word_len;
        }
    }
    if len > 0 {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    fn translator() -> Translator {
        let config = Arc::new(Config {
            server_hostname: "bridge.example.org".into(),
            ..Default::default()
        });
        Translator::new(config, "127.0.0.1".parse().unwrap())
    }

    fn icb_client() -> (Client<DuplexStream>, DuplexStream) {
        let (near, far) = duplex(4096);
        (Client::new(near), far)
    }

    fn msg(command: &str, params: &[&str]) -> irc::Message {
        irc::Message {
            prefix: None,
            command: command.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn map_group_status_forms() {
        assert_eq!(map_group_status("pvn"), "+n");
        assert_eq!(map_group_status("mvn"), "+nt");
        assert_eq!(map_group_status("rvn"), "+nti");
        assert_eq!(map_group_status("cvn"), "+ntC");
        assert_eq!(map_group_status("psn"), "p");
        assert_eq!(map_group_status("pin"), "s");
        assert_eq!(map_group_status("pvq"), "+nq");
        assert_eq!(map_group_status("psq"), "pq");
    }

    #[test]
    fn mode_diff_is_per_flag() {
        // public to moderated adds exactly +t
        assert_eq!(diff_modes("pvn", "mvn"), (vec![], vec!['t']));
        assert_eq!(diff_modes("mvn", "pvn"), (vec!['t'], vec![]));
        assert_eq!(diff_modes("pvn", "rvn"), (vec![], vec!['t', 'i']));
        assert_eq!(diff_modes("pvn", "pvn"), (vec![], vec![]));
    }

    #[test]
    fn wrap_respects_word_boundaries() {
        assert_eq!(wrap("hello there world", 11), ["hello there", "world"]);
        assert_eq!(wrap("", 10), Vec::<String>::new());
        assert_eq!(wrap("   ", 10), Vec::<String>::new());
        assert_eq!(wrap("short", 200), ["short"]);
    }

    #[test]
    fn wrap_splits_overlong_words() {
        let lines = wrap(&"x".repeat(450), 200);
        assert_eq!(
            lines.iter().map(String::len).collect::<Vec<_>>(),
            [200, 200, 50]
        );
    }

    #[tokio::test]
    async fn pre_login_collects_nick_and_user() {
        let mut tr = translator();
        tr.handle_pre_login(&msg("NICK", &["alice"])).await;
        assert!(!tr.ready_for_login());
        tr.handle_pre_login(&msg("USER", &["alice", "0", "*", "a"]))
            .await;
        assert!(tr.ready_for_login());
        assert_eq!(tr.session().nick, "alice");
        assert_eq!(tr.session().loginid, "alice");
        assert!(!tr.session().host.is_empty());
    }

    #[tokio::test]
    async fn pre_login_rejects_bad_nick() {
        let mut tr = translator();
        tr.handle_pre_login(&msg("NICK", &["bad nick!"])).await;
        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 432 :Erroneous nickname"]
        );
        assert!(!tr.ready_for_login());
    }

    #[tokio::test]
    async fn short_user_is_fatal() {
        let mut tr = translator();
        tr.handle_pre_login(&msg("NICK", &["alice"])).await;
        tr.handle_pre_login(&msg("USER", &["alice", "0"])).await;
        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 461 No valid hostname found."]
        );
        assert!(!tr.ready_for_login());

        // the session is dead to further input
        tr.handle_pre_login(&msg("NICK", &["other"])).await;
        assert!(tr.take_output().is_empty());
    }

    #[tokio::test]
    async fn welcome_sequence_on_protocol_packet() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_icb(&mut client, 'j', &["1".into(), "host".into()])
            .await
            .unwrap();

        let out = tr.take_output();
        let codes: Vec<&str> = out
            .iter()
            .map(|l| l.split(' ').nth(1).unwrap_or(""))
            .collect();
        assert_eq!(codes, ["001", "002", "004", "375", "376", "221"]);
        assert!(out.iter().all(|l| l.contains("alice")));
    }

    #[tokio::test]
    async fn open_and_personal_messages_translate() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().take_changes();

        tr.handle_icb(&mut client, 'b', &["bob".into(), "hi all".into()])
            .await
            .unwrap();
        tr.handle_icb(&mut client, 'c', &["bob".into(), "psst".into()])
            .await
            .unwrap();

        // 'c' translation addresses the ICB-side nick
        client.state_mut().set_nick(Some("alice".into()));
        client.state_mut().take_changes();
        tr.handle_icb(&mut client, 'c', &["carol".into(), "hey".into()])
            .await
            .unwrap();

        let out = tr.take_output();
        assert_eq!(out[0], ":bob PRIVMSG #chat :hi all");
        assert_eq!(out[2], ":carol PRIVMSG alice :hey");
    }

    #[tokio::test]
    async fn nick_collision_is_fatal() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_icb(
            &mut client,
            'd',
            &["Register".into(), "Nick already in use".into()],
        )
        .await
        .unwrap();

        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 436 alice :Nickname collision"]
        );
        // IRC input is ignored from here on
        tr.handle_irc(&mut client, &msg("JOIN", &["#chat"]))
            .await
            .unwrap();
        assert!(tr.take_output().is_empty());
    }

    #[tokio::test]
    async fn invitations_translate_to_invite() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_icb(
            &mut client,
            'd',
            &["FYI".into(), "You are invited to group sub".into()],
        )
        .await
        .unwrap();
        tr.handle_icb(
            &mut client,
            'd',
            &["RSVP".into(), "You can now talk in group loud".into()],
        )
        .await
        .unwrap();

        assert_eq!(
            tr.take_output(),
            [
                ":bridge.example.org INVITE alice #sub",
                ":bridge.example.org INVITE alice #loud",
            ]
        );
    }

    #[tokio::test]
    async fn upstream_errors_map_to_numerics() {
        let mut tr = translator();
        let (mut client, _peer) = icb_client();

        for (text, expect) in [
            (
                "You don't have administrative privileges",
                ":bridge.example.org 481 :You don't have administrative privileges",
            ),
            (
                "You aren't the moderator",
                ":bridge.example.org 482 :You aren't the moderator",
            ),
            (
                "Access denied.",
                ":bridge.example.org 465 :Access denied.",
            ),
            (
                "Something else broke",
                ":bridge.example.org ERROR :Something else broke",
            ),
        ] {
            tr.handle_icb(&mut client, 'e', &[text.into()]).await.unwrap();
            assert_eq!(tr.take_output(), [expect]);
        }
    }

    #[tokio::test]
    async fn co_output_becomes_notice_outside_joining() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_icb(&mut client, 'i', &["co".into(), "Server notice".into()])
            .await
            .unwrap();
        assert_eq!(tr.take_output(), ["NOTICE alice :Server notice"]);

        client.state_mut().set_joining(true);
        client.state_mut().take_changes();
        tr.handle_icb(&mut client, 'i', &["co".into(), "quiet".into()])
            .await
            .unwrap();
        assert!(tr.take_output().is_empty());
    }

    #[tokio::test]
    async fn user_mode_replies() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_irc(&mut client, &msg("MODE", &["alice"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &["bob", "+o"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &["bob"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &[])).await.unwrap();

        assert_eq!(
            tr.take_output(),
            [
                ":bridge.example.org 221 alice +i",
                ":bridge.example.org 502 alice :Cannot change mode for other users.",
                ":bridge.example.org 221 bob +i",
                ":bridge.example.org 462 alice mode :Not enough Parameters.",
            ]
        );
    }

    #[tokio::test]
    async fn channel_mode_replies() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().set_group_status(Some("mvn".into()));
        client.state_mut().take_changes();

        tr.handle_irc(&mut client, &msg("MODE", &["#chat"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &["#chat", "+b"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &["#chat", "+t"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("MODE", &["#other"]))
            .await
            .unwrap();

        assert_eq!(
            tr.take_output(),
            [
                ":bridge.example.org 324 alice #chat +nt",
                ":bridge.example.org 368 alice :End of BAN list",
                ":bridge.example.org 482 #chat :Cannot change mode over IRC protocol.",
                ":bridge.example.org 441 alice #other :You're not in this channel.",
            ]
        );
    }

    #[tokio::test]
    async fn invitation_list_via_mode_i() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().set_group_status(Some("rvn".into()));
        client.state_mut().take_changes();

        tr.handle_irc(&mut client, &msg("MODE", &["#chat", "+I"]))
            .await
            .unwrap();
        assert!(tr.take_output().is_empty());

        // the status dump arrives as ordinary co output, which is also
        // surfaced as notices outside the joining phase
        tr.handle_icb(
            &mut client,
            'i',
            &["co".into(), "Name: chat Mod: bob".into()],
        )
        .await
        .unwrap();
        tr.handle_icb(
            &mut client,
            'i',
            &["co".into(), "Nicks invited: dave, eve".into()],
        )
        .await
        .unwrap();
        let mid = tr.take_output();
        assert_eq!(
            mid,
            [
                "NOTICE alice :Name: chat Mod: bob",
                ":bridge.example.org 346 alice #chat :dave",
                ":bridge.example.org 346 alice #chat :eve",
                "NOTICE alice :Nicks invited: dave, eve",
            ]
        );

        // the answering pong ends the listing
        tr.handle_icb(&mut client, 'm', &[]).await.unwrap();
        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 347 alice #chat :End of INVITATION list"]
        );
    }

    #[tokio::test]
    async fn plain_groups_have_an_empty_invitation_list() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().set_group_status(Some("pvn".into()));
        client.state_mut().take_changes();

        tr.handle_irc(&mut client, &msg("MODE", &["#chat", "+I"]))
            .await
            .unwrap();
        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 347 alice #chat :End of INVITATION list"]
        );
    }

    #[tokio::test]
    async fn who_ends_immediately() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_irc(&mut client, &msg("WHO", &["#chat", "o"]))
            .await
            .unwrap();
        assert_eq!(
            tr.take_output(),
            [":bridge.example.org 315 alice #chat :End of WHO list"]
        );
    }

    #[tokio::test]
    async fn join_validation() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();

        tr.handle_irc(&mut client, &msg("JOIN", &["#a", "#b"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("JOIN", &["nohash"]))
            .await
            .unwrap();
        tr.handle_irc(&mut client, &msg("JOIN", &["#waytoolonggroupname"]))
            .await
            .unwrap();

        assert_eq!(
            tr.take_output(),
            [
                ":bridge.example.org ERROR :You can only join a single channel.",
                ":bridge.example.org 403 alice nohash :No such channel",
                ":bridge.example.org 403 alice #waytoolonggroupname :No such channel",
            ]
        );
    }

    /// Run one message through the same pipeline as the session driver:
    /// built-in processing first, then translation.
    async fn step(
        tr: &mut Translator,
        client: &mut Client<DuplexStream>,
        ty: char,
        fields: &[&str],
    ) {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        client.process(ty, &fields).await.unwrap();
        tr.handle_icb(client, ty, &fields).await.unwrap();
    }

    #[tokio::test]
    async fn group_state_fan_out_after_join() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        tr.session.loginid = "alice".into();
        tr.session.host = "example.com".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_nick(Some("alice".into()));
        client.state_mut().take_changes();

        // the snapshot arrives silently, then the pong ends joining
        step(&mut tr, &mut client, 'd', &["Status", "You are now in group chat."]).await;
        step(
            &mut tr,
            &mut client,
            'i',
            &["co", "Group: chat (pvn) Mod: bob   Topic: (None)"],
        )
        .await;
        for member in [
            &["wl", "", "alice", "0", "0", "0", "alice", "example.com", ""],
            &["wl", "m", "bob", "0", "0", "0", "bob", "example.org", ""],
        ] {
            step(&mut tr, &mut client, 'i', member).await;
        }
        step(&mut tr, &mut client, 'm', &[]).await;

        let out = tr.take_output();
        assert_eq!(out[0], ":alice!~alice@example.com JOIN #chat");
        assert_eq!(out[1], ":bridge.example.org 331 #chat :Topic not set.");
        assert_eq!(out[2], ":bridge.example.org 353 alice = #chat :alice");
        assert_eq!(out[3], ":bridge.example.org 353 alice = #chat :@bob");
        assert_eq!(
            out[4],
            ":bridge.example.org 366 alice #chat :End of NAMES list"
        );
        assert_eq!(out.len(), 5);
    }

    #[tokio::test]
    async fn membership_changes_emit_join_part_nick() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().take_changes();

        client.state_mut().add_member("carol", "carol@example.net");
        tr.handle_icb(
            &mut client,
            'd',
            &["Sign-on".into(), "ignored here".into()],
        )
        .await
        .unwrap();
        assert_eq!(
            tr.take_output(),
            [":carol!~carol@example.net JOIN :#chat"]
        );

        client.state_mut().rename_member("carol", "carola");
        tr.handle_icb(&mut client, 'd', &["Name".into(), "ignored".into()])
            .await
            .unwrap();
        assert_eq!(
            tr.take_output(),
            [":carol!~carol@example.net NICK carola"]
        );

        client.state_mut().remove_member("carola");
        tr.handle_icb(&mut client, 'd', &["Depart".into(), "ignored".into()])
            .await
            .unwrap();
        assert_eq!(
            tr.take_output(),
            [":carola!~carol@example.net PART :#chat"]
        );
    }

    #[tokio::test]
    async fn moderator_handover_emits_mode_o() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().set_moderator(Some("bob".into()));
        client.state_mut().take_changes();

        client.state_mut().set_moderator(Some("carol".into()));
        tr.handle_icb(&mut client, 'd', &["Pass".into(), "ignored".into()])
            .await
            .unwrap();

        assert_eq!(
            tr.take_output(),
            [
                ":bridge.example.org MODE #chat -o bob",
                ":bridge.example.org MODE #chat +o carol",
            ]
        );
    }

    #[tokio::test]
    async fn group_status_change_emits_mode_diff() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().set_group_status(Some("pvn".into()));
        client.state_mut().take_changes();

        client.state_mut().set_group_status(Some("mvn".into()));
        tr.handle_icb(&mut client, 'd', &["Change".into(), "ignored".into()])
            .await
            .unwrap();

        assert_eq!(tr.take_output(), [":bridge.example.org MODE #chat +t"]);
    }

    #[tokio::test]
    async fn group_change_parts_the_old_channel() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        tr.session.loginid = "alice".into();
        tr.session.host = "example.com".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_group(Some("chat".into()));
        client.state_mut().take_changes();

        client.state_mut().set_group(Some("other".into()));
        tr.handle_icb(&mut client, 'd', &["Status".into(), "ignored".into()])
            .await
            .unwrap();

        assert_eq!(
            tr.take_output(),
            [":alice!~alice@example.com PART :#chat"]
        );
    }

    #[tokio::test]
    async fn self_rename_updates_the_session() {
        let mut tr = translator();
        tr.session.nick = "alice".into();
        tr.session.loginid = "alice".into();
        tr.session.host = "example.com".into();
        let (mut client, _peer) = icb_client();
        client.state_mut().set_nick(Some("alice".into()));
        client.state_mut().take_changes();

        client.state_mut().set_nick(Some("alyssa".into()));
        tr.handle_icb(&mut client, 'd', &["Name".into(), "ignored".into()])
            .await
            .unwrap();

        assert_eq!(
            tr.take_output(),
            [":alice!~alice@example.com NICK alyssa"]
        );
        assert_eq!(tr.session().nick, "alyssa");
    }
}

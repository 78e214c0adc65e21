//! Per-session ICB group state with change notification.
//!
//! The [`Client`](super::Client) mutates a [`State`] while it processes
//! status and output messages. Every mutation that actually changes a value
//! queues a [`StateChange`]; the session drains the queue into a
//! [`StateListener`] before it handles the message that caused the
//! mutations, so IRC traffic derived from a change always precedes any
//! downstream handling of the same message.

use indexmap::IndexMap;

/// A change to one scalar state field, carrying old and new values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Nick {
        old: Option<String>,
        new: Option<String>,
    },
    Registered {
        old: bool,
        new: bool,
    },
    Joining {
        old: bool,
        new: bool,
    },
    Group {
        old: Option<String>,
        new: Option<String>,
    },
    GroupStatus {
        old: Option<String>,
        new: Option<String>,
    },
    Moderator {
        old: Option<String>,
        new: Option<String>,
    },
    Topic {
        old: Option<String>,
        new: Option<String>,
    },
}

/// A queued state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Field(FieldChange),
    MemberAdded { nick: String, loginid: String },
    MemberRemoved { nick: String, loginid: String },
    MemberRenamed {
        old: String,
        new: String,
        loginid: String,
    },
    MembersRemoved,
}

/// Hooks invoked as group state mutates.
///
/// Implementers supply only the hooks they care about; every hook has a
/// default no-op body.
pub trait StateListener {
    /// A scalar field changed value.
    fn changed(&mut self, change: &FieldChange) {
        let _ = change;
    }

    /// All members were dropped at once.
    fn members_removed(&mut self) {}

    fn member_added(&mut self, nick: &str, loginid: &str) {
        let _ = (nick, loginid);
    }

    fn member_removed(&mut self, nick: &str, loginid: &str) {
        let _ = (nick, loginid);
    }

    fn member_renamed(&mut self, old: &str, new: &str, loginid: &str) {
        let _ = (old, new, loginid);
    }
}

/// Replay a batch of [`StateChange`]s into a listener, in mutation order.
pub fn dispatch(changes: Vec<StateChange>, listener: &mut dyn StateListener) {
    for change in changes {
        match change {
            StateChange::Field(c) => listener.changed(&c),
            StateChange::MemberAdded { nick, loginid } => listener.member_added(&nick, &loginid),
            StateChange::MemberRemoved { nick, loginid } => {
                listener.member_removed(&nick, &loginid)
            }
            StateChange::MemberRenamed { old, new, loginid } => {
                listener.member_renamed(&old, &new, &loginid)
            }
            StateChange::MembersRemoved => listener.members_removed(),
        }
    }
}

/// ICB group session state.
///
/// `group_status` is a three character flag string
/// `<control><visibility><volume>` with control in `{p,m,r,c}`, visibility
/// in `{v,s,i}` and volume in `{q,n,l}`. `joining` is true from the moment
/// a group change begins until the group's status snapshot (status dump
/// plus who-list) has been consumed.
#[derive(Debug, Default)]
pub struct State {
    nick: Option<String>,
    registered: bool,
    joining: bool,
    group: Option<String>,
    group_status: Option<String>,
    moderator: Option<String>,
    topic: Option<String>,
    members: IndexMap<String, String>,
    pending: Vec<StateChange>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    pub fn joining(&self) -> bool {
        self.joining
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn group_status(&self) -> Option<&str> {
        self.group_status.as_deref()
    }

    pub fn moderator(&self) -> Option<&str> {
        self.moderator.as_deref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Member nicks in arrival order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Login id of a member, if present.
    pub fn lookup_member(&self, nick: &str) -> Option<&str> {
        self.members.get(nick).map(String::as_str)
    }

    pub fn set_nick(&mut self, value: Option<String>) {
        if self.nick != value {
            let old = self.nick.clone();
            self.nick = value.clone();
            self.pending
                .push(StateChange::Field(FieldChange::Nick { old, new: value }));
        }
    }

    pub fn set_registered(&mut self, value: bool) {
        if self.registered != value {
            let old = self.registered;
            self.registered = value;
            self.pending
                .push(StateChange::Field(FieldChange::Registered { old, new: value }));
        }
    }

    pub fn set_joining(&mut self, value: bool) {
        if self.joining != value {
            let old = self.joining;
            self.joining = value;
            self.pending
                .push(StateChange::Field(FieldChange::Joining { old, new: value }));
        }
    }

    pub fn set_group(&mut self, value: Option<String>) {
        if self.group != value {
            let old = self.group.clone();
            self.group = value.clone();
            self.pending
                .push(StateChange::Field(FieldChange::Group { old, new: value }));
        }
    }

    pub fn set_group_status(&mut self, value: Option<String>) {
        if self.group_status != value {
            let old = self.group_status.clone();
            self.group_status = value.clone();
            self.pending
                .push(StateChange::Field(FieldChange::GroupStatus { old, new: value }));
        }
    }

    pub fn set_moderator(&mut self, value: Option<String>) {
        if self.moderator != value {
            let old = self.moderator.clone();
            self.moderator = value.clone();
            self.pending
                .push(StateChange::Field(FieldChange::Moderator { old, new: value }));
        }
    }

    pub fn set_topic(&mut self, value: Option<String>) {
        if self.topic != value {
            let old = self.topic.clone();
            self.topic = value.clone();
            self.pending
                .push(StateChange::Field(FieldChange::Topic { old, new: value }));
        }
    }

    /// Drop every member at once. Queues a single [`StateChange::MembersRemoved`].
    pub fn remove_all_members(&mut self) {
        if !self.members.is_empty() {
            self.members.clear();
            self.pending.push(StateChange::MembersRemoved);
        }
    }

    /// Add a member. Adding a nick that is already present does nothing.
    pub fn add_member(&mut self, nick: &str, loginid: &str) {
        if !self.members.contains_key(nick) {
            self.members.insert(nick.to_string(), loginid.to_string());
            self.pending.push(StateChange::MemberAdded {
                nick: nick.to_string(),
                loginid: loginid.to_string(),
            });
        }
    }

    /// Remove a member. Removing an unknown nick does nothing.
    pub fn remove_member(&mut self, nick: &str) {
        if let Some(loginid) = self.members.shift_remove(nick) {
            self.pending.push(StateChange::MemberRemoved {
                nick: nick.to_string(),
                loginid,
            });
        }
    }

    /// Re-key a member, keeping its login id.
    pub fn rename_member(&mut self, old: &str, new: &str) {
        if let Some(loginid) = self.members.shift_remove(old) {
            self.members.insert(new.to_string(), loginid.clone());
            self.pending.push(StateChange::MemberRenamed {
                old: old.to_string(),
                new: new.to_string(),
                loginid,
            });
        }
    }

    /// Take the queued changes, leaving the queue empty.
    pub fn take_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.pending)
    }

    /// Drain queued changes into a listener.
    pub fn drain_into(&mut self, listener: &mut dyn StateListener) {
        dispatch(self.take_changes(), listener);
    }
}

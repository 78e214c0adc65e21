//! The ICB side of the bridge: framing, group state and the upstream client.
//!
//! ICB (Internet CitizenBand) is a pre-IRC group chat protocol with
//! length-prefixed binary frames and a single-group-per-connection model.
//! [`packet`] implements the wire codec, [`state`] the observable group
//! state, [`Client`] the connection, and [`parsers`] the consumers that
//! reassemble multi-message replies.

pub mod client;
pub mod packet;
pub mod parsers;
pub mod state;

pub use client::Client;
pub use state::{FieldChange, State, StateChange, StateListener};

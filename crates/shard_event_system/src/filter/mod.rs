//! Protocol filter chain.
//!
//! Each session owns a [`FilterChain`]: an ordered list of inbound filters that
//! turn raw bytes into application messages, and an ordered list of outbound
//! filters that turn a message back into wire bytes. Filters are per-session
//! instances, so a framing filter may keep partial input between calls without
//! any locking of its own.

mod chain;
mod framing;

pub use chain::FilterChain;
pub use framing::{LengthPrefixedFramer, LineFramer, NoopFilter};

use crate::events::Event;
use crate::handle::Uid;
use bytes::Bytes;
use std::any::type_name;

/// An application-level message flowing through a filter chain.
pub trait Message: Event {
    /// The session the message came from, if any.
    fn origin(&self) -> Option<Uid>;

    /// Wire representation, for messages that are already encoded.
    fn payload(&self) -> Option<Bytes> {
        None
    }
}

/// A chunk of bytes: raw transport input, or one complete frame once a
/// framing filter has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub origin: Option<Uid>,
    pub data: Bytes,
}

impl Frame {
    pub fn new(origin: Option<Uid>, data: impl Into<Bytes>) -> Self {
        Self {
            origin,
            data: data.into(),
        }
    }
}

impl Message for Frame {
    fn origin(&self) -> Option<Uid> {
        self.origin
    }

    fn payload(&self) -> Option<Bytes> {
        Some(self.data.clone())
    }
}

/// A bidirectional, possibly stateful transformation step.
///
/// `filter_in` may buffer input and yield zero, one or many messages per call.
/// `filter_out` never fragments: one message in, one message out.
pub trait ProtocolFilter: Send {
    fn name(&self) -> &str;

    fn filter_in(&mut self, message: Box<dyn Message>) -> Result<Vec<Box<dyn Message>>, FilterError>;

    fn filter_out(&mut self, message: Box<dyn Message>) -> Result<Box<dyn Message>, FilterError>;
}

/// Errors raised while filtering; the chain invocation that hit one is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Malformed input in {filter}: {reason}")]
    Malformed { filter: String, reason: String },
    #[error("Frame of {size} bytes exceeds the {limit} byte limit of {filter}")]
    FrameTooLarge {
        filter: String,
        size: usize,
        limit: usize,
    },
    #[error("Unexpected message: expected {expected}, found {found}")]
    UnexpectedMessage {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Message {0} has no wire payload")]
    NotEncodable(&'static str),
}

/// Takes ownership of a message of concrete type `M`, or reports what it was instead.
pub fn expect_message<M: Message>(message: Box<dyn Message>) -> Result<M, FilterError> {
    let found = {
        let message: &dyn Message = &*message;
        message.event_name()
    };
    message
        .into_any()
        .downcast::<M>()
        .map(|message| *message)
        .map_err(|_| FilterError::UnexpectedMessage {
            expected: type_name::<M>(),
            found,
        })
}

/// Borrows a message as concrete type `M`, if it is one.
pub fn message_ref<M: Message>(message: &dyn Message) -> Option<&M> {
    message.as_any().downcast_ref::<M>()
}

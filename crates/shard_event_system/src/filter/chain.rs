use super::{FilterError, Frame, Message, ProtocolFilter};
use crate::handle::Uid;
use bytes::Bytes;
use std::fmt;

/// Ordered inbound and outbound filter sequences for one session.
///
/// An empty chain passes inbound input through as a single message and
/// writes an outbound message's own payload.
#[derive(Default)]
pub struct FilterChain {
    inbound: Vec<Box<dyn ProtocolFilter>>,
    outbound: Vec<Box<dyn ProtocolFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter to the inbound sequence.
    pub fn with_inbound(mut self, filter: impl ProtocolFilter + 'static) -> Self {
        self.inbound.push(Box::new(filter));
        self
    }

    /// Appends a filter to the outbound sequence.
    pub fn with_outbound(mut self, filter: impl ProtocolFilter + 'static) -> Self {
        self.outbound.push(Box::new(filter));
        self
    }

    pub fn push_inbound(&mut self, filter: Box<dyn ProtocolFilter>) {
        self.inbound.push(filter);
    }

    pub fn push_outbound(&mut self, filter: Box<dyn ProtocolFilter>) {
        self.outbound.push(filter);
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Runs `message` through the inbound filters.
    ///
    /// Every message produced by filter `i` is fed individually to filter
    /// `i + 1`, and the outputs are concatenated in order. An empty result
    /// means some filter is still waiting for more input.
    pub fn filter_incoming(
        &mut self,
        message: Box<dyn Message>,
    ) -> Result<Vec<Box<dyn Message>>, FilterError> {
        let mut working = vec![message];
        for filter in self.inbound.iter_mut() {
            let mut produced = Vec::with_capacity(working.len());
            for message in working {
                produced.extend(filter.filter_in(message)?);
            }
            working = produced;
            if working.is_empty() {
                break;
            }
        }
        Ok(working)
    }

    /// Wraps raw transport bytes in a [`Frame`] and runs them inbound.
    pub fn filter_incoming_bytes(
        &mut self,
        origin: Option<Uid>,
        data: Bytes,
    ) -> Result<Vec<Box<dyn Message>>, FilterError> {
        self.filter_incoming(Box::new(Frame::new(origin, data)))
    }

    /// Threads `message` through the outbound filters and returns the wire bytes.
    pub fn filter_outgoing(&mut self, message: Box<dyn Message>) -> Result<Bytes, FilterError> {
        let mut current = message;
        for filter in self.outbound.iter_mut() {
            current = filter.filter_out(current)?;
        }
        let current: &dyn Message = &*current;
        current
            .payload()
            .ok_or(FilterError::NotEncodable(current.event_name()))
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |filters: &[Box<dyn ProtocolFilter>]| {
            filters.iter().map(|filter| filter.name().to_string()).collect::<Vec<_>>()
        };
        f.debug_struct("FilterChain")
            .field("inbound", &names(&self.inbound))
            .field("outbound", &names(&self.outbound))
            .finish()
    }
}

//! Single-slot "latest wins" mailbox
//!
//! At most one evaluation is in flight. Frames offered while one is in
//! flight overwrite a single pending slot, so intermediate frames are never
//! evaluated and the queue cannot grow with the frame rate.

/// Result of offering an item to the mailbox
#[derive(Debug, PartialEq)]
pub enum Offer<T> {
    /// Nothing in flight; the caller should dispatch this item now
    Dispatch(T),
    /// Parked in the pending slot; `replaced` is set if an older item was discarded
    Queued { replaced: bool },
}

#[derive(Debug)]
pub struct CoalescingMailbox<T> {
    pending: Option<T>,
    in_flight: Option<u64>,
}

impl<T> Default for CoalescingMailbox<T> {
    fn default() -> Self {
        Self {
            pending: None,
            in_flight: None,
        }
    }
}

impl<T> CoalescingMailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, item: T) -> Offer<T> {
        if self.in_flight.is_none() {
            return Offer::Dispatch(item);
        }
        let replaced = self.pending.replace(item).is_some();
        Offer::Queued { replaced }
    }

    /// Mark `request_id` as the one evaluation in flight
    pub fn begin(&mut self, request_id: u64) {
        self.in_flight = Some(request_id);
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn is_current(&self, request_id: u64) -> bool {
        self.in_flight == Some(request_id)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Finish `request_id` and hand back the next item to dispatch, if any
    ///
    /// Completions for any other id are ignored and leave the mailbox untouched.
    pub fn complete(&mut self, request_id: u64) -> Option<T> {
        if !self.is_current(request_id) {
            return None;
        }
        self.in_flight = None;
        self.pending.take()
    }

    /// Drop the pending item but keep the in-flight marker
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.in_flight = None;
    }
}

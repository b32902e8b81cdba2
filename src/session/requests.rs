//! Outstanding `execute` calls, keyed by channel id.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::CallError;
use crate::protocol::ChannelId;

pub(crate) type CallResult = Result<serde_json::Value, CallError>;

/// Settlement senders for calls awaiting a result or error frame.
///
/// Each entry is removed exactly once: on its reply, or when the connection
/// goes away.
#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    pending: HashMap<ChannelId, oneshot::Sender<CallResult>>,
}

impl RequestTable {
    pub(crate) fn insert(&mut self, channel: ChannelId, settle: oneshot::Sender<CallResult>) {
        if self.pending.insert(channel, settle).is_some() {
            log::error!("[Session] Channel {channel} reused for a second call");
        }
    }

    /// Settle the call on `channel` with a result. Returns whether one was pending.
    pub(crate) fn resolve(&mut self, channel: ChannelId, value: serde_json::Value) -> bool {
        self.settle(channel, Ok(value))
    }

    /// Settle the call on `channel` with an error. Returns whether one was pending.
    pub(crate) fn reject(&mut self, channel: ChannelId, error: CallError) -> bool {
        self.settle(channel, Err(error))
    }

    /// Reject every pending call. Returns how many there were.
    pub(crate) fn reject_all(&mut self, error: &CallError) -> usize {
        let count = self.pending.len();
        for (_, settle) in self.pending.drain() {
            // The caller may have dropped its PendingCall.
            let _ = settle.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    fn settle(&mut self, channel: ChannelId, result: CallResult) -> bool {
        match self.pending.remove(&channel) {
            Some(settle) => {
                let _ = settle.send(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_settles_once() {
        let mut table = RequestTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert(1, tx);

        assert!(table.resolve(1, json!("ok")));
        assert!(!table.resolve(1, json!("again")));
        assert_eq!(rx.try_recv().unwrap(), Ok(json!("ok")));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_reject_unknown_channel() {
        let mut table = RequestTable::default();
        assert!(!table.reject(9, CallError::ConnectionLost));
    }

    #[test]
    fn test_reject_all() {
        let mut table = RequestTable::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.insert(1, tx1);
        table.insert(2, tx2);

        assert_eq!(table.reject_all(&CallError::ConnectionLost), 2);
        assert_eq!(rx1.try_recv().unwrap(), Err(CallError::ConnectionLost));
        assert_eq!(rx2.try_recv().unwrap(), Err(CallError::ConnectionLost));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_settle_after_receiver_dropped() {
        let mut table = RequestTable::default();
        let (tx, rx) = oneshot::channel();
        table.insert(3, tx);
        drop(rx);
        assert!(table.reject(3, CallError::Remote(json!("late"))));
    }
}

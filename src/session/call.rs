//! The future returned by [`Session::execute`](super::Session::execute).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::requests::CallResult;
use super::CallError;
use crate::protocol::ChannelId;

/// A call that settles exactly once, with the server's result or a
/// [`CallError`].
///
/// Calls made while disconnected or after close are already rejected.
#[derive(Debug)]
#[must_use = "a PendingCall does nothing unless awaited or polled"]
pub struct PendingCall {
    channel: Option<ChannelId>,
    state: CallState,
}

#[derive(Debug)]
enum CallState {
    Ready(Option<CallResult>),
    Waiting(oneshot::Receiver<CallResult>),
}

impl PendingCall {
    pub(crate) fn rejected(error: CallError) -> Self {
        Self {
            channel: None,
            state: CallState::Ready(Some(Err(error))),
        }
    }

    pub(crate) fn waiting(channel: ChannelId, settle: oneshot::Receiver<CallResult>) -> Self {
        Self {
            channel: Some(channel),
            state: CallState::Waiting(settle),
        }
    }

    /// Channel the call was sent on, or `None` if it was never sent.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel
    }

    /// The outcome if the call has already settled, without waiting.
    ///
    /// Returns the outcome once; afterwards the call reports
    /// [`CallError::ConnectionLost`].
    pub fn try_result(&mut self) -> Option<Result<serde_json::Value, CallError>> {
        match &mut self.state {
            CallState::Ready(result) => Some(result.take().unwrap_or(Err(CallError::ConnectionLost))),
            CallState::Waiting(settle) => match settle.try_recv() {
                Ok(result) => {
                    self.state = CallState::Ready(None);
                    Some(result)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = CallState::Ready(None);
                    Some(Err(CallError::ConnectionLost))
                }
            },
        }
    }
}

impl Future for PendingCall {
    type Output = Result<serde_json::Value, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CallState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CallError::ConnectionLost)))
            }
            CallState::Waiting(settle) => match Pin::new(settle).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(outcome) => {
                    this.state = CallState::Ready(None);
                    // A dropped sender means the session went away.
                    Poll::Ready(outcome.unwrap_or(Err(CallError::ConnectionLost)))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejected_call_resolves_immediately() {
        let call = PendingCall::rejected(CallError::NotConnected);
        assert_eq!(call.channel_id(), None);
        assert_eq!(call.await, Err(CallError::NotConnected));
    }

    #[tokio::test]
    async fn test_waiting_call_resolves_on_settle() {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall::waiting(5, rx);
        assert_eq!(call.channel_id(), Some(5));
        tx.send(Ok(json!({"id": 1}))).unwrap();
        assert_eq!(call.await, Ok(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_connection_lost() {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall::waiting(1, rx);
        drop(tx);
        assert_eq!(call.await, Err(CallError::ConnectionLost));
    }

    #[test]
    fn test_try_result() {
        let (tx, rx) = oneshot::channel();
        let mut call = PendingCall::waiting(2, rx);
        assert_eq!(call.try_result(), None);
        tx.send(Err(CallError::Remote(json!("no")))).unwrap();
        assert_eq!(call.try_result(), Some(Err(CallError::Remote(json!("no")))));
    }
}

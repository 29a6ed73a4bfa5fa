use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rt_chat_protocol::{ChannelKind, Payload};

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::handlers::{command, file, message};

/// A protocol-error budget: 5 errors inside a 10s sliding window closes the
/// connection. Tracked as a small ring of timestamps rather than a fixed
/// counter+reset so bursts straddling a window boundary are still counted
/// correctly.
pub struct ProtocolErrorBudget {
    recent: VecDeque<Instant>,
}

const MAX_ERRORS: usize = 5;
const WINDOW: Duration = Duration::from_secs(10);

impl Default for ProtocolErrorBudget {
    fn default() -> Self {
        ProtocolErrorBudget { recent: VecDeque::new() }
    }
}

impl ProtocolErrorBudget {
    /// Records one protocol error now; returns `true` once the budget is
    /// exhausted and the connection should be closed.
    pub fn record(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) > WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(now);
        self.recent.len() >= MAX_ERRORS
    }
}

/// Routes one decoded `Payload` to its handler. Returns `Err` for anything
/// that is a protocol violation for the connection's channel or direction
/// (server-only outbound types arriving from a client, or an action sent on
/// the wrong channel) so the caller can charge it against the error budget.
pub async fn dispatch(ctx: &mut ConnCtx, payload: Payload) -> Result<(), ChatError> {
    match payload {
        Payload::ChatMessage(msg) => {
            if ctx.channel != ChannelKind::Msg {
                return Err(ChatError::Protocol("chat message received outside the MSG channel".to_owned()));
            }
            message::handle_chat_message(ctx, msg).await
        }
        Payload::CommandRequest(mut req) => {
            if ctx.channel != ChannelKind::Cmd {
                return Err(ChatError::Protocol("command request received outside the CMD channel".to_owned()));
            }
            if let Some(user_id) = &ctx.user_id {
                req.sender = user_id.clone();
            }
            command::dispatch(ctx, req.action).await;
            Ok(())
        }
        Payload::FileChunk(chunk) => {
            if ctx.channel != ChannelKind::Data {
                return Err(ChatError::Protocol("file chunk received outside the DATA channel".to_owned()));
            }
            file::handle_file_chunk(ctx, chunk).await
        }
        Payload::SyncItem(_) | Payload::OfflineMessages(_) => {
            Err(ChatError::Protocol("this payload kind is server-to-client only".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_four_errors_in_a_row() {
        let mut budget = ProtocolErrorBudget::default();
        for _ in 0..4 {
            assert!(!budget.record());
        }
    }

    #[test]
    fn budget_trips_on_the_fifth_error() {
        let mut budget = ProtocolErrorBudget::default();
        for _ in 0..4 {
            assert!(!budget.record());
        }
        assert!(budget.record());
    }
}

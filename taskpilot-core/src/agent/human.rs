use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{PilotError, PilotResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected(String),
    /// The run was aborted while waiting.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanAnswer {
    Answered(String),
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct BridgeState {
    cancelled: bool,
    approval: Option<oneshot::Sender<ApprovalDecision>>,
    question: Option<(String, oneshot::Sender<HumanAnswer>)>,
}

/// Single-slot rendezvous between a running loop and whoever reviews it.
///
/// The loop blocks in [`wait_for_approval`](Self::wait_for_approval) or
/// [`ask`](Self::ask); a front-end resolves the wait with `approve`,
/// `reject` or `answer`. [`cancel`](Self::cancel) releases any pending wait
/// at once and makes every later wait return the cancellation sentinel.
#[derive(Default)]
pub struct HumanBridge {
    state: Mutex<BridgeState>,
}

impl HumanBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn wait_for_approval(&self) -> ApprovalDecision {
        let rx = {
            let mut state = self.lock();
            if state.cancelled {
                return ApprovalDecision::Cancelled;
            }
            let (tx, rx) = oneshot::channel();
            state.approval = Some(tx);
            rx
        };

        rx.await.unwrap_or(ApprovalDecision::Cancelled)
    }

    pub fn approve(&self) -> PilotResult<()> {
        self.resolve_approval(ApprovalDecision::Approved)
    }

    pub fn reject(&self, feedback: impl Into<String>) -> PilotResult<()> {
        self.resolve_approval(ApprovalDecision::Rejected(feedback.into()))
    }

    fn resolve_approval(&self, decision: ApprovalDecision) -> PilotResult<()> {
        let sender = self
            .lock()
            .approval
            .take()
            .ok_or_else(|| PilotError::NoPendingRequest("approval".to_string()))?;
        debug!(?decision, "Resolving approval wait");
        sender
            .send(decision)
            .map_err(|_| PilotError::NoPendingRequest("approval".to_string()))
    }

    /// Block until `answer` is called, `timeout` passes, or the bridge is
    /// cancelled.
    pub async fn ask(&self, question: &str, timeout: Duration) -> HumanAnswer {
        let rx = {
            let mut state = self.lock();
            if state.cancelled {
                return HumanAnswer::Cancelled;
            }
            let (tx, rx) = oneshot::channel();
            state.question = Some((question.to_string(), tx));
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => HumanAnswer::Cancelled,
            Err(_) => {
                self.lock().question = None;
                HumanAnswer::TimedOut
            }
        }
    }

    pub fn answer(&self, text: impl Into<String>) -> PilotResult<()> {
        let (_, sender) = self
            .lock()
            .question
            .take()
            .ok_or_else(|| PilotError::NoPendingRequest("question".to_string()))?;
        sender
            .send(HumanAnswer::Answered(text.into()))
            .map_err(|_| PilotError::NoPendingRequest("question".to_string()))
    }

    pub fn pending_question(&self) -> Option<String> {
        self.lock().question.as_ref().map(|(q, _)| q.clone())
    }

    pub fn has_pending_approval(&self) -> bool {
        self.lock().approval.is_some()
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        if let Some(tx) = state.approval.take() {
            let _ = tx.send(ApprovalDecision::Cancelled);
        }
        if let Some((_, tx)) = state.question.take() {
            let _ = tx.send(HumanAnswer::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_approve_resolves_wait() {
        let bridge = Arc::new(HumanBridge::new());
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.wait_for_approval().await })
        };

        wait_until(|| bridge.has_pending_approval()).await;
        bridge.approve().unwrap();
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
        assert!(!bridge.has_pending_approval());
    }

    #[tokio::test]
    async fn test_reject_carries_feedback() {
        let bridge = Arc::new(HumanBridge::new());
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.wait_for_approval().await })
        };

        wait_until(|| bridge.has_pending_approval()).await;
        bridge.reject("too slow").unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            ApprovalDecision::Rejected("too slow".to_string())
        );
    }

    #[test]
    fn test_resolving_nothing_is_an_error() {
        let bridge = HumanBridge::new();
        assert!(matches!(
            bridge.approve().unwrap_err(),
            PilotError::NoPendingRequest(_)
        ));
        assert!(bridge.answer("hi").is_err());
    }

    #[tokio::test]
    async fn test_question_answered() {
        let bridge = Arc::new(HumanBridge::new());
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .ask("Which color?", Duration::from_secs(5))
                    .await
            })
        };

        wait_until(|| bridge.pending_question().is_some()).await;
        assert_eq!(bridge.pending_question().as_deref(), Some("Which color?"));
        bridge.answer("blue").unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            HumanAnswer::Answered("blue".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_times_out() {
        let bridge = HumanBridge::new();
        let answer = bridge.ask("Anyone?", Duration::from_millis(50)).await;
        assert_eq!(answer, HumanAnswer::TimedOut);
        assert!(bridge.pending_question().is_none());
    }

    #[tokio::test]
    async fn test_cancel_releases_and_sticks() {
        let bridge = Arc::new(HumanBridge::new());
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.wait_for_approval().await })
        };

        wait_until(|| bridge.has_pending_approval()).await;
        bridge.cancel();
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Cancelled);

        assert_eq!(
            bridge.ask("late?", Duration::from_secs(5)).await,
            HumanAnswer::Cancelled
        );
        assert!(bridge.is_cancelled());
    }
}

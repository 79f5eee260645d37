//! Drives one mutating ledger call from submission to a terminal phase.
//!
//! Each attempt moves `Idle -> Submitting -> Pending -> Confirming ->
//! Confirmed`, or to `Failed` from any non-terminal phase. Phases only move
//! forward, so a repeated receipt or a second failure can never re-enter a
//! terminal phase, and the attempt's side effects (one notification, plus a
//! navigation on success) are taken out of their registration exactly once.
//!
//! At most one attempt per [`AttemptKey`] may be in flight. The key stays
//! claimed until the attempt is terminal, even when the UI that started it
//! has been torn down, because the ledger cannot retract a submission.
use crate::address::Address;
use crate::config::{DEFAULT_CONFIRMATION_TIMEOUT_SECS, LedgerConfig};
use crate::context::ConnectionContext;
use crate::error::LoanError;
use crate::gateway::{ReceiptStatus, TxEvent, TxHandle, TxHash};
use crate::sync::ViewSynchronizer;
use crate::utils;
use crate::validator::{ActionKind, LedgerCall, ValidatedAction};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Pending,
    Confirming,
    Confirmed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Confirmed | Phase::Failed)
    }

    pub fn can_advance_to(&self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Submitting)
                | (Phase::Submitting, Phase::Pending)
                | (Phase::Pending, Phase::Confirming)
                | (Phase::Confirming, Phase::Confirmed)
                | (Phase::Submitting | Phase::Pending | Phase::Confirming, Phase::Failed)
        )
    }
}

/// Identifies attempts that must not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub action: ActionKind,
    pub loan_index: Option<u64>,
    pub actor: Address,
}

impl AttemptKey {
    pub fn of(action: &ValidatedAction) -> Self {
        Self {
            action: action.kind(),
            loan_index: action.target(),
            actor: action.actor(),
        }
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loan_index {
            Some(index) => write!(f, "{} of loan {} by {}", self.action, index, self.actor),
            None => write!(f, "{} by {}", self.action, self.actor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success {
        action: ActionKind,
        message: &'static str,
        hash: TxHash,
    },
    Failure {
        action: ActionKind,
        error: LoanError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    AccountDashboard(Address),
    CloseDialogAndRefresh,
}

/// Receives an attempt's user-facing side effects.
pub trait EffectSink: Send + Sync {
    fn notify(&self, notification: Notification);
    fn navigate(&self, navigation: Navigation);
}

fn success_message(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Request => "Loan request submitted!",
        ActionKind::Fund => "Loan funded successfully!",
        ActionKind::Repay => "Loan repaid successfully!",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub attempt_id: String,
    pub action: ActionKind,
    pub loan_index: Option<u64>,
    pub hash: TxHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// `None` waits for the ledger indefinitely.
    pub confirmation_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Some(Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS)),
        }
    }
}

impl From<&LedgerConfig> for OrchestratorConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            confirmation_timeout: config.confirmation_timeout,
        }
    }
}

// Shared between the driving task and the handle so teardown can cut the task off.
#[derive(Clone)]
struct EffectRegistration(Arc<Mutex<Option<Arc<dyn EffectSink>>>>);

impl EffectRegistration {
    fn new(sink: Arc<dyn EffectSink>) -> Self {
        Self(Arc::new(Mutex::new(Some(sink))))
    }
    fn take(&self) -> Option<Arc<dyn EffectSink>> {
        self.0.lock().take()
    }
    fn unregister(&self) {
        self.0.lock().take();
    }
}

struct InFlightGuard {
    key: AttemptKey,
    in_flight: Arc<Mutex<HashSet<AttemptKey>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

struct Attempt {
    id: String,
    action: ValidatedAction,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    effects: EffectRegistration,
}

impl Attempt {
    fn new(action: ValidatedAction, effects: EffectRegistration, phase_tx: watch::Sender<Phase>) -> Self {
        Self {
            id: utils::new_attempt_id(),
            action,
            phase: Phase::Idle,
            phase_tx,
            effects,
        }
    }

    /// Returns false, changing nothing, when `next` is not a forward step.
    fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            debug!(from = ?self.phase, to = ?next, "ignoring phase change");
            return false;
        }
        self.phase = next;
        self.phase_tx.send_replace(next);
        true
    }

    fn fire_success(&self, hash: &TxHash) {
        let Some(sink) = self.effects.take() else {
            debug!("no side effects registered");
            return;
        };
        let action = self.action.kind();
        sink.notify(Notification::Success {
            action,
            message: success_message(action),
            hash: hash.clone(),
        });
        sink.navigate(match action {
            ActionKind::Request | ActionKind::Fund => Navigation::AccountDashboard(self.action.actor()),
            ActionKind::Repay => Navigation::CloseDialogAndRefresh,
        });
    }

    fn fail(&mut self, error: LoanError) -> LoanError {
        if self.advance(Phase::Failed) {
            if let Some(sink) = self.effects.take() {
                sink.notify(Notification::Failure {
                    action: self.action.kind(),
                    error: error.clone(),
                });
            }
        }
        error
    }

    fn confirmation(&self, hash: &TxHash) -> Confirmation {
        Confirmation {
            attempt_id: self.id.clone(),
            action: self.action.kind(),
            loan_index: self.action.target(),
            hash: hash.clone(),
        }
    }
}

/// A spawned attempt. Dropping the handle tears it down.
pub struct AttemptHandle {
    key: AttemptKey,
    phase: watch::Receiver<Phase>,
    effects: EffectRegistration,
    task: Option<JoinHandle<Result<Confirmation, LoanError>>>,
}

impl AttemptHandle {
    pub fn key(&self) -> AttemptKey {
        self.key
    }
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }
    /// Unregisters the side effects. The ledger call itself keeps going.
    pub fn teardown(&self) {
        self.effects.unregister();
    }
    pub async fn wait(mut self) -> Result<Confirmation, LoanError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| LoanError::Aborted(e.to_string()))?,
            None => Err(LoanError::Aborted("attempt already awaited".into())),
        }
    }
}

impl Drop for AttemptHandle {
    fn drop(&mut self) {
        self.effects.unregister();
    }
}

#[derive(Clone)]
pub struct TransactionOrchestrator {
    context: ConnectionContext,
    synchronizer: Arc<ViewSynchronizer>,
    config: OrchestratorConfig,
    in_flight: Arc<Mutex<HashSet<AttemptKey>>>,
}

impl TransactionOrchestrator {
    pub fn new(context: ConnectionContext, synchronizer: Arc<ViewSynchronizer>, config: OrchestratorConfig) -> Self {
        Self {
            context,
            synchronizer,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }
    pub fn synchronizer(&self) -> &Arc<ViewSynchronizer> {
        &self.synchronizer
    }
    pub fn is_busy(&self, key: &AttemptKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    fn claim(&self, action: &ValidatedAction) -> Result<InFlightGuard, LoanError> {
        let key = AttemptKey::of(action);
        if !self.in_flight.lock().insert(key) {
            debug!(%key, "rejecting overlapping attempt");
            return Err(LoanError::Busy { key });
        }
        Ok(InFlightGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Spawns the attempt and waits for its terminal phase. Dropping the
    /// returned future tears the attempt down like dropping its handle; the
    /// key stays claimed until the ledger call resolves.
    pub async fn execute(
        &self,
        action: ValidatedAction,
        effects: Arc<dyn EffectSink>,
    ) -> Result<Confirmation, LoanError> {
        self.spawn(action, effects)?.wait().await
    }

    /// Claims the attempt's key now and drives it on a separate task.
    pub fn spawn(&self, action: ValidatedAction, effects: Arc<dyn EffectSink>) -> Result<AttemptHandle, LoanError> {
        let guard = self.claim(&action)?;
        let key = guard.key;
        let registration = EffectRegistration::new(effects);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        let this = self.clone();
        let task_effects = registration.clone();
        let task = tokio::spawn(async move { this.drive(action, task_effects, phase_tx, guard).await });

        Ok(AttemptHandle {
            key,
            phase: phase_rx,
            effects: registration,
            task: Some(task),
        })
    }

    async fn drive(
        &self,
        action: ValidatedAction,
        effects: EffectRegistration,
        phase_tx: watch::Sender<Phase>,
        _guard: InFlightGuard,
    ) -> Result<Confirmation, LoanError> {
        let mut attempt = Attempt::new(action, effects, phase_tx);
        let span = info_span!(
            "attempt",
            id = %attempt.id,
            action = %attempt.action.kind(),
            loan = ?attempt.action.target(),
        );
        self.run(&mut attempt).instrument(span).await
    }

    async fn run(&self, attempt: &mut Attempt) -> Result<Confirmation, LoanError> {
        attempt.advance(Phase::Submitting);
        let TxHandle { hash, mut events } = match self.submit(&attempt.action).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "submission failed");
                return Err(attempt.fail(err));
            }
        };
        attempt.advance(Phase::Pending);
        info!(%hash, "submitted, waiting for confirmation");

        let deadline = self.config.confirmation_timeout.map(|t| Instant::now() + t);
        loop {
            let event = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        warn!(%hash, "gave up waiting for confirmation");
                        return Err(attempt.fail(LoanError::ConfirmationTimedOut { hash }));
                    }
                },
                None => events.recv().await,
            };
            let Some(event) = event else {
                return Err(attempt.fail(LoanError::ConfirmationDropped { hash }));
            };

            if let Some(outcome) = self.observe(attempt, &hash, event).await {
                while let Ok(late) = events.try_recv() {
                    self.observe(attempt, &hash, late).await;
                }
                return outcome;
            }
        }
    }

    /// Applies one ledger event. Returns the outcome once the attempt is terminal.
    async fn observe(
        &self,
        attempt: &mut Attempt,
        hash: &TxHash,
        event: TxEvent,
    ) -> Option<Result<Confirmation, LoanError>> {
        if attempt.phase.is_terminal() {
            debug!(?event, "ignoring event after terminal phase");
            return None;
        }
        match event {
            TxEvent::Observed => {
                attempt.advance(Phase::Confirming);
                None
            }
            TxEvent::Mined(ReceiptStatus::Success) => {
                attempt.advance(Phase::Confirming);
                // the cache must show the action before anyone can observe Confirmed
                if attempt.phase.can_advance_to(Phase::Confirmed) {
                    info!(%hash, "confirmed");
                    self.synchronizer
                        .apply_confirmed(&attempt.action, self.context.now(), self.config.confirmation_timeout)
                        .await;
                    attempt.advance(Phase::Confirmed);
                    attempt.fire_success(hash);
                }
                Some(Ok(attempt.confirmation(hash)))
            }
            TxEvent::Mined(ReceiptStatus::Reverted { reason }) => {
                warn!(%hash, %reason, "reverted");
                Some(Err(attempt.fail(LoanError::LedgerExecutionFailed {
                    hash: hash.clone(),
                    reason,
                })))
            }
        }
    }

    async fn submit(&self, action: &ValidatedAction) -> Result<TxHandle, LoanError> {
        let gateway = self.context.gateway();
        let from = action.actor();
        match action.call() {
            LedgerCall::RequestLoan {
                amount,
                mortgage_cid,
                due_date,
            } => {
                gateway
                    .request_loan(from, *amount, mortgage_cid.as_str(), due_date.unix_seconds())
                    .await
            }
            LedgerCall::FundLoan { loan_index, value } => gateway.fund_loan(from, *loan_index, *value).await,
            LedgerCall::RepayLoan { loan_index, value } => gateway.repay_loan(from, *loan_index, *value).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Wei;

    #[derive(Default)]
    struct Recorder {
        notifications: Mutex<Vec<Notification>>,
        navigations: Mutex<Vec<Navigation>>,
    }

    impl EffectSink for Recorder {
        fn notify(&self, notification: Notification) {
            self.notifications.lock().push(notification);
        }
        fn navigate(&self, navigation: Navigation) {
            self.navigations.lock().push(navigation);
        }
    }

    fn fund_attempt(sink: Arc<Recorder>) -> Attempt {
        let action = ValidatedAction {
            actor: Address::new([2u8; 20]),
            call: LedgerCall::FundLoan {
                loan_index: 4,
                value: Wei::new(1_000),
            },
        };
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Attempt::new(action, EffectRegistration::new(sink), phase_tx)
    }

    #[test]
    fn phases_only_move_forward() {
        assert!(Phase::Idle.can_advance_to(Phase::Submitting));
        assert!(Phase::Pending.can_advance_to(Phase::Failed));
        assert!(!Phase::Pending.can_advance_to(Phase::Confirmed));
        assert!(!Phase::Confirmed.can_advance_to(Phase::Confirmed));
        assert!(!Phase::Confirmed.can_advance_to(Phase::Failed));
        assert!(!Phase::Failed.can_advance_to(Phase::Submitting));
        assert!(!Phase::Idle.can_advance_to(Phase::Failed));
    }

    #[test]
    fn confirming_twice_fires_once() {
        let sink = Arc::new(Recorder::default());
        let mut attempt = fund_attempt(Arc::clone(&sink));
        let hash = TxHash::new("0xabc");

        for phase in [Phase::Submitting, Phase::Pending, Phase::Confirming] {
            assert!(attempt.advance(phase));
        }
        for _ in 0..2 {
            if attempt.advance(Phase::Confirmed) {
                attempt.fire_success(&hash);
            }
        }

        assert_eq!(sink.notifications.lock().len(), 1);
        assert_eq!(
            *sink.navigations.lock(),
            vec![Navigation::AccountDashboard(Address::new([2u8; 20]))]
        );
    }

    #[test]
    fn failing_after_confirmation_is_silent() {
        let sink = Arc::new(Recorder::default());
        let mut attempt = fund_attempt(Arc::clone(&sink));
        let hash = TxHash::new("0xabc");

        for phase in [Phase::Submitting, Phase::Pending, Phase::Confirming, Phase::Confirmed] {
            attempt.advance(phase);
        }
        attempt.fire_success(&hash);
        attempt.fail(LoanError::ConfirmationDropped { hash });

        assert_eq!(attempt.phase, Phase::Confirmed);
        assert_eq!(sink.notifications.lock().len(), 1);
    }

    #[test]
    fn unregistered_effects_never_fire() {
        let sink = Arc::new(Recorder::default());
        let mut attempt = fund_attempt(Arc::clone(&sink));
        attempt.effects.unregister();

        attempt.advance(Phase::Submitting);
        attempt.fail(LoanError::SubmissionRejected("denied".into()));

        assert!(sink.notifications.lock().is_empty());
    }
}

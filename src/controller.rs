//! The single-flight request lifecycle.
//!
//! [`RequestLifecycleController`] owns the [`Ledger`] and is the only code that
//! appends turns to it.  A send moves through
//! `Idle -> Sending -> {Succeeded, TimedOut, Failed} -> Idle`; the three outcome
//! states are applied and left within [`RequestLifecycleController::complete`].
//!
//! The user turn is recorded before the request is transmitted.  A timeout or a
//! service failure therefore leaves a dangling user turn in the ledger, which
//! the caller may delete.  Nothing is retried.
//!
//! A [`PendingTurn`] that is dropped without being completed, including one
//! owned by a cancelled [`RequestLifecycleController::send`] future, resolves
//! the controller as `Failed`: the user turn stays and the state is `Idle`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::account::SessionAccount;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, Message, RemovalReport, Role, Speaker, Turn};
use crate::observability::{
    LEDGER_CLEARS, LEDGER_IMPORTS, LEDGER_INVALID_INDICES, LEDGER_REMOVALS, TOKEN_COUNT_ERRORS,
    TOKEN_COUNT_REQUESTS, TURN_ABANDONED, TURN_DURATION, TURN_FAILURES, TURN_REJECTED,
    TURN_REQUESTS, TURN_SUCCEEDED, TURN_TIMEOUTS,
};
use crate::persistence::{SessionFile, StoredSystemInstruction, StoredTurn};
use crate::pricing::PricingTable;
use crate::remote::{RemoteService, Reply};

/// Per-request deadline used until the caller changes it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the controller is in the send lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No request is outstanding.
    Idle,
    /// A user turn is recorded and its reply has not been applied.
    Sending,
    /// The reply was recorded.
    Succeeded,
    /// The deadline passed before a reply arrived.
    TimedOut,
    /// The service or transport failed.
    Failed,
}

/// How a transmitted turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The service replied.
    Succeeded(Reply),
    /// No reply arrived within the deadline.
    TimedOut {
        /// The deadline that passed.
        after: Duration,
    },
    /// The service or transport failed.
    Failed(Error),
}

impl TurnOutcome {
    /// Runs `request` under `timeout` and classifies the result.
    ///
    /// A [`Error::Timeout`] reported by the transport itself is classified the
    /// same as the local deadline expiring.
    pub async fn within<F>(request: F, timeout: Duration) -> Self
    where
        F: Future<Output = Result<Reply>>,
    {
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => Self::from_result(result, timeout),
            Err(_) => TurnOutcome::TimedOut { after: timeout },
        }
    }

    /// Classifies a finished request.
    pub fn from_result(result: Result<Reply>, timeout: Duration) -> Self {
        match result {
            Ok(reply) => TurnOutcome::Succeeded(reply),
            Err(err) if err.is_timeout() => TurnOutcome::TimedOut { after: timeout },
            Err(err) => TurnOutcome::Failed(err),
        }
    }
}

/// A recorded user turn whose reply is outstanding.
///
/// Produced by [`RequestLifecycleController::begin`] and consumed by
/// [`RequestLifecycleController::complete`].
#[must_use = "a pending turn keeps the controller in Sending until completed"]
#[derive(Debug)]
pub struct PendingTurn {
    user_index: usize,
    input_tokens: u64,
    history: Vec<Turn>,
    timeout: Duration,
    started: Instant,
    in_flight: Arc<AtomicBool>,
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl PendingTurn {
    /// Ledger index of the recorded user turn.
    pub fn user_index(&self) -> usize {
        self.user_index
    }

    /// Net tokens recorded for the user turn.
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    /// The turn history to transmit, ending with the user turn.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Deadline for the reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The result of a successful send.
#[derive(Debug, Clone)]
pub struct TurnReceipt {
    /// Ledger index of the user turn.
    pub user_index: usize,
    /// Ledger index of the model turn.
    pub model_index: usize,
    /// The model's reply.
    pub reply: Reply,
    /// Net tokens of the user turn.
    pub input_tokens: u64,
    /// Tokens of the model turn.
    pub output_tokens: u64,
    /// The account after the reply was recorded.
    pub account: SessionAccount,
}

/// One row of [`RequestLifecycleController::ledger_view`].
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntryView {
    /// Position in the ledger.
    pub index: usize,
    /// Who produced the entry.
    pub role: Role,
    /// Single-line abbreviation of the content.
    pub content_preview: String,
    /// Tokens attributed to the entry.
    pub token_count: u64,
    /// What keeping the entry adds to each later request.
    pub cost_to_retain: f64,
}

/// Orchestrates sending turns and guards every ledger mutation.
pub struct RequestLifecycleController<R: RemoteService> {
    remote: Arc<R>,
    ledger: Ledger,
    pricing: PricingTable,
    account: SessionAccount,
    state: RequestState,
    last_outcome: Option<RequestState>,
    timeout: Duration,
    // Cleared when the current turn's `PendingTurn` is dropped.
    in_flight: Arc<AtomicBool>,
}

impl<R: RemoteService> RequestLifecycleController<R> {
    /// Creates a controller whose ledger holds only `system_instruction`.
    ///
    /// The instruction's token count is zero until [`Self::initialize`] runs.
    pub fn new(remote: R, system_instruction: impl Into<String>, pricing: PricingTable) -> Self {
        Self::from_shared(Arc::new(remote), system_instruction, pricing)
    }

    /// Like [`Self::new`] for a remote that is shared with other owners.
    pub fn from_shared(
        remote: Arc<R>,
        system_instruction: impl Into<String>,
        pricing: PricingTable,
    ) -> Self {
        let ledger = Ledger::new(system_instruction, 0);
        let account = SessionAccount::compute(&ledger, &pricing);
        Self {
            remote,
            ledger,
            pricing,
            account,
            state: RequestState::Idle,
            last_outcome: None,
            timeout: DEFAULT_TIMEOUT,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Installs the system instruction on the remote and measures it.
    ///
    /// When measuring fails the instruction is recorded with zero tokens and
    /// the error is returned; the controller stays usable.
    pub async fn initialize(&mut self) -> Result<u64> {
        self.ensure_idle()?;
        let content = self.ledger.system().content().to_string();
        self.install_system(content).await
    }

    /// Replaces the system instruction and re-measures it.
    pub async fn set_system_instruction(&mut self, content: impl Into<String>) -> Result<u64> {
        self.ensure_idle()?;
        self.install_system(content.into()).await
    }

    async fn install_system(&mut self, content: String) -> Result<u64> {
        let measured = match self.remote.set_system_instruction(&content).await {
            Ok(()) => self.count(Role::System, &content).await,
            Err(err) => Err(err),
        };
        let (tokens, result) = match measured {
            Ok(tokens) => (tokens, Ok(tokens)),
            Err(err) => {
                warn!(error = %err, "could not measure system instruction; assuming 0 tokens");
                (0, Err(err))
            }
        };
        self.ledger.replace_system(content, tokens);
        self.recompute();
        info!(system_tokens = tokens, "system instruction installed");
        result
    }

    /// Records a user turn and enters `Sending`.
    ///
    /// Fails with [`Error::RequestInProgress`] while another turn is pending.
    /// If counting the turn's tokens fails nothing is recorded and the
    /// controller stays `Idle`.
    pub async fn begin(&mut self, text: impl Into<String>) -> Result<PendingTurn> {
        self.settle_abandoned();
        if self.state == RequestState::Sending {
            TURN_REJECTED.click();
            debug!("send rejected: a request is already in flight");
            return Err(Error::request_in_progress());
        }
        let text = text.into();
        let raw = self.count(Role::User, &text).await?;
        let input_tokens = self.ledger.net_tokens(raw);
        let user_index = self.ledger.append(Speaker::User, text, input_tokens);
        self.recompute();
        self.state = RequestState::Sending;
        self.in_flight = Arc::new(AtomicBool::new(true));
        TURN_REQUESTS.click();
        info!(user_index, raw, input_tokens, "user turn recorded; sending");
        Ok(PendingTurn {
            user_index,
            input_tokens,
            history: self.ledger.mirror(),
            timeout: self.timeout,
            started: Instant::now(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Applies the outcome of a pending turn and returns to `Idle`.
    ///
    /// On success the model turn is appended.  On timeout or failure the user
    /// turn stays in the ledger and the error is returned.
    pub fn complete(&mut self, pending: PendingTurn, outcome: TurnOutcome) -> Result<TurnReceipt> {
        TURN_DURATION.add(pending.started.elapsed().as_secs_f64());
        let result = match outcome {
            TurnOutcome::Succeeded(reply) => {
                self.state = RequestState::Succeeded;
                let model_index =
                    self.ledger
                        .append(Speaker::Model, reply.text.clone(), reply.output_tokens);
                self.recompute();
                TURN_SUCCEEDED.click();
                info!(
                    model_index,
                    output_tokens = reply.output_tokens,
                    session_cost = self.account.session_cost,
                    "reply recorded"
                );
                Ok(TurnReceipt {
                    user_index: pending.user_index,
                    model_index,
                    output_tokens: reply.output_tokens,
                    reply,
                    input_tokens: pending.input_tokens,
                    account: self.account,
                })
            }
            TurnOutcome::TimedOut { after } => {
                self.state = RequestState::TimedOut;
                TURN_TIMEOUTS.click();
                warn!(
                    user_index = pending.user_index,
                    timeout_secs = after.as_secs_f64(),
                    "request timed out; user turn kept without a reply"
                );
                Err(Error::timeout(
                    format!("no reply within {} seconds", after.as_secs_f64()),
                    Some(after.as_secs_f64()),
                ))
            }
            TurnOutcome::Failed(err) => {
                self.state = RequestState::Failed;
                TURN_FAILURES.click();
                warn!(
                    user_index = pending.user_index,
                    error = %err,
                    "request failed; user turn kept without a reply"
                );
                Err(err)
            }
        };
        self.last_outcome = Some(self.state);
        self.state = RequestState::Idle;
        result
    }

    /// Sends `text` and waits for the reply or the deadline.
    ///
    /// The request runs on its own task; its outcome is applied here.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<TurnReceipt> {
        let pending = self.begin(text).await?;
        let remote = Arc::clone(&self.remote);
        let history = pending.history.clone();
        let timeout = pending.timeout;
        let task = tokio::spawn(async move {
            TurnOutcome::within(remote.send_turn(history, timeout), timeout).await
        });
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(err) => TurnOutcome::Failed(Error::http_client(
                format!("request task did not finish: {err}"),
                None,
            )),
        };
        self.complete(pending, outcome)
    }

    /// Removes a batch of turns, best effort.
    ///
    /// Rejected as a whole while a request is in flight.  Otherwise every
    /// index is handled individually; see [`Ledger::remove_batch`].
    pub fn remove_batch<I>(&mut self, indices: I) -> Result<RemovalReport>
    where
        I: IntoIterator<Item = usize>,
    {
        self.ensure_idle()?;
        let report = self.ledger.remove_batch(indices);
        let removed = report.removed();
        let failed = report.failed();
        LEDGER_REMOVALS.count(removed.len() as u64);
        LEDGER_INVALID_INDICES.count(failed.len() as u64);
        for (index, err) in &failed {
            debug!(index, error = %err, "index not removed");
        }
        if !removed.is_empty() {
            self.recompute();
        }
        info!(?removed, failed = failed.len(), "removed turns");
        Ok(report)
    }

    /// Drops every turn, keeping the system instruction.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.ledger.clear();
        self.recompute();
        LEDGER_CLEARS.click();
        info!("session cleared");
        Ok(())
    }

    /// Appends stored turns in order and returns how many were added.
    ///
    /// Token counts are taken as stored.
    pub fn import_turns<I>(&mut self, turns: I) -> Result<usize>
    where
        I: IntoIterator<Item = StoredTurn>,
    {
        self.ensure_idle()?;
        let mut imported = 0;
        for turn in turns {
            self.ledger.append(turn.role, turn.content, turn.token_count);
            imported += 1;
        }
        self.recompute();
        LEDGER_IMPORTS.count(imported as u64);
        info!(imported, "imported turns");
        Ok(imported)
    }

    /// The state of the ledger as a session file.
    pub fn snapshot(&self) -> SessionFile {
        let system = self.ledger.system();
        SessionFile {
            session_cost: self.account.session_cost,
            system_instruction: StoredSystemInstruction {
                content: system.content().to_string(),
                token_count: system.token_count(),
                cost: self.cost_to_retain(system),
            },
            turns: self
                .ledger
                .turns()
                .iter()
                .filter_map(|m| {
                    Speaker::try_from(m.role())
                        .ok()
                        .map(|speaker| StoredTurn::new(speaker, m.content(), m.token_count()))
                })
                .collect(),
        }
    }

    /// Every entry with its preview and cost to retain.
    pub fn ledger_view(&self) -> Vec<LedgerEntryView> {
        self.ledger
            .messages()
            .iter()
            .enumerate()
            .map(|(index, message)| LedgerEntryView {
                index,
                role: message.role(),
                content_preview: message.preview(),
                token_count: message.token_count(),
                cost_to_retain: self.cost_to_retain(message),
            })
            .collect()
    }

    /// The entry at `index`.
    pub fn view(&self, index: usize) -> Result<&Message> {
        self.ledger.get(index)
    }

    /// The conversation turn at `index` in its stored form.
    ///
    /// Index 0 is the system instruction and is not a turn.
    pub fn stored_turn(&self, index: usize) -> Result<StoredTurn> {
        let message = self.ledger.get(index)?;
        Speaker::try_from(message.role())
            .map(|speaker| StoredTurn::new(speaker, message.content(), message.token_count()))
            .map_err(|_| Error::invalid_index(index, self.ledger.len()))
    }

    /// What keeping the entry at `index` adds to each later request.
    pub fn retained_cost(&self, index: usize) -> Result<f64> {
        self.ledger.get(index).map(|m| self.cost_to_retain(m))
    }

    // Input schedule, at the tier of the current context.
    fn cost_to_retain(&self, message: &Message) -> f64 {
        self.pricing
            .input_cost(message.token_count(), self.ledger.context_total_tokens())
    }

    /// The account derived from the current ledger.
    pub fn session_summary(&self) -> SessionAccount {
        self.account
    }

    /// The ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The pricing in effect.
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Switches pricing and recomputes the account.
    pub fn set_pricing(&mut self, pricing: PricingTable) {
        self.pricing = pricing;
        self.recompute();
    }

    /// The per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the per-request deadline for later sends.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        if self.is_abandoned() {
            RequestState::Idle
        } else {
            self.state
        }
    }

    /// The outcome state of the most recent completed send.
    pub fn last_outcome(&self) -> Option<RequestState> {
        if self.is_abandoned() {
            Some(RequestState::Failed)
        } else {
            self.last_outcome
        }
    }

    /// Returns true while a turn is pending.
    pub fn is_sending(&self) -> bool {
        self.state() == RequestState::Sending
    }

    /// The remote service.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn is_abandoned(&self) -> bool {
        self.state == RequestState::Sending && !self.in_flight.load(Ordering::Acquire)
    }

    // A pending turn was dropped without `complete`; treat it as failed.
    fn settle_abandoned(&mut self) {
        if self.is_abandoned() {
            TURN_ABANDONED.click();
            warn!("pending turn dropped without a reply; user turn kept");
            self.last_outcome = Some(RequestState::Failed);
            self.state = RequestState::Idle;
        }
    }

    fn ensure_idle(&mut self) -> Result<()> {
        self.settle_abandoned();
        if self.is_sending() {
            TURN_REJECTED.click();
            Err(Error::request_in_progress())
        } else {
            Ok(())
        }
    }

    async fn count(&self, role: Role, content: &str) -> Result<u64> {
        TOKEN_COUNT_REQUESTS.click();
        self.remote.count_tokens(role, content).await.map_err(|err| {
            TOKEN_COUNT_ERRORS.click();
            warn!(%role, error = %err, "token count failed");
            err
        })
    }

    fn recompute(&mut self) {
        self.account = SessionAccount::compute(&self.ledger, &self.pricing);
    }
}

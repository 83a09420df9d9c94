//! Polling asynchronous wallet operations to their terminal state.
//!
//! `z_sendmany` and `z_shieldcoinbase` return an operation id immediately
//! and do the work in the background. `z_getoperationresult` answers with an
//! entry only once the operation is terminal and forgets it afterwards, so
//! an absent entry means "still pending" and each id resolves exactly once.

use {
    crate::{
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::Node,
        poll::{poll_until, PollOutcome, PollSchedule},
    },
    log::{debug, info},
    serde_json::Value,
    std::{
        collections::{BTreeMap, HashMap},
        time::Duration,
    },
    zqa_rpc_client::NodeRpc,
    zqa_rpc_types::{OpId, OperationError, OperationResult, OperationStatus, TxId},
};

/// Terminal state of an operation together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Success(Value),
    Failed(OperationError),
    Cancelled,
}

impl OperationOutcome {
    pub fn status(&self) -> OperationStatus {
        match self {
            Self::Success(_) => OperationStatus::Success,
            Self::Failed(_) => OperationStatus::Failed,
            Self::Cancelled => OperationStatus::Cancelled,
        }
    }

    pub fn txid(&self) -> Option<TxId> {
        match self {
            Self::Success(result) => result.get("txid").and_then(Value::as_str).map(TxId::from),
            _ => None,
        }
    }

    fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed(error) => Some(&error.message),
            _ => None,
        }
    }
}

pub struct AsyncOperationPoller {
    interval: Duration,
    default_timeout: Duration,
    resolved: HashMap<(usize, OpId), OperationStatus>,
    /// Outcomes read off the node during a call that then failed. The node
    /// has already forgotten them, so the next await hands them back.
    unclaimed: HashMap<(usize, OpId), OperationOutcome>,
}

impl AsyncOperationPoller {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            interval: config.poll_interval,
            default_timeout: config.operation_timeout,
            resolved: HashMap::new(),
            unclaimed: HashMap::new(),
        }
    }

    /// Terminal status previously handed back for `op` on `node`.
    pub fn resolution(&self, node: usize, op: &OpId) -> Option<OperationStatus> {
        self.resolved.get(&(node, op.clone())).copied()
    }

    /// Polls `op` until it is terminal, then checks the status against
    /// `expected` and, for failures, the error message against
    /// `expected_error`.
    pub fn await_result<R: NodeRpc>(
        &mut self,
        node: &Node<R>,
        op: &OpId,
        timeout: Option<Duration>,
        expected: OperationStatus,
        expected_error: Option<&str>,
    ) -> Result<OperationOutcome> {
        let index = node.index();
        let outcome = self
            .await_many(node, std::slice::from_ref(op), timeout)?
            .remove(op)
            .ok_or_else(|| HarnessError::MalformedOperation {
                node: index,
                op: op.clone(),
                reason: "resolved without an outcome".to_string(),
            })?;

        if outcome.status() != expected {
            return Err(unexpected(index, op, expected, &outcome));
        }
        if let (Some(expected), Some(actual)) = (expected_error, outcome.error_message()) {
            if !actual.contains(expected) {
                return Err(HarnessError::ErrorMismatch {
                    node: index,
                    op: op.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(outcome)
    }

    /// Result payload of an operation expected to succeed.
    pub fn await_success<R: NodeRpc>(&mut self, node: &Node<R>, op: &OpId, timeout: Option<Duration>) -> Result<Value> {
        match self.await_result(node, op, timeout, OperationStatus::Success, None)? {
            OperationOutcome::Success(result) => Ok(result),
            other => Err(unexpected(node.index(), op, OperationStatus::Success, &other)),
        }
    }

    /// Transaction id produced by a successful send or shield.
    pub fn await_txid<R: NodeRpc>(&mut self, node: &Node<R>, op: &OpId, timeout: Option<Duration>) -> Result<TxId> {
        let outcome = self.await_result(node, op, timeout, OperationStatus::Success, None)?;
        outcome.txid().ok_or_else(|| HarnessError::MalformedOperation {
            node: node.index(),
            op: op.clone(),
            reason: "successful result carries no txid".to_string(),
        })
    }

    /// Error of an operation expected to fail with a message containing
    /// `substring`.
    pub fn await_failure<R: NodeRpc>(
        &mut self,
        node: &Node<R>,
        op: &OpId,
        substring: &str,
        timeout: Option<Duration>,
    ) -> Result<OperationError> {
        match self.await_result(node, op, timeout, OperationStatus::Failed, Some(substring))? {
            OperationOutcome::Failed(error) => Ok(error),
            other => Err(unexpected(node.index(), op, OperationStatus::Failed, &other)),
        }
    }

    /// Polls several operations of one node under a shared deadline and
    /// returns every outcome. Times out naming the first unresolved id;
    /// outcomes that did arrive before the timeout are kept for the next
    /// call that asks for them.
    pub fn await_many<R: NodeRpc>(
        &mut self,
        node: &Node<R>,
        ops: &[OpId],
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<OpId, OperationOutcome>> {
        let index = node.index();
        if let Some((op, status)) = ops
            .iter()
            .find_map(|op| self.resolution(index, op).map(|status| (op, status)))
        {
            return Err(HarnessError::OperationAlreadyResolved {
                node: index,
                op: op.clone(),
                status,
            });
        }

        let mut outcomes: BTreeMap<OpId, OperationOutcome> = ops
            .iter()
            .filter_map(|op| {
                self.unclaimed
                    .remove(&(index, op.clone()))
                    .map(|outcome| (op.clone(), outcome))
            })
            .collect();
        let mut pending: Vec<OpId> = ops.iter().filter(|op| !outcomes.contains_key(*op)).cloned().collect();
        if pending.is_empty() {
            return Ok(self.claim(index, outcomes));
        }

        let schedule = PollSchedule::new(self.interval, timeout.unwrap_or(self.default_timeout));
        let polled = poll_until(schedule, |attempt| {
            for (op, outcome) in query_terminal(node, &pending)? {
                info!("node{index}: operation {op} resolved {}", outcome.status());
                outcomes.insert(op, outcome);
            }
            pending.retain(|op| !outcomes.contains_key(op));
            debug!("node{index}: poll {attempt}, {} operations pending", pending.len());
            Ok::<_, HarnessError>(pending.is_empty().then_some(()))
        });

        match polled {
            Ok(PollOutcome::Ready(())) => Ok(self.claim(index, outcomes)),
            Ok(PollOutcome::TimedOut { waited, attempts }) => {
                self.stash(index, outcomes);
                Err(HarnessError::OperationTimeout {
                    node: index,
                    op: pending.first().cloned().unwrap_or_else(|| OpId::new("")),
                    waited,
                    attempts,
                })
            }
            Err(err) => {
                self.stash(index, outcomes);
                Err(err)
            }
        }
    }

    /// Records `outcomes` as handed back and returns them.
    fn claim(
        &mut self,
        node: usize,
        outcomes: BTreeMap<OpId, OperationOutcome>,
    ) -> BTreeMap<OpId, OperationOutcome> {
        for (op, outcome) in &outcomes {
            self.resolved.insert((node, op.clone()), outcome.status());
        }
        outcomes
    }

    fn stash(&mut self, node: usize, outcomes: BTreeMap<OpId, OperationOutcome>) {
        if !outcomes.is_empty() {
            debug!("node{node}: keeping {} unclaimed outcomes", outcomes.len());
        }
        self.unclaimed
            .extend(outcomes.into_iter().map(|(op, outcome)| ((node, op), outcome)));
    }
}

fn unexpected(node: usize, op: &OpId, expected: OperationStatus, outcome: &OperationOutcome) -> HarnessError {
    HarnessError::UnexpectedOperationStatus {
        node,
        op: op.clone(),
        expected,
        actual: outcome.status(),
        detail: outcome.error_message().map(str::to_string),
    }
}

/// Terminal entries for `ops`. Non-terminal and foreign entries are
/// skipped; two different terminal entries for one id are rejected.
fn query_terminal<R: NodeRpc>(node: &Node<R>, ops: &[OpId]) -> Result<BTreeMap<OpId, OperationOutcome>> {
    let index = node.index();
    let entries = node
        .rpc()?
        .z_getoperationresult(ops)
        .map_err(|err| HarnessError::rpc(index, "z_getoperationresult", err))?;

    let mut terminal = BTreeMap::new();
    for entry in entries {
        if !entry.status.is_terminal() || !ops.contains(&entry.id) {
            continue;
        }
        let op = entry.id.clone();
        let outcome = outcome_of(index, entry)?;
        match terminal.get(&op) {
            Some(seen) if seen != &outcome => {
                return Err(HarnessError::MalformedOperation {
                    node: index,
                    op,
                    reason: format!("conflicting terminal entries {seen:?} and {outcome:?}"),
                });
            }
            _ => {
                terminal.insert(op, outcome);
            }
        }
    }
    Ok(terminal)
}

fn outcome_of(node: usize, entry: OperationResult) -> Result<OperationOutcome> {
    match entry.status {
        OperationStatus::Success => Ok(OperationOutcome::Success(entry.result.unwrap_or(Value::Null))),
        OperationStatus::Failed => entry
            .error
            .map(OperationOutcome::Failed)
            .ok_or_else(|| HarnessError::MalformedOperation {
                node,
                op: entry.id,
                reason: "failed without an error object".to_string(),
            }),
        OperationStatus::Cancelled => Ok(OperationOutcome::Cancelled),
        OperationStatus::Queued | OperationStatus::Executing => Err(HarnessError::MalformedOperation {
            node,
            op: entry.id,
            reason: format!("{} is not terminal", entry.status),
        }),
    }
}

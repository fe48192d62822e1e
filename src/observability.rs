use biometrics::{Collector, Counter, Moments};

pub(crate) static TURN_REQUESTS: Counter = Counter::new("chatmeter.turn.requests");
pub(crate) static TURN_SUCCEEDED: Counter = Counter::new("chatmeter.turn.succeeded");
pub(crate) static TURN_TIMEOUTS: Counter = Counter::new("chatmeter.turn.timeouts");
pub(crate) static TURN_FAILURES: Counter = Counter::new("chatmeter.turn.failures");
pub(crate) static TURN_ABANDONED: Counter = Counter::new("chatmeter.turn.abandoned");
pub(crate) static TURN_REJECTED: Counter = Counter::new("chatmeter.turn.rejected_in_flight");
pub(crate) static TURN_DURATION: Moments = Moments::new("chatmeter.turn.duration_seconds");

pub(crate) static TOKEN_COUNT_REQUESTS: Counter = Counter::new("chatmeter.tokens.count_requests");
pub(crate) static TOKEN_COUNT_ERRORS: Counter = Counter::new("chatmeter.tokens.count_errors");

pub(crate) static LEDGER_REMOVALS: Counter = Counter::new("chatmeter.ledger.removals");
pub(crate) static LEDGER_INVALID_INDICES: Counter =
    Counter::new("chatmeter.ledger.invalid_indices");
pub(crate) static LEDGER_CLEARS: Counter = Counter::new("chatmeter.ledger.clears");
pub(crate) static LEDGER_IMPORTS: Counter = Counter::new("chatmeter.ledger.imported_turns");

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("chatmeter.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("chatmeter.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("chatmeter.client.request_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&TURN_REQUESTS);
    collector.register_counter(&TURN_SUCCEEDED);
    collector.register_counter(&TURN_TIMEOUTS);
    collector.register_counter(&TURN_FAILURES);
    collector.register_counter(&TURN_ABANDONED);
    collector.register_counter(&TURN_REJECTED);
    collector.register_moments(&TURN_DURATION);

    collector.register_counter(&TOKEN_COUNT_REQUESTS);
    collector.register_counter(&TOKEN_COUNT_ERRORS);

    collector.register_counter(&LEDGER_REMOVALS);
    collector.register_counter(&LEDGER_INVALID_INDICES);
    collector.register_counter(&LEDGER_CLEARS);
    collector.register_counter(&LEDGER_IMPORTS);

    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
}

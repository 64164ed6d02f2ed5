//! Outcome evaluation of signals against later price updates
//!
//! A signal succeeds as soon as any observed ATH exceeds the initial
//! reference ATH, regardless of magnitude. It fails only once the time limit
//! has elapsed without such an increase; a falling price alone never fails it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{PerformanceStatus, Signal};

/// Default window for a signal to prove itself
pub const DEFAULT_TIME_LIMIT_MINUTES: u64 = 20;

/// Result of comparing one observation against a signal's reference price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub status: PerformanceStatus,
    pub complete: bool,
}

impl Evaluation {
    fn pending() -> Self {
        Self {
            status: PerformanceStatus::Pending,
            complete: false,
        }
    }

    fn terminal(status: PerformanceStatus) -> Self {
        Self {
            status,
            complete: true,
        }
    }
}

/// What applying an observation did to a signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Signal was already terminal; nothing changed
    AlreadyComplete { status: PerformanceStatus },
    /// No initial reference yet and the observation carried no price
    AwaitingInitialPrice,
    /// First non-zero observation became the permanent initial reference
    InitialRecorded { initial_ath: f64 },
    /// Observation was compared against the initial reference
    Evaluated {
        evaluation: Evaluation,
        initial_ath: f64,
        current_ath: f64,
        profit_multiplier: f64,
    },
}

impl EvaluationOutcome {
    /// True when this application moved the signal into SUCCESS
    pub fn became_success(&self) -> bool {
        matches!(
            self,
            EvaluationOutcome::Evaluated {
                evaluation: Evaluation {
                    status: PerformanceStatus::Success,
                    complete: true,
                },
                ..
            }
        )
    }

    /// True when the signal record was modified
    pub fn modified_signal(&self) -> bool {
        matches!(
            self,
            EvaluationOutcome::InitialRecorded { .. } | EvaluationOutcome::Evaluated { .. }
        )
    }
}

/// Signal outcome evaluator
#[derive(Debug, Clone)]
pub struct Evaluator {
    time_limit: Duration,
}

impl Evaluator {
    pub fn new(time_limit: Duration) -> Self {
        Self { time_limit }
    }

    /// Windows too large for a `Duration` saturate, so such signals never time out
    pub fn with_minutes(minutes: u64) -> Self {
        let time_limit = i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX);
        Self::new(time_limit)
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Compare a new observation against the initial reference at `now`
    pub fn evaluate(
        &self,
        initial_ath: f64,
        current_ath: f64,
        signal_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        // A deadline past the end of representable time is never reached
        let expired = signal_time
            .checked_add_signed(self.time_limit)
            .is_some_and(|deadline| now > deadline);

        if current_ath > initial_ath {
            Evaluation::terminal(PerformanceStatus::Success)
        } else if expired {
            Evaluation::terminal(PerformanceStatus::Failure)
        } else {
            Evaluation::pending()
        }
    }

    /// Apply an observed ATH to a signal in place.
    ///
    /// Terminal signals are left untouched, and the initial reference is only
    /// ever written once.
    pub fn apply(&self, signal: &mut Signal, observed_ath: f64, now: DateTime<Utc>) -> EvaluationOutcome {
        if signal.evaluation_complete {
            return EvaluationOutcome::AlreadyComplete {
                status: signal.performance_status,
            };
        }

        if !signal.has_initial_price() {
            if observed_ath > 0.0 {
                signal.initial_ath_usd = observed_ath;
                return EvaluationOutcome::InitialRecorded {
                    initial_ath: observed_ath,
                };
            }
            return EvaluationOutcome::AwaitingInitialPrice;
        }

        let evaluation = self.evaluate(signal.initial_ath_usd, observed_ath, signal.signal_time, now);

        signal.final_ath_usd = observed_ath;
        signal.profit_multiplier = observed_ath / signal.initial_ath_usd;
        signal.performance_status = evaluation.status;
        signal.evaluation_complete = evaluation.complete;

        EvaluationOutcome::Evaluated {
            evaluation,
            initial_ath: signal.initial_ath_usd,
            current_ath: observed_ath,
            profit_multiplier: signal.profit_multiplier,
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::with_minutes(DEFAULT_TIME_LIMIT_MINUTES)
    }
}

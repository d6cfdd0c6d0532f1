// Race orchestrator
//
// Three phases, strictly in order and never re-entered:
//   BLIND  - one speculative booking of the target slot on the horizon date
//   RETRY  - up to `max_retries` rounds of schedule -> select -> book, fixed delay between rounds
//   CARPET - one concurrent booking per fallback slot, join-all, first success in list order wins
//
// Every call failure is logged and absorbed here. Not booking anything is a normal outcome.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::booking_client::{BookingApi, BookingError, BookingReceipt, ScheduleQuery};
use crate::config::RaceConfig;
use crate::slot_selector::{select_slot_in_day, SlotPreferences};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RacePhase {
    Blind,
    Retry,
    Carpet,
}

impl RacePhase {
    pub fn label(&self) -> &'static str {
        match self {
            RacePhase::Blind => "blind",
            RacePhase::Retry => "retry",
            RacePhase::Carpet => "carpet",
        }
    }
}

impl fmt::Display for RacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Mutable bookkeeping for a single run, owned by the orchestrator
#[derive(Debug)]
pub struct RaceState {
    started: Instant,
    phase: RacePhase,
    retries: u32,
    booking_calls: u32,
}

impl RaceState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            phase: RacePhase::Blind,
            retries: 0,
            booking_calls: 0,
        }
    }

    fn enter(&mut self, phase: RacePhase) {
        debug_assert!(phase >= self.phase, "race phases only move forward");
        self.phase = phase;
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaceOutcome {
    Booked {
        phase: RacePhase,
        receipt: BookingReceipt,
        elapsed: Duration,
        // Other carpet calls that also went through, possibly unwanted bookings
        duplicates: Vec<BookingReceipt>,
    },
    Exhausted {
        elapsed: Duration,
        retry_rounds: u32,
        booking_calls: u32,
    },
}

impl RaceOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, RaceOutcome::Booked { .. })
    }
}

// Why a retry round did not produce a booking
#[derive(Debug)]
enum RoundFailure {
    Schedule(BookingError),
    NoSlot,
    Booking { slot_id: String, error: BookingError },
}

impl fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundFailure::Schedule(e) => write!(f, "schedule: {}", e.reason()),
            RoundFailure::NoSlot => f.write_str("no AVAILABLE slot on furthest day"),
            RoundFailure::Booking { slot_id, error } => {
                write!(f, "slot {slot_id}: {}", error.reason())
            }
        }
    }
}

pub struct RaceOrchestrator<C> {
    client: C,
    config: RaceConfig,
    prefs: SlotPreferences,
    query: ScheduleQuery,
}

impl<C: BookingApi> RaceOrchestrator<C> {
    pub fn new(client: C, config: RaceConfig) -> Self {
        let prefs = SlotPreferences::from(&config);
        let query = ScheduleQuery::from(&config);
        Self {
            client,
            config,
            prefs,
            query,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn run(&self) -> RaceOutcome {
        self.run_at(Utc::now()).await
    }

    // `now` only feeds the target date; elapsed time is measured from the call
    pub async fn run_at(&self, now: DateTime<Utc>) -> RaceOutcome {
        let mut state = RaceState::new();
        let target = target_date(now, self.config.reference_tz, self.config.booking_horizon_days)
            .format("%Y-%m-%d")
            .to_string();

        info!(
            phase = "start",
            target_date = %target,
            slot_id = %self.prefs.target_slot_id,
            "race starting"
        );

        let outcome = match self.blind_phase(&mut state, &target).await {
            Some(receipt) => booked(&state, receipt, Vec::new()),
            None => match self.retry_phase(&mut state).await {
                Some(receipt) => booked(&state, receipt, Vec::new()),
                None => match self.carpet_phase(&mut state, &target).await {
                    Some((receipt, duplicates)) => booked(&state, receipt, duplicates),
                    None => RaceOutcome::Exhausted {
                        elapsed: state.elapsed(),
                        retry_rounds: state.retries,
                        booking_calls: state.booking_calls,
                    },
                },
            },
        };

        log_summary(&outcome);
        outcome
    }

    async fn blind_phase(&self, state: &mut RaceState, date: &str) -> Option<BookingReceipt> {
        state.enter(RacePhase::Blind);
        let slot_id = self.prefs.target_slot_id.as_str();
        info!(phase = "blind", date, slot_id, elapsed_ms = state.elapsed_ms(), "firing");

        state.booking_calls += 1;
        match self.client.blind_book(date, slot_id).await {
            Ok(receipt) => Some(receipt),
            Err(error) => {
                warn!(
                    phase = "blind",
                    slot_id,
                    elapsed_ms = state.elapsed_ms(),
                    reason = %error.reason(),
                    "failed"
                );
                None
            }
        }
    }

    async fn retry_phase(&self, state: &mut RaceState) -> Option<BookingReceipt> {
        state.enter(RacePhase::Retry);
        let max_retries = self.config.max_retries;

        for attempt in 1..=max_retries {
            state.retries = attempt;
            info!(
                phase = "retry",
                attempt,
                max_retries,
                elapsed_ms = state.elapsed_ms(),
                "round"
            );

            match self.retry_round(state).await {
                Ok(receipt) => return Some(receipt),
                Err(failure) => warn!(
                    phase = "retry",
                    attempt,
                    elapsed_ms = state.elapsed_ms(),
                    reason = %failure,
                    "failed"
                ),
            }

            if attempt < max_retries {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        None
    }

    async fn retry_round(&self, state: &mut RaceState) -> Result<BookingReceipt, RoundFailure> {
        let schedule = self
            .client
            .fetch_schedule(&self.query)
            .await
            .map_err(RoundFailure::Schedule)?;

        let day = schedule.furthest_day().ok_or(RoundFailure::NoSlot)?;
        let slot = select_slot_in_day(day, &self.prefs).ok_or(RoundFailure::NoSlot)?;
        let date = day.booking_date(slot);
        info!(
            phase = "retry",
            date = %date,
            start_time = slot.start_time.as_deref().unwrap_or("?"),
            slot_id = %slot.id,
            "booking selected slot"
        );

        state.booking_calls += 1;
        self.client
            .blind_book(&date, &slot.id)
            .await
            .map_err(|error| RoundFailure::Booking {
                slot_id: slot.id.clone(),
                error,
            })
    }

    async fn carpet_phase(
        &self,
        state: &mut RaceState,
        date: &str,
    ) -> Option<(BookingReceipt, Vec<BookingReceipt>)> {
        state.enter(RacePhase::Carpet);
        let slot_ids = &self.config.fallback_slot_ids;
        info!(
            phase = "carpet",
            date,
            slots = slot_ids.len(),
            elapsed_ms = state.elapsed_ms(),
            "firing all fallback slots"
        );

        // All calls in flight together. Nothing is cancelled once started.
        let results = join_all(slot_ids.iter().map(|id| self.client.blind_book(date, id))).await;
        state.booking_calls += slot_ids.len() as u32;

        let mut successes = Vec::new();
        for (slot_id, result) in slot_ids.iter().zip(results) {
            match result {
                Ok(receipt) => successes.push(receipt),
                Err(error) => warn!(
                    phase = "carpet",
                    slot_id = %slot_id,
                    reason = %error.reason(),
                    "failed"
                ),
            }
        }

        let mut successes = successes.into_iter();
        let winner = successes.next()?;
        let duplicates: Vec<BookingReceipt> = successes.collect();
        for duplicate in &duplicates {
            warn!(
                phase = "carpet",
                slot_id = %duplicate.slot_id,
                date = %duplicate.date,
                "extra booking also succeeded, cancel it manually if unwanted"
            );
        }

        Some((winner, duplicates))
    }

    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_delay;
        if self.config.retry_jitter <= 0.0 {
            return base;
        }
        base.mul_f64(1.0 + rand::random::<f64>() * self.config.retry_jitter)
    }
}

fn booked(state: &RaceState, receipt: BookingReceipt, duplicates: Vec<BookingReceipt>) -> RaceOutcome {
    RaceOutcome::Booked {
        phase: state.phase(),
        receipt,
        elapsed: state.elapsed(),
        duplicates,
    }
}

fn log_summary(outcome: &RaceOutcome) {
    match outcome {
        RaceOutcome::Booked {
            phase,
            receipt,
            elapsed,
            duplicates,
        } => info!(
            phase = %phase,
            outcome = "booked",
            slot_id = %receipt.slot_id,
            date = %receipt.date,
            elapsed_ms = elapsed.as_millis() as u64,
            duplicates = duplicates.len(),
            payload = %receipt.payload,
            "BOOKED"
        ),
        RaceOutcome::Exhausted {
            elapsed,
            retry_rounds,
            booking_calls,
        } => info!(
            phase = "done",
            outcome = "exhausted",
            elapsed_ms = elapsed.as_millis() as u64,
            retry_rounds,
            booking_calls,
            "all attempts failed"
        ),
    }
}

// Today in `tz`, moved forward by the booking horizon
pub fn target_date(now: DateTime<Utc>, tz: FixedOffset, horizon_days: u32) -> NaiveDate {
    now.with_timezone(&tz).date_naive() + chrono::Duration::days(i64::from(horizon_days))
}

// Time left until `at` today in `tz`. Zero once that moment has passed.
pub fn delay_until_release(now: DateTime<Utc>, tz: FixedOffset, at: NaiveTime) -> Duration {
    let local = now.with_timezone(&tz).naive_local();
    let release = local.date().and_time(at);
    (release - local).to_std().unwrap_or(Duration::ZERO)
}

// How long before the release the warm-up call goes out. Idle pooled
// connections do not survive much longer than this.
pub const WARM_UP_LEAD: Duration = Duration::from_secs(5);

// Sleeps `wait` in total, warming the client up `lead` before the end
pub async fn warm_up_and_wait<C: BookingApi + ?Sized>(client: &C, wait: Duration, lead: Duration) {
    let release = Instant::now() + wait;
    if let Some(early) = wait.checked_sub(lead).filter(|early| !early.is_zero()) {
        tokio::time::sleep(early).await;
    }
    client.warm_up().await;
    tokio::time::sleep_until(release).await;
}

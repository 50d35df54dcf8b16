//! Session lifecycle scheduler.
//!
//! Two sweeps run on a fixed period:
//!
//! - **open**: SCHEDULED sessions starting within `[now - open_grace, now]`
//!   become LIVE.
//! - **close**: SCHEDULED or LIVE sessions whose end is at or before
//!   `now - close_grace` become ENDED and their bookings completed.
//!
//! Each session transitions in its own transaction through a compare-and-set
//! on the previous status, so overlapping sweeps and operator calls cannot
//! both apply the same flip. A failing session is logged and counted; the
//! sweep carries on with the rest.

use crate::finish;
use crate::metrics;
use crate::notify::Dispatcher;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tutoring_core::{
    Booking, Clock, Error, Notification, Result, Session, SessionId, Store, Transaction, Trigger,
};

/// Scheduler timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// How long after its start a SCHEDULED session is still picked up
    pub open_grace: chrono::Duration,
    /// How long after the nominal end a session stays open
    pub close_grace: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            open_grace: chrono::Duration::minutes(10),
            close_grace: chrono::Duration::minutes(5),
        }
    }
}

/// Result of a single open or close request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "session", rename_all = "snake_case")]
pub enum Transition {
    /// The session moved to the new status
    Applied(Session),
    /// The session already had the target status (or moved concurrently)
    Unchanged(Session),
}

impl Transition {
    /// The session after the call.
    #[must_use]
    pub const fn session(&self) -> &Session {
        match self {
            Self::Applied(session) | Self::Unchanged(session) => session,
        }
    }

    /// Whether this call changed anything.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions the sweep selected
    pub examined: usize,
    /// Sessions it transitioned
    pub transitioned: usize,
    /// Sessions already transitioned by someone else
    pub skipped: usize,
    /// Sessions that failed
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sweep {
    Open,
    Close,
}

impl Sweep {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Opens and closes sessions based on wall-clock time.
#[derive(Clone)]
pub struct SessionScheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    config: SchedulerConfig,
}

impl SessionScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        dispatcher: Dispatcher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
            config,
        }
    }

    /// Timing in force.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Tick until `shutdown` fires. The first tick runs immediately.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "Session scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    tracing::info!("Session scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Run both sweeps once. Sweep-level failures are logged, not returned.
    pub async fn tick(&self) {
        if let Err(error) = self.open_sweep().await {
            tracing::error!(%error, "Open sweep failed");
            metrics::record_sweep_failure(Sweep::Open.as_str());
        }
        if let Err(error) = self.close_sweep().await {
            tracing::error!(%error, "Close sweep failed");
            metrics::record_sweep_failure(Sweep::Close.as_str());
        }
    }

    /// Open every session due to start.
    ///
    /// # Errors
    ///
    /// Only if the due sessions cannot be listed.
    pub async fn open_sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let due = tx
            .sessions_due_to_open(now - self.config.open_grace, now)
            .await;
        let due = finish(tx, due).await?;
        Ok(self.sweep(Sweep::Open, due).await)
    }

    /// Close every session past its end plus grace.
    ///
    /// # Errors
    ///
    /// Only if the due sessions cannot be listed.
    pub async fn close_sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let due = tx.sessions_due_to_close(now - self.config.close_grace).await;
        let due = finish(tx, due).await?;
        Ok(self.sweep(Sweep::Close, due).await)
    }

    async fn sweep(&self, sweep: Sweep, due: Vec<Session>) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for session in due {
            let outcome = match sweep {
                Sweep::Open => self.open(session.id, Trigger::Scheduler).await,
                Sweep::Close => self.close(session.id, Trigger::Scheduler).await,
            };
            match outcome {
                Ok(Transition::Applied(_)) => report.transitioned += 1,
                Ok(Transition::Unchanged(_)) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        session_id = %session.id,
                        sweep = sweep.as_str(),
                        %error,
                        "Session transition failed"
                    );
                    metrics::record_sweep_failure(sweep.as_str());
                }
            }
        }

        metrics::record_sweep_duration(sweep.as_str(), started.elapsed());
        if report.examined > 0 {
            tracing::info!(
                sweep = sweep.as_str(),
                examined = report.examined,
                transitioned = report.transitioned,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep finished"
            );
        }
        report
    }

    /// Operator path: open a session now.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the session does not exist
    /// - [`Error::Validation`] if it was cancelled
    pub async fn force_open(&self, session_id: SessionId) -> Result<Transition> {
        self.open(session_id, Trigger::Manual).await
    }

    /// Operator path: close a session now and complete its bookings.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the session does not exist
    /// - [`Error::Validation`] if it was cancelled
    pub async fn force_close(&self, session_id: SessionId) -> Result<Transition> {
        self.close(session_id, Trigger::Manual).await
    }

    async fn open(&self, session_id: SessionId, trigger: Trigger) -> Result<Transition> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let result = async {
            let session = tx.load_session(session_id).await?;
            let Some(live) = session.open(now, trigger)? else {
                return Ok((Transition::Unchanged(session), Vec::new()));
            };
            if !tx.transition_session(session.status, &live).await? {
                let current = tx.load_session(session_id).await?;
                return Ok((Transition::Unchanged(current), Vec::new()));
            }
            let bookings = tx.bookings_for_session(session_id).await?;
            Ok::<_, Error>((Transition::Applied(live), bookings))
        }
        .await;
        let (transition, bookings) = finish(tx, result).await?;

        if let Transition::Applied(session) = &transition {
            tracing::info!(%session_id, trigger = trigger.as_str(), "Session opened");
            metrics::record_transition("open", trigger.as_str());
            self.notify_live(session, &bookings);
        }
        Ok(transition)
    }

    async fn close(&self, session_id: SessionId, trigger: Trigger) -> Result<Transition> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let result = async {
            // booking rows before the session row, same order as cancellation
            let bookings = lock_bookings(tx.as_mut(), session_id).await?;
            let session = tx.load_session(session_id).await?;
            let Some(ended) = session.close(now, trigger)? else {
                return Ok(Transition::Unchanged(session));
            };
            if !tx.transition_session(session.status, &ended).await? {
                let current = tx.load_session(session_id).await?;
                return Ok(Transition::Unchanged(current));
            }
            for mut booking in bookings {
                if booking.status.is_terminal() {
                    continue;
                }
                booking.complete(now)?;
                tx.update_booking(&booking).await?;
            }
            Ok::<_, Error>(Transition::Applied(ended))
        }
        .await;
        let transition = finish(tx, result).await?;

        if transition.is_applied() {
            tracing::info!(%session_id, trigger = trigger.as_str(), "Session closed");
            metrics::record_transition("close", trigger.as_str());
        }
        Ok(transition)
    }

    fn notify_live(&self, session: &Session, bookings: &[Booking]) {
        for booking in bookings.iter().filter(|b| !b.status.is_terminal()) {
            for user in [booking.student_id, booking.teacher_id] {
                self.dispatcher.dispatch(
                    Notification::new(user, "Session is live", "Your session has started")
                        .with_data(serde_json::json!({
                            "session_id": session.id,
                            "booking_id": booking.id,
                        })),
                );
            }
        }
    }
}

async fn lock_bookings(tx: &mut dyn Transaction, session_id: SessionId) -> Result<Vec<Booking>> {
    let listed = tx.bookings_for_session(session_id).await?;
    let mut locked = Vec::with_capacity(listed.len());
    for booking in listed {
        locked.push(tx.lock_booking(booking.id).await?);
    }
    Ok(locked)
}

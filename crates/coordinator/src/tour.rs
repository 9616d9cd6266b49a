//! Visiting every cell of the grid, one after the other.
//!
//! The controller never says when a move is finished, so after each move we
//! wait for as long as [`TourTiming`](sera_planner::TourTiming) thinks it
//! should take. A tour can be cancelled at any point; it then stops where it
//! is, without going home.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use log::{debug, error, info, warn};
use sera_geom::distance;
use sera_planner::TourPlan;
use tokio::sync::{watch, Notify};

use crate::{store::Backend, MoveError, Rig, RigDevice};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TourPhase {
    #[default]
    Idle,
    Running,
    ReturningHome,
}

/// A snapshot of the tour's progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TourState {
    pub phase: TourPhase,
    pub cancel_requested: bool,
    /// How far through the tour we are, counting from zero.
    pub step: Option<usize>,
    /// The cell being visited in the current step.
    pub cell: Option<usize>,
    /// The number of steps in the tour.
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TourOutcome {
    Completed,
    /// The tour was cancelled after sending `visited` moves.
    Cancelled { visited: usize },
}

/// Identifies one run of a tour.
///
/// A tour that is still winding down after a stop shouldn't be able to
/// clobber the state of a newer one, so every update is checked against
/// the ticket.
pub(crate) struct TourTicket(u64);

pub(crate) struct TourControl {
    current: AtomicU64,
    next: AtomicU64,
    cancel: AtomicBool,
    wake: Notify,
    state: watch::Sender<TourState>,
}

impl Default for TourControl {
    fn default() -> Self {
        TourControl {
            current: AtomicU64::new(0),
            next: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
            wake: Notify::new(),
            state: watch::channel(TourState::default()).0,
        }
    }
}

impl TourControl {
    pub fn begin(&self, total: usize) -> TourTicket {
        let id = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1);
        self.current.store(id, Ordering::Release);
        self.cancel.store(false, Ordering::Release);
        // An older tour might still be sleeping; it needs to notice it's
        // been superseded.
        self.wake.notify_waiters();
        self.state.send_replace(TourState {
            phase: TourPhase::Running,
            cancel_requested: false,
            step: None,
            cell: None,
            total,
        });
        TourTicket(id)
    }

    fn is_current(&self, ticket: &TourTicket) -> bool {
        self.current.load(Ordering::Acquire) == ticket.0
    }

    pub fn cancelled(&self, ticket: &TourTicket) -> bool {
        !self.is_current(ticket) || self.cancel.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        self.state.send_if_modified(|s| {
            let running = s.phase != TourPhase::Idle && !s.cancel_requested;
            if running {
                s.cancel_requested = true;
            }
            running
        });
        self.wake.notify_waiters();
    }

    pub fn update(&self, ticket: &TourTicket, f: impl FnOnce(&mut TourState)) {
        if self.is_current(ticket) {
            self.state.send_modify(f);
        }
    }

    pub fn finish(&self, ticket: &TourTicket) {
        if self
            .current
            .compare_exchange(ticket.0, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.state.send_modify(|s| {
                s.phase = TourPhase::Idle;
                s.step = None;
                s.cell = None;
            });
        }
    }

    pub fn state(&self) -> TourState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TourState> {
        self.state.subscribe()
    }

    /// Sleeps for `dur`, or until the tour is cancelled. Returns `false` if
    /// it was cancelled.
    pub async fn wait(&self, ticket: &TourTicket, dur: Duration) -> bool {
        let sleep = tokio::time::sleep(dur);
        tokio::pin!(sleep);
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register before checking the flag, so a cancel that lands in
            // between isn't missed.
            notified.as_mut().enable();
            if self.cancelled(ticket) {
                return false;
            }
            tokio::select! {
                _ = &mut sleep => return !self.cancelled(ticket),
                _ = notified => {}
            }
        }
    }
}

impl<D: RigDevice, B: Backend> Rig<D, B> {
    /// Visits every grid cell in zig-zag order, then returns HOME.
    ///
    /// The rig is busy for the whole tour, so other moves are refused until
    /// it finishes or is cancelled. Any failed move ends the tour, leaving
    /// the rig wherever it got to.
    pub async fn tour(&self, speed: f32) -> Result<TourOutcome, MoveError> {
        let _guard = self.motion.try_acquire().ok_or(MoveError::Busy)?;
        let plan = TourPlan::zigzag(&self.grid);
        info!("starting a tour of {} cells at {speed}cm/s", plan.len());
        let ticket = self.tour.begin(plan.len());
        let result = self.run_tour(&plan, &ticket, speed).await;
        self.tour.finish(&ticket);
        match &result {
            Ok(TourOutcome::Completed) => info!("tour finished"),
            Ok(TourOutcome::Cancelled { visited }) => {
                warn!("tour cancelled after {visited} of {} cells", plan.len())
            }
            Err(e) => error!("tour aborted: {e}"),
        }
        result
    }

    async fn run_tour(
        &self,
        plan: &TourPlan,
        ticket: &TourTicket,
        speed: f32,
    ) -> Result<TourOutcome, MoveError> {
        let home = self.home();
        let mut current = self.position();

        for (step, &cell) in plan.order().iter().enumerate() {
            if self.tour.cancelled(ticket) {
                return Ok(TourOutcome::Cancelled { visited: step });
            }
            let target = self.grid.resolve_target(home, cell)?;
            let settle = self.timing.settle_time(distance(current, target), speed);
            self.tour.update(ticket, |s| {
                s.step = Some(step);
                s.cell = Some(cell);
            });
            info!("tour step {}/{}: cell {}", step + 1, plan.len(), cell + 1);
            debug!("expecting to settle within {settle:?}");

            current = self.send_move(target, speed).await?.new_position();

            if self.tour.cancelled(ticket) || !self.tour.wait(ticket, settle).await {
                return Ok(TourOutcome::Cancelled { visited: step + 1 });
            }
            if plan.ends_row(step) && !self.tour.wait(ticket, self.timing.row_pause).await {
                return Ok(TourOutcome::Cancelled { visited: step + 1 });
            }
        }

        if !self.tour.wait(ticket, self.timing.home_pause).await {
            return Ok(TourOutcome::Cancelled {
                visited: plan.len(),
            });
        }
        let settle = self.timing.settle_time(distance(current, home), speed);
        self.tour.update(ticket, |s| {
            s.phase = TourPhase::ReturningHome;
            s.step = None;
            s.cell = None;
        });
        info!("tour returning home");
        self.send_move(home, speed).await?;
        if !self.tour.wait(ticket, settle).await {
            return Ok(TourOutcome::Cancelled {
                visited: plan.len(),
            });
        }
        Ok(TourOutcome::Completed)
    }

    /// Asks a running tour to stop at its next checkpoint. A move that's
    /// already been sent isn't recalled; use [`Rig::stop`] for that.
    pub fn cancel_tour(&self) {
        info!("cancelling the tour");
        self.tour.cancel();
    }

    pub fn tour_state(&self) -> TourState {
        self.tour.state()
    }

    /// Follows the tour's progress.
    pub fn subscribe_tour(&self) -> watch::Receiver<TourState> {
        self.tour.subscribe()
    }
}

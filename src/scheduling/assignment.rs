//! AssignmentCore: binding workers to confirmed bookings and the worker
//! state machine that carries a job to completion.

use super::comms::CommsCore;
use super::notify::{Notification, NotificationKind};
use super::tracking::LocationTracker;
use super::CoreContext;
use crate::db::{AssignmentOutcome, AssignmentTransition, BookingPatch, EarningsCredit};
use crate::domain::payment::new_reference;
use crate::domain::{
    format_date, Actor, AssignmentStatus, Booking, BookingStatus, CompletionDetails, SlotTime,
    User, WorkerAssignment,
};
use crate::engine::{Obligation, ObligorKind};
use crate::error::CoreError;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Worker's completion report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteJob {
    pub notes: Option<String>,
    #[serde(default)]
    pub materials_used: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Free-form inputs of one assignment step.
#[derive(Debug, Default)]
struct StepInput {
    notes: Option<String>,
    rejection_reason: Option<String>,
    completion: Option<CompletionDetails>,
}

#[derive(Clone)]
pub struct AssignmentCore {
    ctx: CoreContext,
    comms: CommsCore,
    tracker: LocationTracker,
}

impl AssignmentCore {
    pub fn new(ctx: CoreContext, comms: CommsCore, tracker: LocationTracker) -> Self {
        Self {
            ctx,
            comms,
            tracker,
        }
    }

    async fn require_assignment(&self, id: i64) -> Result<WorkerAssignment, CoreError> {
        self.ctx
            .repo
            .get_assignment(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("assignment {}", id)))
    }

    /// Assign a worker to a confirmed booking.
    ///
    /// With `worker_id` the named worker is used and a clash with another
    /// of their jobs is a `Conflict`. Without it the auto-assigner picks
    /// the free worker with the fewest jobs that day, ties broken by id,
    /// and reports `SlotFull` when nobody is free.
    pub async fn assign(
        &self,
        actor: Actor,
        booking_id: i64,
        worker_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<WorkerAssignment, CoreError> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized("only admins assign workers".into()));
        }
        let booking = self.ctx.require_booking(booking_id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, only confirmed bookings can be assigned",
                booking_id, booking.status
            )));
        }
        if let Some(active) = self.ctx.repo.active_assignment_for_booking(booking_id).await? {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} already has {} assignment {}",
                booking_id, active.status, active.id
            )));
        }

        let now = self.ctx.now();
        let (assignment, booking) = match worker_id {
            Some(worker_id) => {
                self.ctx
                    .repo
                    .insert_assignment(booking_id, worker_id, actor.user_id, notes.as_deref(), now)
                    .await?
            }
            None => self.auto_assign(&booking, actor.user_id, notes.as_deref()).await?,
        };
        info!(
            booking_id,
            assignment_id = assignment.id,
            worker_id = assignment.worker_id,
            "Worker assigned"
        );

        self.ctx
            .notify(
                Notification::new(
                    assignment.worker_id,
                    NotificationKind::WorkerAssigned,
                    format!("New job {}", booking.reference),
                )
                .for_booking(booking_id),
            )
            .await;
        Ok(assignment)
    }

    async fn auto_assign(
        &self,
        booking: &Booking,
        assigned_by: i64,
        notes: Option<&str>,
    ) -> Result<(WorkerAssignment, Booking), CoreError> {
        let (Some(date), Some(start)) = (booking.scheduled_date, booking.scheduled_time) else {
            return Err(CoreError::InvalidInput(format!(
                "booking {} has no schedule",
                booking.id
            )));
        };
        let now = self.ctx.now();
        let obligations = self.ctx.repo.load_obligations(date, now).await?;
        let end = match obligations
            .iter()
            .find(|o| o.kind == ObligorKind::Reservation && o.booking_id == booking.id)
        {
            Some(reservation) => reservation.end,
            None => {
                let buffer = self.ctx.settings.buffer_minutes().await?;
                booking.scheduled_end_time.unwrap_or(start).saturating_add(buffer)
            }
        };

        let workers = self.ctx.repo.list_active_workers().await?;
        let candidates = rank_candidates(&workers, &obligations, start, end);
        debug!(booking_id = booking.id, candidates = candidates.len(), "Auto-assign candidates");

        for worker_id in candidates {
            match self
                .ctx
                .repo
                .insert_assignment(booking.id, worker_id, assigned_by, notes, self.ctx.now())
                .await
            {
                Ok(assigned) => return Ok(assigned),
                // Only the overlap check reports Conflict; a second active
                // assignment on the booking is an IllegalTransition.
                Err(CoreError::Conflict(reason)) => {
                    debug!(booking_id = booking.id, worker_id, %reason, "Candidate took an overlapping job, trying next");
                }
                Err(e) => return Err(e),
            }
        }
        warn!(booking_id = booking.id, %date, %start, "No free worker for booking");
        Err(CoreError::SlotFull(format!("{} {}", format_date(date), start)))
    }

    pub async fn accept(
        &self,
        worker_id: i64,
        assignment_id: i64,
        notes: Option<String>,
    ) -> Result<WorkerAssignment, CoreError> {
        let assignment = self.require_assignment(assignment_id).await?;
        let outcome = self
            .step(
                &assignment,
                Some(worker_id),
                &[AssignmentStatus::Assigned],
                AssignmentStatus::Accepted,
                StepInput {
                    notes,
                    ..Default::default()
                },
            )
            .await?;
        Ok(outcome.assignment)
    }

    pub async fn reject(
        &self,
        worker_id: i64,
        assignment_id: i64,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<WorkerAssignment, CoreError> {
        let assignment = self.require_assignment(assignment_id).await?;
        let outcome = self
            .step(
                &assignment,
                Some(worker_id),
                &[AssignmentStatus::Assigned],
                AssignmentStatus::Rejected,
                StepInput {
                    notes,
                    rejection_reason: reason,
                    ..Default::default()
                },
            )
            .await?;
        Ok(outcome.assignment)
    }

    pub async fn start(
        &self,
        worker_id: i64,
        assignment_id: i64,
        notes: Option<String>,
    ) -> Result<WorkerAssignment, CoreError> {
        let assignment = self.require_assignment(assignment_id).await?;
        let outcome = self
            .step(
                &assignment,
                Some(worker_id),
                &[AssignmentStatus::Accepted],
                AssignmentStatus::InProgress,
                StepInput {
                    notes,
                    ..Default::default()
                },
            )
            .await?;
        Ok(outcome.assignment)
    }

    /// Finish the job and credit the worker in the same transaction.
    pub async fn complete(
        &self,
        worker_id: i64,
        assignment_id: i64,
        report: CompleteJob,
    ) -> Result<AssignmentOutcome, CoreError> {
        let assignment = self.require_assignment(assignment_id).await?;
        self.step(
            &assignment,
            Some(worker_id),
            &[AssignmentStatus::InProgress],
            AssignmentStatus::Completed,
            StepInput {
                notes: report.notes,
                rejection_reason: None,
                completion: Some(CompletionDetails {
                    materials_used: report.materials_used,
                    photos: report.photos,
                }),
            },
        )
        .await
    }

    /// Force an assignment into a later state, or cancel it with
    /// `Rejected` while the job has not started. Intermediate steps are
    /// applied in order with their usual side effects.
    pub async fn admin_override(
        &self,
        actor: Actor,
        assignment_id: i64,
        target: AssignmentStatus,
        reason: Option<String>,
    ) -> Result<WorkerAssignment, CoreError> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized("only admins override assignments".into()));
        }
        let mut assignment = self.require_assignment(assignment_id).await?;
        info!(assignment_id, from = %assignment.status, to = %target, "Admin override");

        if target == AssignmentStatus::Rejected {
            let outcome = self
                .step(
                    &assignment,
                    None,
                    &[AssignmentStatus::Assigned, AssignmentStatus::Accepted],
                    AssignmentStatus::Rejected,
                    StepInput {
                        rejection_reason: Some(
                            reason.unwrap_or_else(|| "cancelled by admin".to_string()),
                        ),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(outcome.assignment);
        }

        while assignment.status != target {
            let next = next_forward(assignment.status).ok_or_else(|| {
                CoreError::IllegalTransition(format!(
                    "assignment {} is {}, cannot move to {}",
                    assignment_id, assignment.status, target
                ))
            })?;
            let input = StepInput {
                notes: reason.clone(),
                completion: (next == AssignmentStatus::Completed)
                    .then(CompletionDetails::default),
                ..Default::default()
            };
            let from = [assignment.status];
            let outcome = self.step(&assignment, None, &from, next, input).await?;
            assignment = outcome.assignment;
        }
        Ok(assignment)
    }

    /// Apply one transition with its booking side effects, then the
    /// best-effort follow-ups (chat, masking, tracking, notifications).
    async fn step(
        &self,
        assignment: &WorkerAssignment,
        by_worker: Option<i64>,
        from: &[AssignmentStatus],
        to: AssignmentStatus,
        input: StepInput,
    ) -> Result<AssignmentOutcome, CoreError> {
        let now = self.ctx.now();
        let (booking_from, booking_to, booking_patch, credit) = match to {
            AssignmentStatus::Accepted => (
                vec![BookingStatus::Assigned],
                BookingStatus::Confirmed,
                BookingPatch::new(),
                None,
            ),
            AssignmentStatus::Rejected => (
                vec![BookingStatus::Assigned, BookingStatus::Confirmed],
                BookingStatus::Confirmed,
                BookingPatch::new(),
                None,
            ),
            AssignmentStatus::InProgress => (
                vec![BookingStatus::Confirmed],
                BookingStatus::InProgress,
                BookingPatch::new().started(now),
                None,
            ),
            AssignmentStatus::Completed => {
                let booking = self.ctx.require_booking(assignment.booking_id).await?;
                let service_price = self
                    .ctx
                    .repo
                    .get_service(booking.service_id)
                    .await?
                    .and_then(|s| s.price);
                let credit = booking.earnings_amount(service_price).map(|amount| EarningsCredit {
                    reference: new_reference("ERN"),
                    amount,
                });
                if credit.is_none() {
                    warn!(booking_id = booking.id, "No price to credit for completed job");
                }
                let duration = booking
                    .actual_start_time
                    .map(|started| (now - started).num_minutes().max(0));
                (
                    vec![BookingStatus::InProgress],
                    BookingStatus::Completed,
                    BookingPatch::new().finished(now, duration),
                    credit,
                )
            }
            AssignmentStatus::Assigned => {
                return Err(CoreError::IllegalTransition(format!(
                    "assignment {} cannot move back to assigned",
                    assignment.id
                )))
            }
        };

        let outcome = self
            .ctx
            .repo
            .transition_assignment(
                &AssignmentTransition {
                    assignment_id: assignment.id,
                    worker_id: by_worker,
                    from: from.to_vec(),
                    to,
                    notes: input.notes,
                    rejection_reason: input.rejection_reason,
                    completion: input.completion,
                    booking_from,
                    booking_to,
                    booking_patch,
                    credit,
                },
                now,
            )
            .await?;
        info!(
            assignment_id = assignment.id,
            booking_id = assignment.booking_id,
            worker_id = assignment.worker_id,
            status = %to,
            "Assignment transitioned"
        );

        self.follow_up(&outcome).await;
        Ok(outcome)
    }

    async fn follow_up(&self, outcome: &AssignmentOutcome) {
        let assignment = &outcome.assignment;
        let booking = &outcome.booking;
        match assignment.status {
            AssignmentStatus::Accepted => {
                self.comms.open_for(booking, assignment.worker_id).await;
                self.ctx
                    .notify(
                        Notification::new(
                            booking.user_id,
                            NotificationKind::AssignmentAccepted,
                            format!("A worker accepted {}", booking.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
            }
            AssignmentStatus::Rejected => {
                self.comms.mask_off(booking.id).await;
                self.ctx
                    .notify(
                        Notification::new(
                            assignment.assigned_by,
                            NotificationKind::AssignmentRejected,
                            format!("{} needs a new worker", booking.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
            }
            AssignmentStatus::InProgress => {
                self.ctx
                    .notify(
                        Notification::new(
                            booking.user_id,
                            NotificationKind::JobStarted,
                            format!("Work on {} has started", booking.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
            }
            AssignmentStatus::Completed => {
                self.comms.shut_down(booking.id, "job completed").await;
                self.tracker.announce_stopped(assignment).await;
                self.ctx
                    .notify(
                        Notification::new(
                            booking.user_id,
                            NotificationKind::JobCompleted,
                            format!("{} is complete", booking.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
                if let Some(credit) = &outcome.credit {
                    info!(
                        worker_id = assignment.worker_id,
                        amount = %credit.amount,
                        "Earnings credited"
                    );
                    self.ctx
                        .notify(
                            Notification::new(
                                assignment.worker_id,
                                NotificationKind::EarningsCredited,
                                format!("{} credited for {}", credit.amount, booking.reference),
                            )
                            .for_booking(booking.id),
                        )
                        .await;
                }
            }
            AssignmentStatus::Assigned => {}
        }
    }
}

fn next_forward(status: AssignmentStatus) -> Option<AssignmentStatus> {
    match status {
        AssignmentStatus::Assigned => Some(AssignmentStatus::Accepted),
        AssignmentStatus::Accepted => Some(AssignmentStatus::InProgress),
        AssignmentStatus::InProgress => Some(AssignmentStatus::Completed),
        AssignmentStatus::Rejected | AssignmentStatus::Completed => None,
    }
}

/// Workers free over `[start, end)`, fewest jobs that day first.
fn rank_candidates(
    workers: &[User],
    obligations: &[Obligation],
    start: SlotTime,
    end: SlotTime,
) -> Vec<i64> {
    let mut load: HashMap<i64, usize> = HashMap::new();
    let mut busy = Vec::new();
    for o in obligations.iter().filter(|o| o.kind == ObligorKind::Assignment) {
        *load.entry(o.id).or_default() += 1;
        if o.start.snap_down() < end && start.snap_down() < o.end {
            busy.push(o.id);
        }
    }

    let mut free: Vec<(usize, i64)> = workers
        .iter()
        .filter(|w| !busy.contains(&w.id))
        .map(|w| (load.get(&w.id).copied().unwrap_or(0), w.id))
        .collect();
    free.sort_unstable();
    free.into_iter().map(|(_, id)| id).collect()
}

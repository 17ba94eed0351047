//! Live location tracking for in-progress jobs with per-booking fan-out.
//!
//! Each booking has one topic backed by a `watch` channel holding the most
//! recent event. Slow subscribers skip straight to the latest position and
//! late subscribers see nothing until the next update.

use super::CoreContext;
use crate::domain::{
    Actor, Booking, Coordinate, TrackingStatus, WorkerAssignment, WorkerLocation,
};
use crate::engine::within_arrival_radius;
use crate::error::CoreError;
use crate::integrations::Geocoder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Message pushed to booking subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TrackingEvent {
    WorkerLocation(LocationView),
    TrackingStopped(TrackingStopped),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationView {
    pub worker_id: i64,
    pub assignment_id: i64,
    pub booking_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub status: TrackingStatus,
    pub last_updated: DateTime<Utc>,
    pub has_arrived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingStopped {
    pub assignment_id: i64,
    pub worker_id: i64,
    pub status: TrackingStatus,
}

type Topic = watch::Sender<Option<TrackingEvent>>;

#[derive(Clone)]
pub struct LocationTracker {
    ctx: CoreContext,
    geocoder: Option<Arc<dyn Geocoder>>,
    fallback: Coordinate,
    topics: Arc<Mutex<HashMap<i64, Topic>>>,
    /// Serializes updates per assignment so subscribers see them in order.
    writers: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
    /// Customer position per booking, resolved once.
    customers: Arc<Mutex<HashMap<i64, Coordinate>>>,
}

impl LocationTracker {
    pub fn new(ctx: CoreContext, geocoder: Option<Arc<dyn Geocoder>>, fallback: Coordinate) -> Self {
        Self {
            ctx,
            geocoder,
            fallback,
            topics: Arc::new(Mutex::new(HashMap::new())),
            writers: Arc::new(Mutex::new(HashMap::new())),
            customers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open the active location row at the origin.
    ///
    /// # Errors
    /// `IllegalTransition` unless the assignment is in progress for this
    /// worker; `Conflict` when tracking is already running.
    pub async fn start(&self, worker_id: i64, assignment_id: i64) -> Result<WorkerLocation, CoreError> {
        let location = self
            .ctx
            .repo
            .insert_location(
                worker_id,
                assignment_id,
                Coordinate::origin(),
                None,
                TrackingStatus::Tracking,
                self.ctx.now(),
            )
            .await?;
        info!(assignment_id, worker_id, "Tracking started");
        Ok(location)
    }

    /// Record a position sample, flip to `arrived` inside the arrival
    /// radius and broadcast the result.
    pub async fn update(
        &self,
        worker_id: i64,
        assignment_id: i64,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
    ) -> Result<LocationView, CoreError> {
        let position = Coordinate::new(latitude, longitude)?;
        if let Some(acc) = accuracy {
            if !acc.is_finite() || acc < 0.0 {
                return Err(CoreError::InvalidInput(format!("accuracy {} is not valid", acc)));
            }
        }

        let writer = self.writer(assignment_id);
        let _guard = writer.lock().await;

        let current = self.ctx.repo.active_location(assignment_id).await?;
        if let Some(row) = &current {
            if row.worker_id != worker_id {
                return Err(CoreError::Unauthorized(format!(
                    "assignment {} belongs to another worker",
                    assignment_id
                )));
            }
        }
        let booking_id = match &current {
            Some(row) => row.booking_id,
            None => {
                let assignment = self.owned_assignment(worker_id, assignment_id).await?;
                // Only `start` reopens tracking that was stopped.
                if let Some(last) = self.ctx.repo.latest_location(assignment_id).await? {
                    if last.status == TrackingStatus::Stopped {
                        return Err(CoreError::IllegalTransition(format!(
                            "tracking for assignment {} was stopped",
                            assignment_id
                        )));
                    }
                }
                assignment.booking_id
            }
        };
        let booking = self.ctx.require_booking(booking_id).await?;
        let customer = self.customer_coordinate(&booking).await;

        let previous = current
            .as_ref()
            .map_or(TrackingStatus::Tracking, |row| row.status);
        let status = if previous == TrackingStatus::Tracking && within_arrival_radius(position, customer) {
            info!(assignment_id, booking_id, "Worker arrived");
            TrackingStatus::Arrived
        } else {
            previous
        };

        let now = self.ctx.now();
        let location = match current {
            Some(row) => {
                self.ctx
                    .repo
                    .update_location(row.id, position, accuracy, status, now)
                    .await?
            }
            None => {
                self.ctx
                    .repo
                    .insert_location(worker_id, assignment_id, position, accuracy, status, now)
                    .await?
            }
        };

        let view = self.view(location, &booking).await?;
        self.publish(booking_id, TrackingEvent::WorkerLocation(view.clone()));
        Ok(view)
    }

    /// Deactivate tracking and tell subscribers. Safe to repeat.
    pub async fn stop(&self, worker_id: i64, assignment_id: i64) -> Result<TrackingStopped, CoreError> {
        let assignment = self.owned_assignment(worker_id, assignment_id).await?;
        let closed = self
            .ctx
            .repo
            .deactivate_locations(assignment_id, self.ctx.now())
            .await?;
        if closed > 0 {
            info!(assignment_id, worker_id, "Tracking stopped");
        }
        Ok(self.announce_stopped(&assignment).await)
    }

    /// Latest known position of an assignment.
    pub async fn get(&self, actor: Actor, assignment_id: i64) -> Result<LocationView, CoreError> {
        let assignment = self.assignment(assignment_id).await?;
        let booking = self.ctx.require_booking(assignment.booking_id).await?;
        let allowed = actor.is_admin()
            || actor.user_id == assignment.worker_id
            || booking.is_owned_by(actor.user_id);
        if !allowed {
            return Err(CoreError::Unauthorized(format!(
                "user {} cannot view assignment {}",
                actor.user_id, assignment_id
            )));
        }

        let location = self
            .ctx
            .repo
            .latest_location(assignment_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("no location for assignment {}", assignment_id))
            })?;
        self.view(location, &booking).await
    }

    /// Receive events for a booking from now on.
    pub fn subscribe(&self, booking_id: i64) -> watch::Receiver<Option<TrackingEvent>> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.retain(|_, topic| topic.receiver_count() > 0);
        topics
            .entry(booking_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Broadcast `tracking_stopped` for an assignment that left the
    /// in-progress state.
    pub(crate) async fn announce_stopped(&self, assignment: &WorkerAssignment) -> TrackingStopped {
        let stopped = TrackingStopped {
            assignment_id: assignment.id,
            worker_id: assignment.worker_id,
            status: TrackingStatus::Stopped,
        };
        self.publish(
            assignment.booking_id,
            TrackingEvent::TrackingStopped(stopped.clone()),
        );
        self.forget(assignment);
        stopped
    }

    /// Topics still held in memory.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn publish(&self, booking_id: i64, event: TrackingEvent) {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        match topics.get(&booking_id) {
            Some(topic) => {
                topic.send_replace(Some(event));
                debug!(booking_id, receivers = topic.receiver_count(), "Tracking event published");
            }
            None => debug!(booking_id, "No subscribers for tracking event"),
        }
    }

    fn writer(&self, assignment_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers.entry(assignment_id).or_default().clone()
    }

    /// Receivers that already hold the stop event still read it after the
    /// sender is dropped.
    fn forget(&self, assignment: &WorkerAssignment) {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&assignment.booking_id);
        self.writers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&assignment.id);
        self.customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&assignment.booking_id);
    }

    async fn assignment(&self, assignment_id: i64) -> Result<WorkerAssignment, CoreError> {
        self.ctx
            .repo
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("assignment {}", assignment_id)))
    }

    async fn owned_assignment(&self, worker_id: i64, assignment_id: i64) -> Result<WorkerAssignment, CoreError> {
        let assignment = self.assignment(assignment_id).await?;
        if assignment.worker_id != worker_id {
            return Err(CoreError::Unauthorized(format!(
                "assignment {} belongs to another worker",
                assignment_id
            )));
        }
        Ok(assignment)
    }

    /// Address coordinates first, then the geocoder, then the fallback.
    async fn customer_coordinate(&self, booking: &Booking) -> Coordinate {
        if let Some(known) = self
            .customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&booking.id)
            .copied()
        {
            return known;
        }

        let resolved = match booking.address.coordinate() {
            Some(coordinate) => {
                info!(booking_id = booking.id, source = "address", "Customer coordinate resolved");
                coordinate
            }
            None => self.geocode_customer(booking).await,
        };
        self.customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(booking.id, resolved);
        resolved
    }

    async fn geocode_customer(&self, booking: &Booking) -> Coordinate {
        if let (Some(geocoder), Some(text)) = (&self.geocoder, booking.address.geocodable_text()) {
            match geocoder.geocode(&text).await {
                Ok(results) => {
                    if let Some(coordinate) = results.iter().find_map(|r| r.coordinate()) {
                        info!(booking_id = booking.id, source = "geocoder", "Customer coordinate resolved");
                        return coordinate;
                    }
                }
                Err(e) => warn!(booking_id = booking.id, error = %e, "Geocoding customer address failed"),
            }
        }
        warn!(
            booking_id = booking.id,
            source = "fallback",
            latitude = self.fallback.latitude,
            longitude = self.fallback.longitude,
            "Customer coordinate unknown, using fallback"
        );
        self.fallback
    }

    async fn view(&self, location: WorkerLocation, booking: &Booking) -> Result<LocationView, CoreError> {
        let worker_name = self
            .ctx
            .repo
            .get_user(location.worker_id)
            .await?
            .map(|u| u.name);
        let customer_name = self.ctx.repo.get_user(booking.user_id).await?.map(|u| u.name);
        Ok(LocationView {
            worker_id: location.worker_id,
            assignment_id: location.assignment_id,
            booking_id: location.booking_id,
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy: location.accuracy,
            status: location.status,
            last_updated: location.last_updated,
            has_arrived: location.has_arrived(),
            worker_name,
            customer_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::test_support::{confirmed_booking, harness, Harness};

    /// An in-progress job for the harness worker; the customer has no
    /// address coordinates, so the fallback (26.7271, 88.3953) applies.
    async fn job_in_progress(h: &Harness) -> WorkerAssignment {
        let booking = confirmed_booking(h, "14:00").await;
        let core = &h.scheduling.assignments;
        let assignment = core
            .assign(Actor::admin(h.admin.id), booking.id, None, None)
            .await
            .unwrap();
        core.accept(h.worker.id, assignment.id, None).await.unwrap();
        core.start(h.worker.id, assignment.id, None).await.unwrap()
    }

    #[test]
    fn test_event_wire_shape() {
        let event = TrackingEvent::TrackingStopped(TrackingStopped {
            assignment_id: 7,
            worker_id: 3,
            status: TrackingStatus::Stopped,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "tracking_stopped",
                "data": {"assignment_id": 7, "worker_id": 3, "status": "stopped"}
            })
        );
    }

    #[tokio::test]
    async fn test_start_requires_in_progress_assignment() {
        let h = harness().await;
        let booking = confirmed_booking(&h, "14:00").await;
        let assignment = h
            .scheduling
            .assignments
            .assign(Actor::admin(h.admin.id), booking.id, None, None)
            .await
            .unwrap();

        let err = h
            .scheduling
            .tracker
            .start(h.worker.id, assignment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_update_within_radius_flips_to_arrived_and_broadcasts() {
        let h = harness().await;
        let assignment = job_in_progress(&h).await;
        let tracker = &h.scheduling.tracker;
        let mut rx = tracker.subscribe(assignment.booking_id);

        tracker.start(h.worker.id, assignment.id).await.unwrap();
        let far = tracker
            .update(h.worker.id, assignment.id, 26.70, 88.40, Some(12.0))
            .await
            .unwrap();
        assert_eq!(far.status, TrackingStatus::Tracking);
        assert!(!far.has_arrived);

        let near = tracker
            .update(h.worker.id, assignment.id, 26.7272, 88.3954, Some(5.0))
            .await
            .unwrap();
        assert_eq!(near.status, TrackingStatus::Arrived);
        assert!(near.has_arrived);
        assert_eq!(near.worker_name.as_deref(), Some("Ravi"));
        assert_eq!(near.customer_name.as_deref(), Some("Asha"));

        rx.changed().await.unwrap();
        let event = rx.borrow_and_update().clone();
        match event {
            Some(TrackingEvent::WorkerLocation(view)) => assert!(view.has_arrived),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_validates_coordinates_and_owner() {
        let h = harness().await;
        let assignment = job_in_progress(&h).await;
        let tracker = &h.scheduling.tracker;

        let err = tracker
            .update(h.worker.id, assignment.id, 91.0, 0.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));

        let err = tracker
            .update(h.customer.id, assignment.id, 26.0, 88.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));

        // Update without start opens the row.
        let view = tracker
            .update(h.worker.id, assignment.id, 26.0, 88.0, None)
            .await
            .unwrap();
        assert_eq!(view.status, TrackingStatus::Tracking);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness().await;
        let assignment = job_in_progress(&h).await;
        let tracker = &h.scheduling.tracker;
        tracker.start(h.worker.id, assignment.id).await.unwrap();

        tracker.stop(h.worker.id, assignment.id).await.unwrap();
        let stopped = tracker.stop(h.worker.id, assignment.id).await.unwrap();
        assert_eq!(stopped.status, TrackingStatus::Stopped);
        assert!(h.repo.active_location(assignment.id).await.unwrap().is_none());

        let latest = tracker
            .get(Actor::customer(h.customer.id), assignment.id)
            .await
            .unwrap();
        assert_eq!(latest.status, TrackingStatus::Stopped);
        assert!(!latest.has_arrived);
    }

    #[tokio::test]
    async fn test_update_after_stop_is_refused_until_restart() {
        let h = harness().await;
        let assignment = job_in_progress(&h).await;
        let tracker = &h.scheduling.tracker;
        tracker.start(h.worker.id, assignment.id).await.unwrap();
        tracker.stop(h.worker.id, assignment.id).await.unwrap();

        let err = tracker
            .update(h.worker.id, assignment.id, 26.0, 88.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition(_)), "got {:?}", err);
        assert!(h.repo.active_location(assignment.id).await.unwrap().is_none());

        tracker.start(h.worker.id, assignment.id).await.unwrap();
        let view = tracker
            .update(h.worker.id, assignment.id, 26.0, 88.0, None)
            .await
            .unwrap();
        assert_eq!(view.status, TrackingStatus::Tracking);
    }

    #[tokio::test]
    async fn test_cancelling_tracked_job_ends_subscriber_stream() {
        let h = harness().await;
        let assignment = job_in_progress(&h).await;
        let tracker = &h.scheduling.tracker;
        let mut rx = tracker.subscribe(assignment.booking_id);

        tracker
            .update(h.worker.id, assignment.id, 26.70, 88.40, None)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        let _ = rx.borrow_and_update();

        h.scheduling
            .bookings
            .cancel(Actor::customer(h.customer.id), assignment.booking_id, None)
            .await
            .unwrap();

        rx.changed().await.unwrap();
        let event = rx.borrow_and_update().clone();
        match event {
            Some(TrackingEvent::TrackingStopped(stopped)) => {
                assert_eq!(stopped.assignment_id, assignment.id);
                assert_eq!(stopped.status, TrackingStatus::Stopped);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.repo.active_location(assignment.id).await.unwrap().is_none());
        assert_eq!(tracker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_topics_are_pruned() {
        let h = harness().await;
        let tracker = &h.scheduling.tracker;

        let first = tracker.subscribe(1);
        let _second = tracker.subscribe(2);
        assert_eq!(tracker.topic_count(), 2);

        drop(first);
        let _third = tracker.subscribe(3);
        assert_eq!(tracker.topic_count(), 2);
    }
}

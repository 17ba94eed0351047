//! Slot grid computation.
//!
//! Pure over a snapshot: given the working-hours window, the service unit and
//! the obligations already on the day, derive how many workers remain free at
//! each 30-minute start. Obligations come from two sources that are counted
//! uniformly: worker assignments (one unit per distinct worker) and pool
//! reservations (one unit per booking without an active assignment).

use crate::domain::{SlotTime, SLOT_MINUTES};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Bookable window of a day, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: SlotTime,
    pub end: SlotTime,
}

/// Where a capacity unit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObligorKind {
    /// A worker holding a non-terminal assignment.
    Assignment,
    /// A scheduled booking not yet covered by an assignment.
    Reservation,
}

/// Identity of one capacity unit. Two assignments of the same worker that
/// overlap still occupy a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObligorKey {
    Worker(i64),
    Booking(i64),
}

/// One obligation against the worker pool on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Obligation {
    pub kind: ObligorKind,
    /// Worker id for assignments, booking id for reservations.
    pub id: i64,
    pub booking_id: i64,
    /// Scheduled start as booked.
    pub start: SlotTime,
    /// Exclusive end: scheduled end plus buffer.
    pub end: SlotTime,
}

impl Obligation {
    pub fn assignment(worker_id: i64, booking_id: i64, start: SlotTime, end: SlotTime) -> Self {
        Self {
            kind: ObligorKind::Assignment,
            id: worker_id,
            booking_id,
            start,
            end,
        }
    }

    pub fn reservation(booking_id: i64, start: SlotTime, end: SlotTime) -> Self {
        Self {
            kind: ObligorKind::Reservation,
            id: booking_id,
            booking_id,
            start,
            end,
        }
    }

    pub fn key(&self) -> ObligorKey {
        match self.kind {
            ObligorKind::Assignment => ObligorKey::Worker(self.id),
            ObligorKind::Reservation => ObligorKey::Booking(self.id),
        }
    }

    /// Whether the grid position starting at `slot` overlaps this obligation.
    /// The start is snapped down to the grid before comparing.
    pub fn covers(&self, slot: SlotTime) -> bool {
        let start = self.start.snap_down().minutes();
        let slot_start = slot.minutes();
        slot_start < self.end.minutes() && slot_start + SLOT_MINUTES > start
    }
}

/// Inputs that do not depend on the day's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridParams {
    pub hours: WorkingHours,
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
    /// Active worker count, P.
    pub pool_size: u32,
}

impl GridParams {
    /// Minutes one booking blocks: duration plus buffer.
    pub fn unit_minutes(&self) -> u32 {
        self.duration_minutes + self.buffer_minutes
    }

    /// Start times `open, open+30, ...` up to and including `close - unit`.
    pub fn candidate_starts(&self) -> Vec<SlotTime> {
        let open = self.hours.start.minutes();
        let close = self.hours.end.minutes();
        let Some(latest) = close.checked_sub(self.unit_minutes()) else {
            return Vec::new();
        };
        let latest = latest.min(close);

        (open..=latest)
            .step_by(SLOT_MINUTES as usize)
            .filter_map(SlotTime::from_minutes)
            .collect()
    }

    /// Whether `start` is a legal booking start under these parameters.
    pub fn admits_start(&self, start: SlotTime) -> bool {
        start >= self.hours.start
            && start
                .checked_add(self.unit_minutes())
                .map_or(false, |end| end <= self.hours.end)
    }
}

/// One row of the availability grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: SlotTime,
    pub available_workers: u32,
    pub is_available: bool,
}

/// Availability for a service on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotGrid {
    pub working_hours: WorkingHours,
    pub service_duration: u32,
    pub buffer_time: u32,
    pub available_slots: Vec<Slot>,
}

impl SlotGrid {
    pub fn slot(&self, time: SlotTime) -> Option<&Slot> {
        self.available_slots.iter().find(|s| s.time == time)
    }
}

/// Insufficient capacity somewhere in a requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityShortfall {
    pub slot: SlotTime,
    pub busy_units: u32,
    pub pool_size: u32,
}

/// Grid positions overlapping `[snap(start), start + unit)`.
pub fn window_slots(start: SlotTime, unit_minutes: u32) -> Vec<SlotTime> {
    let first = start.snap_down().minutes();
    let end = start.minutes() + unit_minutes;
    (first..end)
        .step_by(SLOT_MINUTES as usize)
        .filter_map(SlotTime::from_minutes)
        .collect()
}

/// Map each covered grid position to the distinct units obliged to it.
pub fn busy_map(obligations: &[Obligation]) -> BTreeMap<SlotTime, HashSet<ObligorKey>> {
    let mut busy: BTreeMap<SlotTime, HashSet<ObligorKey>> = BTreeMap::new();
    for obligation in obligations {
        let first = obligation.start.snap_down().minutes();
        let end = obligation.end.minutes();
        for minute in (first..end).step_by(SLOT_MINUTES as usize) {
            if let Some(slot) = SlotTime::from_minutes(minute) {
                busy.entry(slot).or_default().insert(obligation.key());
            }
        }
    }
    busy
}

/// Distinct obligor units at a single grid position.
pub fn obligor_units(obligations: &[Obligation], slot: SlotTime) -> u32 {
    let slot = slot.snap_down();
    obligations
        .iter()
        .filter(|o| o.covers(slot))
        .map(Obligation::key)
        .collect::<HashSet<_>>()
        .len() as u32
}

/// Build the availability grid for one service on one day.
///
/// Slots are ordered by time ascending.
pub fn compute_slot_grid(params: &GridParams, obligations: &[Obligation]) -> SlotGrid {
    let busy = busy_map(obligations);

    let available_slots = params
        .candidate_starts()
        .into_iter()
        .map(|time| {
            let used = busy.get(&time).map_or(0, |units| units.len() as u32);
            let available_workers = params.pool_size.saturating_sub(used);
            Slot {
                time,
                available_workers,
                is_available: available_workers > 0,
            }
        })
        .collect();

    SlotGrid {
        working_hours: params.hours,
        service_duration: params.duration_minutes,
        buffer_time: params.buffer_minutes,
        available_slots,
    }
}

/// Verify one more unit fits at every grid position of a booking window.
///
/// Checking the whole window (not only the start) keeps the per-slot count
/// within the pool for every position the new booking would occupy.
pub fn check_capacity(
    obligations: &[Obligation],
    pool_size: u32,
    start: SlotTime,
    unit_minutes: u32,
) -> Result<(), CapacityShortfall> {
    for slot in window_slots(start, unit_minutes) {
        let busy_units = obligor_units(obligations, slot);
        if busy_units >= pool_size {
            return Err(CapacityShortfall {
                slot,
                busy_units,
                pool_size,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> SlotTime {
        s.parse().unwrap()
    }

    fn params(pool_size: u32) -> GridParams {
        GridParams {
            hours: WorkingHours {
                start: t("09:00"),
                end: t("22:00"),
            },
            duration_minutes: 120,
            buffer_minutes: 30,
            pool_size,
        }
    }

    #[test]
    fn test_candidate_starts_respect_unit() {
        let starts = params(1).candidate_starts();
        assert_eq!(starts.first(), Some(&t("09:00")));
        // 22:00 - 150 minutes = 19:30
        assert_eq!(starts.last(), Some(&t("19:30")));
        assert_eq!(starts.len(), 22);
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unit_longer_than_day_yields_no_slots() {
        let mut p = params(3);
        p.duration_minutes = 14 * 60;
        assert!(p.candidate_starts().is_empty());
        assert!(compute_slot_grid(&p, &[]).available_slots.is_empty());
    }

    #[test]
    fn test_empty_day_is_fully_available() {
        let grid = compute_slot_grid(&params(3), &[]);
        assert!(grid
            .available_slots
            .iter()
            .all(|s| s.available_workers == 3 && s.is_available));
        assert_eq!(grid.service_duration, 120);
        assert_eq!(grid.buffer_time, 30);
    }

    #[test]
    fn test_assignment_blocks_its_window() {
        let obligations = [Obligation::assignment(11, 100, t("14:00"), t("16:30"))];
        let grid = compute_slot_grid(&params(1), &obligations);

        assert!(grid.slot(t("13:30")).unwrap().is_available);
        for busy in ["14:00", "14:30", "15:00", "15:30", "16:00"] {
            let slot = grid.slot(t(busy)).unwrap();
            assert_eq!(slot.available_workers, 0, "{}", busy);
            assert!(!slot.is_available);
        }
        assert!(grid.slot(t("16:30")).unwrap().is_available);
    }

    #[test]
    fn test_unaligned_start_snaps_down() {
        let obligations = [Obligation::reservation(5, t("10:15"), t("11:00"))];
        let grid = compute_slot_grid(&params(1), &obligations);
        assert!(!grid.slot(t("10:00")).unwrap().is_available);
        assert!(!grid.slot(t("10:30")).unwrap().is_available);
        assert!(grid.slot(t("11:00")).unwrap().is_available);
    }

    #[test]
    fn test_same_worker_counts_once() {
        let obligations = [
            Obligation::assignment(11, 100, t("10:00"), t("12:00")),
            Obligation::assignment(11, 101, t("11:00"), t("13:00")),
            Obligation::reservation(102, t("11:00"), t("12:00")),
        ];
        assert_eq!(obligor_units(&obligations, t("11:00")), 2);
        let grid = compute_slot_grid(&params(3), &obligations);
        assert_eq!(grid.slot(t("11:00")).unwrap().available_workers, 1);
    }

    #[test]
    fn test_reservation_and_worker_ids_do_not_collide() {
        // Worker 5 and booking 5 are different units.
        let obligations = [
            Obligation::assignment(5, 200, t("09:00"), t("10:00")),
            Obligation::reservation(5, t("09:00"), t("10:00")),
        ];
        assert_eq!(obligor_units(&obligations, t("09:30")), 2);
    }

    #[test]
    fn test_available_never_negative() {
        let obligations: Vec<_> = (0..5)
            .map(|i| Obligation::reservation(i, t("12:00"), t("13:00")))
            .collect();
        let grid = compute_slot_grid(&params(2), &obligations);
        let slot = grid.slot(t("12:00")).unwrap();
        assert_eq!(slot.available_workers, 0);
        assert!(!slot.is_available);
    }

    #[test]
    fn test_check_capacity_covers_whole_window() {
        // One worker, busy only at 15:00-15:30.
        let obligations = [Obligation::reservation(9, t("15:00"), t("15:30"))];
        let shortfall = check_capacity(&obligations, 1, t("14:00"), 150).unwrap_err();
        assert_eq!(shortfall.slot, t("15:00"));
        assert!(check_capacity(&obligations, 1, t("15:30"), 150).is_ok());
        assert!(check_capacity(&obligations, 2, t("14:00"), 150).is_ok());
    }

    #[test]
    fn test_window_slots() {
        let slots = window_slots(t("14:00"), 150);
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[4], t("16:00"));
        assert_eq!(window_slots(t("14:10"), 20), vec![t("14:00")]);
    }

    #[test]
    fn test_admits_start() {
        let p = params(1);
        assert!(p.admits_start(t("09:00")));
        assert!(p.admits_start(t("19:30")));
        assert!(!p.admits_start(t("20:00")));
        assert!(!p.admits_start(t("08:30")));
    }

    #[test]
    fn test_grid_serializes_to_wire_shape() {
        let grid = compute_slot_grid(&params(1), &[]);
        let json = serde_json::to_value(&grid).unwrap();
        assert_eq!(json["working_hours"]["start"], "09:00");
        assert_eq!(json["working_hours"]["end"], "22:00");
        assert_eq!(json["service_duration"], 120);
        assert_eq!(json["buffer_time"], 30);
        assert_eq!(json["available_slots"][0]["time"], "09:00");
        assert_eq!(json["available_slots"][0]["available_workers"], 1);
        assert_eq!(json["available_slots"][0]["is_available"], true);
    }
}

//! Pure computation for scheduling: the slot grid and great-circle distance.

pub mod availability;
pub mod geo;

pub use availability::{
    check_capacity, compute_slot_grid, obligor_units, CapacityShortfall, GridParams, Obligation,
    ObligorKind, Slot, SlotGrid, WorkingHours,
};
pub use geo::{haversine_meters, within_arrival_radius};

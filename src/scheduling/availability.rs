//! Slot-grid queries over the live store.

use super::CoreContext;
use crate::db::CapacityClaim;
use crate::domain::{parse_date, Service, SlotTime};
use crate::engine::{compute_slot_grid, GridParams, SlotGrid, WorkingHours};
use crate::error::CoreError;
use chrono::NaiveDate;

/// Everything about a service's timing that does not depend on the day.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTiming {
    pub service: Service,
    pub hours: WorkingHours,
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
}

impl ServiceTiming {
    pub fn unit_minutes(&self) -> u32 {
        self.duration_minutes + self.buffer_minutes
    }

    pub fn params(&self, pool_size: u32) -> GridParams {
        GridParams {
            hours: self.hours,
            duration_minutes: self.duration_minutes,
            buffer_minutes: self.buffer_minutes,
            pool_size,
        }
    }

    /// Service end for a start at `start` (buffer excluded).
    pub fn end_time(&self, start: SlotTime) -> Result<SlotTime, CoreError> {
        start.checked_add(self.duration_minutes).ok_or_else(|| {
            CoreError::InvalidInput(format!("{} + {} min runs past midnight", start, self.duration_minutes))
        })
    }

    /// Reject starts outside the bookable part of the day.
    pub fn validate_start(&self, start: SlotTime) -> Result<(), CoreError> {
        if self.params(0).admits_start(start) {
            return Ok(());
        }
        Err(CoreError::InvalidInput(format!(
            "{} is outside bookable hours {}-{} for a {} min unit",
            start,
            self.hours.start,
            self.hours.end,
            self.unit_minutes()
        )))
    }

    pub fn claim(&self, date: NaiveDate, start: SlotTime) -> CapacityClaim {
        CapacityClaim {
            date,
            start,
            unit_minutes: self.unit_minutes(),
        }
    }
}

#[derive(Clone)]
pub struct AvailabilityService {
    ctx: CoreContext,
}

impl AvailabilityService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Resolve working hours, duration and buffer for `service_id`.
    ///
    /// # Errors
    /// `NotFound` for an unknown service.
    pub async fn timing(&self, service_id: i64) -> Result<ServiceTiming, CoreError> {
        let service = self
            .ctx
            .repo
            .get_service(service_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("service {}", service_id)))?;
        let config = self.ctx.repo.get_service_config(service_id).await?;
        let hours = self.ctx.settings.working_hours().await?;
        let platform_buffer = self.ctx.settings.buffer_minutes().await?;

        Ok(ServiceTiming {
            duration_minutes: service.resolve_duration(config.as_ref()),
            buffer_minutes: Service::resolve_buffer(config.as_ref(), platform_buffer),
            hours,
            service,
        })
    }

    /// Slot grid for a `YYYY-MM-DD` date string.
    pub async fn slot_grid(&self, service_id: i64, date: &str) -> Result<SlotGrid, CoreError> {
        let date = parse_date(date)?;
        let timing = self.timing(service_id).await?;
        self.grid_for(&timing, date).await
    }

    /// Slot grid from a consistent read of the day's obligations.
    pub async fn grid_for(
        &self,
        timing: &ServiceTiming,
        date: NaiveDate,
    ) -> Result<SlotGrid, CoreError> {
        let now = self.ctx.clock.now();
        let pool_size = self.ctx.repo.count_active_workers().await?;
        let obligations = self.ctx.repo.load_obligations(date, now).await?;
        Ok(compute_slot_grid(&timing.params(pool_size), &obligations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::test_support::{harness, service_with_duration};

    #[tokio::test]
    async fn test_grid_uses_fallback_duration_and_default_hours() {
        let h = harness().await;
        let service = service_with_duration(&h, None).await;
        let grid = h
            .scheduling
            .availability
            .slot_grid(service.id, "2025-03-15")
            .await
            .unwrap();

        assert_eq!(grid.service_duration, 120);
        assert_eq!(grid.buffer_time, 30);
        assert_eq!(grid.available_slots.first().unwrap().time.to_string(), "09:00");
        // 22:00 - 150 min
        assert_eq!(grid.available_slots.last().unwrap().time.to_string(), "19:30");
        assert!(grid.available_slots.iter().all(|s| s.available_workers == 1));
    }

    #[tokio::test]
    async fn test_bad_date_and_unknown_service() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let err = h
            .scheduling
            .availability
            .slot_grid(service.id, "15/03/2025")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));

        let err = h
            .scheduling
            .availability
            .slot_grid(9_999, "2025-03-15")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validate_start_respects_unit() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let timing = h.scheduling.availability.timing(service.id).await.unwrap();
        assert!(timing.validate_start("20:30".parse().unwrap()).is_ok());
        assert!(timing.validate_start("21:00".parse().unwrap()).is_err());
        assert!(timing.validate_start("08:30".parse().unwrap()).is_err());
    }
}

use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::Snapshot;

use super::free_time::free_gaps;
use super::guard::{now_ms, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Sorted by name.
    pub async fn list_facilities(&self) -> Vec<Facility> {
        let shared: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for fs in shared {
            out.push(fs.read().await.info());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn facility(&self, id: Ulid) -> Option<Facility> {
        let fs = self.get_facility(&id)?;
        let info = fs.read().await.info();
        Some(info)
    }

    /// Sorted by name.
    pub fn list_teams(&self) -> Vec<Team> {
        let mut teams: Vec<Team> = self.teams.iter().map(|t| t.clone()).collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        teams
    }

    pub fn team(&self, id: Ulid) -> Option<Team> {
        self.teams.get(&id).map(|t| t.clone())
    }

    /// In creation order.
    pub fn list_requests(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self.requests.iter().map(|r| r.clone()).collect();
        requests.sort_by_key(|r| r.seq);
        requests
    }

    pub fn request(&self, id: Ulid) -> Option<Request> {
        self.requests.get(&id).map(|r| r.clone())
    }

    /// Pending requests whose scheduling period meets the horizon, in
    /// creation order.
    pub fn pending_requests(&self, horizon: Option<Span>) -> Vec<Request> {
        let mut pending: Vec<Request> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| horizon.is_none_or(|h| h.overlaps(&r.schedule)))
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.seq);
        pending
    }

    pub async fn booking(&self, id: Ulid) -> Option<Booking> {
        let facility_id = self.facility_of_booking(&id)?;
        let fs = self.get_facility(&facility_id)?;
        let guard = fs.read().await;
        guard.booking(id).cloned()
    }

    /// Bookings of any status, optionally narrowed to one facility and to
    /// those overlapping `window`. Sorted by start.
    pub async fn list_bookings(
        &self,
        facility: Option<Ulid>,
        window: Option<Span>,
    ) -> Result<Vec<Booking>, EngineError> {
        if let Some(w) = &window {
            validate_window(w, MAX_QUERY_WINDOW_MS)?;
        }
        let shared = match facility {
            Some(id) => vec![self.get_facility(&id).ok_or(EngineError::NotFound(id))?],
            None => self.facilities.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for fs in shared {
            let guard = fs.read().await;
            match &window {
                Some(w) => out.extend(guard.overlapping(w).cloned()),
                None => out.extend(guard.bookings.iter().cloned()),
            }
        }
        out.sort_by_key(|b| (b.span.start, b.facility_id, b.id));
        Ok(out)
    }

    /// Non-cancelled bookings on one facility overlapping `window`.
    pub async fn bookings_overlapping(
        &self,
        facility: Ulid,
        window: Span,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_window(&window, MAX_QUERY_WINDOW_MS)?;
        let fs = self
            .get_facility(&facility)
            .ok_or(EngineError::NotFound(facility))?;
        let guard = fs.read().await;
        Ok(guard.occupying(&window).cloned().collect())
    }

    /// Free gaps of a facility inside `window`, optionally only those at
    /// least `min_duration` long.
    pub async fn availability(
        &self,
        facility: Ulid,
        window: Span,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        validate_window(&window, MAX_QUERY_WINDOW_MS)?;
        let fs = self
            .get_facility(&facility)
            .ok_or(EngineError::NotFound(facility))?;
        let guard = fs.read().await;
        let mut free = free_gaps(&guard, &window);
        if let Some(min) = min_duration {
            free.retain(|span| span.duration_ms() >= min);
        }
        Ok(free)
    }

    /// Consistent-per-facility copy of what the scheduler needs. With a
    /// horizon, only bookings and pending requests meeting it are included.
    pub async fn snapshot(&self, horizon: Option<Span>) -> Snapshot {
        let shared: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        let mut facilities = Vec::with_capacity(shared.len());
        let mut bookings = Vec::new();
        for fs in shared {
            let guard = fs.read().await;
            facilities.push(guard.info());
            match &horizon {
                Some(h) => bookings.extend(guard.occupying(h).cloned()),
                None => bookings.extend(guard.bookings.iter().filter(|b| b.occupies()).cloned()),
            }
        }
        let team_flexibility: HashMap<Ulid, bool> =
            self.teams.iter().map(|t| (t.id, t.is_flexible)).collect();
        Snapshot {
            taken_at: now_ms(),
            facilities,
            bookings,
            requests: self.pending_requests(horizon),
            team_flexibility,
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::{RequestResolution, ScheduleDecision, SolveMode};

use super::guard::{check_no_conflict, conflict_with, validate_name, validate_span, validate_title};
use super::{Engine, EngineError, WalCommand, apply_to_facility, name_key};

/// A booking as submitted. `end` may be left out when the kind has a
/// conventional duration.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub id: Ulid,
    pub title: String,
    pub facility_id: Ulid,
    pub start: Ms,
    pub end: Option<Ms>,
    pub is_fixed: bool,
    pub kind: EventKind,
    pub status: BookingStatus,
    pub team_id: Option<Ulid>,
    pub request_id: Option<Ulid>,
}

impl BookingDraft {
    pub fn new(facility_id: Ulid, title: impl Into<String>, kind: EventKind, start: Ms) -> Self {
        Self {
            id: Ulid::new(),
            title: title.into(),
            facility_id,
            start,
            end: None,
            is_fixed: false,
            kind,
            status: BookingStatus::Draft,
            team_id: None,
            request_id: None,
        }
    }

    pub fn ending(mut self, end: Ms) -> Self {
        self.end = Some(end);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.is_fixed = true;
        self
    }

    fn resolve(self) -> Result<Booking, EngineError> {
        let end = match self.end {
            Some(end) => end,
            None => {
                let minutes = self.kind.default_duration_minutes().ok_or_else(|| {
                    EngineError::invalid(format!("end is required for {} events", self.kind))
                })?;
                self.start + minutes * MINUTE_MS
            }
        };
        validate_title(&self.title)?;
        let span = Span::new(self.start, end);
        validate_span(&span)?;
        Ok(Booking {
            id: self.id,
            title: self.title,
            facility_id: self.facility_id,
            span,
            is_fixed: self.is_fixed,
            kind: self.kind,
            status: self.status,
            team_id: self.team_id,
            request_id: self.request_id,
        })
    }
}

impl From<&Booking> for BookingDraft {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            title: b.title.clone(),
            facility_id: b.facility_id,
            start: b.span.start,
            end: Some(b.span.end),
            is_fixed: b.is_fixed,
            kind: b.kind,
            status: b.status,
            team_id: b.team_id,
            request_id: b.request_id,
        }
    }
}

/// A request as submitted. `duration_minutes` defaults from the kind.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub id: Ulid,
    pub team_id: Ulid,
    pub kind: EventKind,
    pub duration_minutes: Option<i64>,
    pub recurrence: Recurrence,
    pub preferred_facility: Option<Ulid>,
    pub preferred_days: DaySet,
    pub preferred_window: TimeWindow,
    pub priority: Priority,
    pub schedule: Span,
}

impl RequestDraft {
    pub fn new(team_id: Ulid, kind: EventKind, schedule: Span) -> Self {
        Self {
            id: Ulid::new(),
            team_id,
            kind,
            duration_minutes: None,
            recurrence: Recurrence::OneTime,
            preferred_facility: None,
            preferred_days: DaySet::EMPTY,
            preferred_window: TimeWindow::whole_day(),
            priority: Priority::Medium,
            schedule,
        }
    }
}

impl From<&Request> for RequestDraft {
    fn from(r: &Request) -> Self {
        Self {
            id: r.id,
            team_id: r.team_id,
            kind: r.kind,
            duration_minutes: Some(r.duration_minutes),
            recurrence: r.recurrence,
            preferred_facility: r.preferred_facility,
            preferred_days: r.preferred_days,
            preferred_window: r.preferred_window,
            priority: r.priority,
            schedule: r.schedule,
        }
    }
}

/// What `apply_decision` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub scheduled: usize,
    pub rejected: usize,
    /// Requests left pending: stale, out of budget, or overtaken by a commit.
    pub skipped: Vec<Ulid>,
    pub bookings: Vec<Ulid>,
    pub displaced: Vec<Ulid>,
}

impl Engine {
    // ── Facilities ───────────────────────────────────────────────

    pub async fn create_facility(
        &self,
        id: Ulid,
        name: String,
        kind: FacilityKind,
    ) -> Result<Facility, EngineError> {
        validate_name(&name, "facility")?;
        let _catalog = self.catalog.lock().await;
        if self.facilities.len() >= MAX_FACILITIES {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        if self.facilities.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.facility_names.contains_key(&name_key(&name)) {
            return Err(EngineError::NameTaken(name));
        }
        let event = Event::FacilityCreated {
            id,
            name: name.clone(),
            kind,
        };
        self.persist_catalog(&event).await?;
        info!(%id, %name, %kind, "facility created");
        Ok(Facility { id, name, kind })
    }

    pub async fn rename_facility(&self, id: Ulid, name: String) -> Result<Facility, EngineError> {
        validate_name(&name, "facility")?;
        let _catalog = self.catalog.lock().await;
        if let Some(owner) = self.facility_id_by_name(&name)
            && owner != id
        {
            return Err(EngineError::NameTaken(name));
        }
        let mut guard = self.write_facility(id).await?;
        let event = Event::FacilityRenamed {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.facility_names.remove(&name_key(&guard.name));
        self.facility_names.insert(name_key(&name), id);
        apply_to_facility(&mut guard, &event, &self.booking_to_facility);
        Ok(guard.info())
    }

    /// Refused while any booking, cancelled or not, is on the facility.
    pub async fn delete_facility(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let guard = self.write_facility(id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::InUse(id));
        }
        self.persist_catalog(&Event::FacilityDeleted { id }).await?;
        info!(%id, "facility deleted");
        Ok(())
    }

    // ── Teams ────────────────────────────────────────────────────

    /// Insert a new team. Fails if the id is taken.
    pub async fn create_team(&self, team: Team) -> Result<Team, EngineError> {
        self.store_team(team, true).await
    }

    /// Insert or replace a team.
    pub async fn save_team(&self, team: Team) -> Result<Team, EngineError> {
        self.store_team(team, false).await
    }

    async fn store_team(&self, team: Team, create_only: bool) -> Result<Team, EngineError> {
        validate_name(&team.name, "team")?;
        if let Some(age) = &team.age_group
            && age.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("age group too long"));
        }
        if let Some(t) = team.usual_time
            && !(0..MINUTES_PER_DAY).contains(&t)
        {
            return Err(EngineError::invalid("usual_time must be a minute of the day"));
        }
        let _catalog = self.catalog.lock().await;
        let exists = self.teams.contains_key(&team.id);
        if create_only && exists {
            return Err(EngineError::AlreadyExists(team.id));
        }
        if !exists && self.teams.len() >= MAX_TEAMS {
            return Err(EngineError::LimitExceeded("too many teams"));
        }
        if let Some(facility) = team.usual_facility
            && !self.facilities.contains_key(&facility)
        {
            return Err(EngineError::NotFound(facility));
        }
        let key = name_key(&team.name);
        if self
            .teams
            .iter()
            .any(|t| t.id != team.id && name_key(&t.name) == key)
        {
            return Err(EngineError::NameTaken(team.name));
        }
        self.persist_catalog(&Event::TeamSaved { team: team.clone() })
            .await?;
        Ok(team)
    }

    /// Refused while requests reference the team; its bookings keep their
    /// slots but lose the team link.
    pub async fn delete_team(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        if !self.teams.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.requests.iter().any(|r| r.team_id == id) {
            return Err(EngineError::InUse(id));
        }
        let event = Event::TeamDeleted { id };
        // Unregister first so no new booking can link to the team.
        self.persist_catalog(&event).await?;
        let facilities: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        for fs in facilities {
            let mut guard = fs.write().await;
            apply_to_facility(&mut guard, &event, &self.booking_to_facility);
        }
        info!(%id, "team deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// Insert or update a booking through the conflict guard. An update
    /// may move the booking to another facility.
    pub async fn commit_booking(&self, draft: BookingDraft) -> Result<Booking, EngineError> {
        let booking = draft.resolve()?;
        if let Some(team) = booking.team_id
            && !self.teams.contains_key(&team)
        {
            return Err(EngineError::NotFound(team));
        }

        let result = loop {
            let previous = self.facility_of_booking(&booking.id);
            if let Some(from) = previous
                && from != booking.facility_id
            {
                match self.move_booking(from, booking.clone()).await {
                    // Moved by someone else while we waited; look again.
                    Err(EngineError::NotFound(id)) if id == booking.id => continue,
                    other => break other,
                }
            }
            let mut guard = self.write_facility(booking.facility_id).await?;
            if previous.is_some() && guard.booking(booking.id).is_none() {
                continue;
            }
            if previous.is_none() && guard.bookings.len() >= MAX_BOOKINGS_PER_FACILITY {
                break Err(EngineError::LimitExceeded("too many bookings on facility"));
            }
            if booking.occupies()
                && let Err(e) = check_no_conflict(&guard, &booking.span, Some(booking.id))
            {
                break Err(e);
            }
            let event = Event::BookingCommitted {
                booking: booking.clone(),
            };
            break self
                .persist_and_apply(&mut guard, &event)
                .await
                .map(|()| booking.clone());
        };
        self.record_commit(&result);
        result
    }

    async fn move_booking(&self, from: Ulid, booking: Booking) -> Result<Booking, EngineError> {
        let to = booking.facility_id;
        // Sorted lock order keeps concurrent moves deadlock-free.
        let (low, high) = if from < to { (from, to) } else { (to, from) };
        let mut low_guard = self.write_facility(low).await?;
        let mut high_guard = self.write_facility(high).await?;
        let (old, new) = if from < to {
            (&mut low_guard, &mut high_guard)
        } else {
            (&mut high_guard, &mut low_guard)
        };

        if old.booking(booking.id).is_none() {
            return Err(EngineError::NotFound(booking.id));
        }
        if new.bookings.len() >= MAX_BOOKINGS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many bookings on facility"));
        }
        if booking.occupies() {
            check_no_conflict(new, &booking.span, Some(booking.id))?;
        }
        let event = Event::BookingCommitted {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        old.remove_booking(booking.id);
        apply_to_facility(new, &event, &self.booking_to_facility);
        debug!(booking = %booking.id, %from, %to, "booking moved");
        Ok(booking)
    }

    fn record_commit(&self, result: &Result<Booking, EngineError>) {
        match result {
            Ok(b) => {
                metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
                debug!(booking = %b.id, facility = %b.facility_id, span = %b.span, "booking committed");
            }
            Err(e) => self.note_rejection(e),
        }
    }

    fn note_rejection(&self, e: &EngineError) {
        if let EngineError::Conflict { .. } = e {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            info!("commit rejected: {e}");
        }
    }

    /// Commit several new bookings all-or-nothing. Overlaps inside the
    /// batch are conflicts too.
    pub async fn batch_commit(&self, drafts: Vec<BookingDraft>) -> Result<Vec<Booking>, EngineError> {
        self.commit_new(drafts, &[]).await.map(|(bookings, _)| bookings)
    }

    /// Insert one new booking. Fails with `AlreadyExists` if the id is taken,
    /// even when a concurrent insert of the same id is still in flight.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, EngineError> {
        let mut bookings = self.batch_commit(vec![draft]).await?;
        bookings
            .pop()
            .ok_or_else(|| EngineError::Internal("single-booking batch came back empty".into()))
    }

    /// Insert new bookings all-or-nothing. Movable bookings listed in
    /// `displace` give way where a new booking needs their slot: they are
    /// cancelled in the same critical section. Returns the committed
    /// bookings and the ids actually cancelled.
    async fn commit_new(
        &self,
        drafts: Vec<BookingDraft>,
        displace: &[Ulid],
    ) -> Result<(Vec<Booking>, Vec<Ulid>), EngineError> {
        if drafts.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let bookings = drafts
            .into_iter()
            .map(BookingDraft::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        for b in &bookings {
            if let Some(team) = b.team_id
                && !self.teams.contains_key(&team)
            {
                return Err(EngineError::NotFound(team));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut facility_ids: Vec<Ulid> = bookings.iter().map(|b| b.facility_id).collect();
        facility_ids.sort();
        facility_ids.dedup();
        let mut guards = Vec::with_capacity(facility_ids.len());
        let mut slot = HashMap::new();
        for fid in &facility_ids {
            let guard = self.write_facility(*fid).await?;
            slot.insert(*fid, guards.len());
            guards.push(guard);
        }

        // Claim the ids in the index so a concurrent insert of the same id,
        // even on another facility, sees it taken.
        let mut reserved = Vec::with_capacity(bookings.len());
        for b in &bookings {
            let claimed = match self.booking_to_facility.entry(b.id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(vacant) => {
                    vacant.insert(b.facility_id);
                    true
                }
            };
            if !claimed {
                self.unreserve(&reserved);
                return Err(EngineError::AlreadyExists(b.id));
            }
            reserved.push(b.id);
        }

        // Phase 1: validate against current state and within the batch.
        let mut by_facility: HashMap<Ulid, Vec<&Booking>> = HashMap::new();
        for b in &bookings {
            by_facility.entry(b.facility_id).or_default().push(b);
        }
        let mut cancel: Vec<(Ulid, Ulid)> = Vec::new();
        let mut outcome: Result<(), EngineError> = Ok(());
        'check: for (fid, batch) in &by_facility {
            let guard = &guards[slot[fid]];
            if guard.bookings.len() + batch.len() > MAX_BOOKINGS_PER_FACILITY {
                outcome = Err(EngineError::LimitExceeded("too many bookings on facility"));
                break;
            }
            for (i, b) in batch.iter().enumerate() {
                if !b.occupies() {
                    continue;
                }
                for existing in guard.occupying(&b.span) {
                    if existing.is_fixed || !displace.contains(&existing.id) {
                        outcome = Err(conflict_with(guard, existing));
                        break 'check;
                    }
                    if !cancel.iter().any(|(_, id)| *id == existing.id) {
                        cancel.push((*fid, existing.id));
                    }
                }
                if let Some(other) = batch[i + 1..]
                    .iter()
                    .find(|o| o.occupies() && o.span.overlaps(&b.span))
                {
                    outcome = Err(conflict_with(guard, other));
                    break 'check;
                }
            }
        }
        if let Err(e) = outcome {
            self.unreserve(&reserved);
            self.note_rejection(&e);
            return Err(e);
        }

        // Phase 2: all validated, commit.
        for (facility_id, id) in &cancel {
            let event = Event::BookingStatusChanged {
                id: *id,
                facility_id: *facility_id,
                status: BookingStatus::Cancelled,
            };
            if let Err(e) = self.wal_append(&event).await {
                self.unreserve(&reserved);
                return Err(e);
            }
            apply_to_facility(&mut guards[slot[facility_id]], &event, &self.booking_to_facility);
            info!(booking = %id, "booking displaced");
        }
        for (n, booking) in bookings.iter().enumerate() {
            let event = Event::BookingCommitted {
                booking: booking.clone(),
            };
            if let Err(e) = self.wal_append(&event).await {
                self.unreserve(&reserved[n..]);
                return Err(e);
            }
            apply_to_facility(
                &mut guards[slot[&booking.facility_id]],
                &event,
                &self.booking_to_facility,
            );
            metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        }
        debug!(count = bookings.len(), displaced = cancel.len(), "batch committed");
        Ok((bookings, cancel.into_iter().map(|(_, id)| id).collect()))
    }

    fn unreserve(&self, ids: &[Ulid]) {
        for id in ids {
            self.booking_to_facility.remove(id);
        }
    }

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let facility_id = self.facility_of_booking(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.write_facility(facility_id).await?;
        let mut booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        // Leaving `cancelled` re-occupies the slot, so it is checked like a commit.
        if status.occupies() && !booking.occupies() {
            let checked = check_no_conflict(&guard, &booking.span, Some(id));
            if let Err(e) = checked {
                self.note_rejection(&e);
                return Err(e);
            }
        }
        let event = Event::BookingStatusChanged {
            id,
            facility_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        booking.status = status;
        debug!(booking = %id, %status, "booking status changed");
        Ok(booking)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let facility_id = self.facility_of_booking(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.write_facility(facility_id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::BookingDeleted { id, facility_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    // ── Requests ─────────────────────────────────────────────────

    fn validate_request(&self, draft: &RequestDraft) -> Result<i64, EngineError> {
        if !self.teams.contains_key(&draft.team_id) {
            return Err(EngineError::NotFound(draft.team_id));
        }
        if let Some(facility) = draft.preferred_facility
            && !self.facilities.contains_key(&facility)
        {
            return Err(EngineError::NotFound(facility));
        }
        let duration = draft
            .duration_minutes
            .or_else(|| draft.kind.default_duration_minutes())
            .ok_or_else(|| {
                EngineError::invalid(format!("duration is required for {} requests", draft.kind))
            })?;
        if duration <= 0 {
            return Err(EngineError::invalid("duration must be positive"));
        }
        if duration > MINUTES_PER_DAY {
            return Err(EngineError::invalid("duration must fit in a day"));
        }
        if !draft.preferred_window.is_valid() {
            return Err(EngineError::invalid(
                "preferred window must satisfy 0 <= earliest_start < latest_end <= 1440",
            ));
        }
        if draft.schedule.is_empty() {
            return Err(EngineError::invalid("schedule_until must be after schedule_from"));
        }
        if draft.schedule.start < MIN_VALID_TIMESTAMP_MS || draft.schedule.end > MAX_VALID_TIMESTAMP_MS
        {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if draft.schedule.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("scheduling period too wide"));
        }
        Ok(duration)
    }

    pub async fn submit_request(&self, draft: RequestDraft) -> Result<Request, EngineError> {
        let _catalog = self.catalog.lock().await;
        let duration = self.validate_request(&draft)?;
        if self.requests.contains_key(&draft.id) {
            return Err(EngineError::AlreadyExists(draft.id));
        }
        let pending = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .count();
        if pending >= MAX_PENDING_REQUESTS {
            return Err(EngineError::LimitExceeded("too many pending requests"));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id: draft.id,
            seq,
            revision: seq,
            team_id: draft.team_id,
            kind: draft.kind,
            duration_minutes: duration,
            recurrence: draft.recurrence,
            preferred_facility: draft.preferred_facility,
            preferred_days: draft.preferred_days,
            preferred_window: draft.preferred_window,
            priority: draft.priority,
            schedule: draft.schedule,
            status: RequestStatus::Pending,
            booking_id: None,
            rejection_reason: None,
        };
        self.persist_catalog(&Event::RequestSaved {
            request: request.clone(),
        })
        .await?;
        debug!(request = %request.id, team = %request.team_id, "request submitted");
        Ok(request)
    }

    /// Replace a request's content. It goes back to pending and keeps its
    /// creation order; any booking it produced stays in place.
    pub async fn update_request(&self, draft: RequestDraft) -> Result<Request, EngineError> {
        let _catalog = self.catalog.lock().await;
        let duration = self.validate_request(&draft)?;
        let seq = self
            .requests
            .get(&draft.id)
            .map(|r| r.seq)
            .ok_or(EngineError::NotFound(draft.id))?;
        let request = Request {
            id: draft.id,
            seq,
            revision: self.next_seq.fetch_add(1, Ordering::SeqCst),
            team_id: draft.team_id,
            kind: draft.kind,
            duration_minutes: duration,
            recurrence: draft.recurrence,
            preferred_facility: draft.preferred_facility,
            preferred_days: draft.preferred_days,
            preferred_window: draft.preferred_window,
            priority: draft.priority,
            schedule: draft.schedule,
            status: RequestStatus::Pending,
            booking_id: None,
            rejection_reason: None,
        };
        self.persist_catalog(&Event::RequestSaved {
            request: request.clone(),
        })
        .await?;
        Ok(request)
    }

    pub async fn delete_request(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        if !self.requests.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_catalog(&Event::RequestDeleted { id }).await
    }

    /// Record the allocator's verdict on a request.
    pub async fn resolve_request(
        &self,
        id: Ulid,
        status: RequestStatus,
        booking_id: Option<Ulid>,
        reason: Option<RejectionReason>,
    ) -> Result<Request, EngineError> {
        let _catalog = self.catalog.lock().await;
        if !self.requests.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RequestResolved {
            id,
            status,
            booking_id,
            reason,
        };
        self.persist_catalog(&event).await?;
        self.requests
            .get(&id)
            .map(|r| r.clone())
            .ok_or(EngineError::NotFound(id))
    }

    // ── Decisions ────────────────────────────────────────────────

    /// Persist an allocation decision.
    ///
    /// Each placed request commits its occurrences as proposed bookings in
    /// one batch and is marked scheduled. Displaced movable bookings are
    /// cancelled inside that batch, only where it needs their slot, so a
    /// placement that fails leaves them standing. Rejected requests record
    /// their reason. A request left pending is one edited since the
    /// snapshot, one whose placement collides with a later commit, or one
    /// rejected only because the search ran out of budget.
    pub async fn apply_decision(
        &self,
        decision: &ScheduleDecision,
    ) -> Result<ApplySummary, EngineError> {
        let mut summary = ApplySummary::default();
        if decision.mode == SolveMode::Feasibility || decision.conflict.is_some() {
            return Ok(summary);
        }

        for resolution in &decision.resolutions {
            let Some(request) = self.requests.get(&resolution.request_id).map(|r| r.clone())
            else {
                summary.skipped.push(resolution.request_id);
                continue;
            };
            if request.status != RequestStatus::Pending {
                summary.skipped.push(request.id);
                continue;
            }
            if request.revision != resolution.revision {
                warn!(request = %request.id, "request edited since planning, left pending");
                summary.skipped.push(request.id);
                continue;
            }
            match (&resolution.placement, resolution.reason) {
                (Some(_), _) => match self
                    .commit_placement(&request, resolution, &decision.displaced)
                    .await
                {
                    Ok((ids, displaced)) => {
                        self.resolve_request(request.id, resolution.status, ids.first().copied(), None)
                            .await?;
                        summary.scheduled += 1;
                        summary.bookings.extend(ids);
                        summary.displaced.extend(displaced);
                    }
                    Err(e @ (EngineError::Conflict { .. } | EngineError::NotFound(_))) => {
                        warn!(request = %request.id, "placement no longer fits, left pending: {e}");
                        summary.skipped.push(request.id);
                    }
                    Err(e) => return Err(e),
                },
                (None, Some(RejectionReason::SearchIncomplete)) | (None, None) => {
                    summary.skipped.push(request.id);
                }
                (None, Some(reason)) => {
                    self.resolve_request(request.id, RequestStatus::Rejected, None, Some(reason))
                        .await?;
                    summary.rejected += 1;
                }
            }
        }
        info!(
            scheduled = summary.scheduled,
            rejected = summary.rejected,
            skipped = summary.skipped.len(),
            displaced = summary.displaced.len(),
            "decision applied"
        );
        Ok(summary)
    }

    async fn commit_placement(
        &self,
        request: &Request,
        resolution: &RequestResolution,
        displace: &[Ulid],
    ) -> Result<(Vec<Ulid>, Vec<Ulid>), EngineError> {
        let Some(placement) = &resolution.placement else {
            return Ok((Vec::new(), Vec::new()));
        };
        let team = self
            .teams
            .get(&request.team_id)
            .map(|t| t.name.clone())
            .ok_or(EngineError::NotFound(request.team_id))?;
        let title = format!("{team} {}", request.kind.as_str().replace('_', " "));
        let drafts: Vec<BookingDraft> = placement
            .occurrences
            .iter()
            .map(|occ| BookingDraft {
                id: Ulid::new(),
                title: title.clone(),
                facility_id: placement.facility_id,
                start: occ.start,
                end: Some(occ.end),
                is_fixed: false,
                kind: request.kind,
                status: BookingStatus::Proposed,
                team_id: Some(request.team_id),
                request_id: Some(request.id),
            })
            .collect();
        let (bookings, displaced) = self.commit_new(drafts, displace).await?;
        Ok((bookings.into_iter().map(|b| b.id).collect(), displaced))
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    ///
    /// Holds the catalog lock and every facility's read lock until the new
    /// log is in place, so no append can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut ids: Vec<Ulid> = self.facilities.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(fs) = self.get_facility(id) {
                guards.push(fs.read_owned().await);
            }
        }

        let mut events: Vec<Event> = guards
            .iter()
            .map(|g| Event::FacilityCreated {
                id: g.id,
                name: g.name.clone(),
                kind: g.kind,
            })
            .collect();
        events.extend(self.teams.iter().map(|t| Event::TeamSaved { team: t.clone() }));
        for guard in &guards {
            events.extend(guard.bookings.iter().map(|b| Event::BookingCommitted {
                booking: b.clone(),
            }));
        }
        let mut requests: Vec<Request> = self.requests.iter().map(|r| r.clone()).collect();
        requests.sort_by_key(|r| r.seq);
        events.extend(requests.into_iter().map(|request| Event::RequestSaved { request }));
        let count = events.len();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only timestamp type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let s = Span::new(self.start.max(other.start), self.end.min(other.end));
        (!s.is_empty()).then_some(s)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", format_ms(self.start), format_ms(self.end))
    }
}

/// `2026-03-02 18:30` in UTC; raw milliseconds if out of chrono's range.
pub fn format_ms(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string())
}

// ── Closed enumerations ──────────────────────────────────────────

#[derive(Debug)]
pub struct UnknownTag {
    pub what: &'static str,
    pub tag: String,
}

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.what, self.tag)
    }
}

impl std::error::Error for UnknownTag {}

/// Generates `as_str`, `ALL`, `Display` and `FromStr` for a tag enum.
macro_rules! tag_enum {
    ($name:ident, $what:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownTag;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($tag => Ok($name::$variant),)+
                    _ => Err(UnknownTag { what: $what, tag: s.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FacilityKind {
    Pitch,
    Hall,
    Gym,
}

tag_enum!(FacilityKind, "facility kind", {
    Pitch => "pitch",
    Hall => "hall",
    Gym => "gym",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    JuvenileTraining,
    AdultTraining,
    GymSession,
    Match,
    Championship,
    Meeting,
    Other,
}

tag_enum!(EventKind, "event kind", {
    JuvenileTraining => "juvenile_training",
    AdultTraining => "adult_training",
    GymSession => "gym_session",
    Match => "match",
    Championship => "championship",
    Meeting => "meeting",
    Other => "other",
});

impl EventKind {
    /// Conventional length in minutes. Only ever used as a default.
    pub fn default_duration_minutes(&self) -> Option<i64> {
        match self {
            EventKind::JuvenileTraining => Some(60),
            EventKind::AdultTraining => Some(90),
            EventKind::GymSession => Some(60),
            EventKind::Match => Some(120),
            EventKind::Championship => Some(150),
            EventKind::Meeting => Some(60),
            EventKind::Other => None,
        }
    }

    /// Whether a facility of `kind` can host this kind of event when it was
    /// not explicitly asked for.
    pub fn suits(&self, kind: FacilityKind) -> bool {
        match self {
            EventKind::Match | EventKind::Championship => kind == FacilityKind::Pitch,
            EventKind::GymSession | EventKind::Meeting => {
                matches!(kind, FacilityKind::Gym | FacilityKind::Hall)
            }
            EventKind::JuvenileTraining | EventKind::AdultTraining | EventKind::Other => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Draft,
    Proposed,
    Published,
    Cancelled,
}

tag_enum!(BookingStatus, "booking status", {
    Draft => "draft",
    Proposed => "proposed",
    Published => "published",
    Cancelled => "cancelled",
});

impl BookingStatus {
    /// Cancelled bookings neither conflict nor occupy their facility.
    pub fn occupies(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

tag_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recurrence {
    OneTime,
    Weekly,
}

tag_enum!(Recurrence, "recurrence", {
    OneTime => "one_time",
    Weekly => "weekly",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Scheduled,
    PartiallyScheduled,
    Rejected,
}

tag_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Scheduled => "scheduled",
    PartiallyScheduled => "partially_scheduled",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// No candidate slot exists inside the request's window and period.
    NoSlotWithinPreferences,
    /// Candidate slots existed but every one is taken.
    ResourceSaturated,
    /// The solver ran out of budget before finding any assignment.
    SearchIncomplete,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectionReason::NoSlotWithinPreferences => "no feasible slot within preferences",
            RejectionReason::ResourceSaturated => "resource saturated",
            RejectionReason::SearchIncomplete => "search did not finish",
        })
    }
}

// ── Weekdays and time-of-day ─────────────────────────────────────

/// Set of weekdays as a bitmask, Monday = bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0u8..7)
            .filter(move |bit| self.0 & (1 << bit) != 0)
            .filter_map(|bit| Weekday::try_from(bit).ok())
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl FromStr for DaySet {
    type Err = UnknownTag;

    /// Comma separated weekday names, e.g. `"mon,wed,friday"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<Weekday>().map_err(|_| UnknownTag {
                    what: "weekday",
                    tag: part.to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string().to_lowercase()).collect();
        f.write_str(&names.join(","))
    }
}

/// `[earliest_start, latest_end)` in minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest_start: i64,
    pub latest_end: i64,
}

impl TimeWindow {
    pub fn new(earliest_start: i64, latest_end: i64) -> Self {
        Self { earliest_start, latest_end }
    }

    pub fn whole_day() -> Self {
        Self::new(0, MINUTES_PER_DAY)
    }

    pub fn is_valid(&self) -> bool {
        0 <= self.earliest_start
            && self.earliest_start < self.latest_end
            && self.latest_end <= MINUTES_PER_DAY
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub name: String,
    pub kind: FacilityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Ulid,
    pub name: String,
    pub age_group: Option<String>,
    pub usual_day: Option<Weekday>,
    /// Minutes after local midnight.
    pub usual_time: Option<i64>,
    /// Weak: cleared when the facility goes away.
    pub usual_facility: Option<Ulid>,
    pub is_flexible: bool,
}

impl Team {
    pub fn new(id: Ulid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            age_group: None,
            usual_day: None,
            usual_time: None,
            usual_facility: None,
            is_flexible: true,
        }
    }
}

/// A committed occupation of one facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub title: String,
    pub facility_id: Ulid,
    pub span: Span,
    /// Immovable, e.g. fixtures imposed by the county board.
    pub is_fixed: bool,
    pub kind: EventKind,
    pub status: BookingStatus,
    pub team_id: Option<Ulid>,
    pub request_id: Option<Ulid>,
}

impl Booking {
    pub fn occupies(&self) -> bool {
        self.status.occupies()
    }
}

/// A pending ask for a slot, resolved by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Ulid,
    /// Creation order, used to break ties deterministically.
    pub seq: u64,
    /// Changes whenever the request's content is saved. A decision built
    /// from another revision is not applied.
    pub revision: u64,
    pub team_id: Ulid,
    pub kind: EventKind,
    pub duration_minutes: i64,
    pub recurrence: Recurrence,
    pub preferred_facility: Option<Ulid>,
    pub preferred_days: DaySet,
    pub preferred_window: TimeWindow,
    pub priority: Priority,
    /// `[schedule_from, schedule_until)`.
    pub schedule: Span,
    pub status: RequestStatus,
    pub booking_id: Option<Ulid>,
    pub rejection_reason: Option<RejectionReason>,
}

/// Per-facility occupancy timeline. Bookings sorted by `span.start`;
/// cancelled bookings stay in the list as records but never conflict.
#[derive(Debug, Clone)]
pub struct FacilityState {
    pub id: Ulid,
    pub name: String,
    pub kind: FacilityKind,
    pub bookings: Vec<Booking>,
}

impl FacilityState {
    pub fn new(id: Ulid, name: String, kind: FacilityKind) -> Self {
        Self {
            id,
            name,
            kind,
            bookings: Vec::new(),
        }
    }

    pub fn info(&self) -> Facility {
        Facility {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
        }
    }

    /// Insert a booking keeping sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// All bookings (any status) whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything from right_bound on starts at or after query.end.
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Non-cancelled bookings overlapping the query window.
    pub fn occupying(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.occupies())
    }
}

/// WAL record format. Flat: one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FacilityCreated { id: Ulid, name: String, kind: FacilityKind },
    FacilityRenamed { id: Ulid, name: String },
    FacilityDeleted { id: Ulid },
    TeamSaved { team: Team },
    TeamDeleted { id: Ulid },
    /// Insert or replace. A replaced booking may have moved facility.
    BookingCommitted { booking: Booking },
    BookingStatusChanged { id: Ulid, facility_id: Ulid, status: BookingStatus },
    BookingDeleted { id: Ulid, facility_id: Ulid },
    /// Insert or replace.
    RequestSaved { request: Request },
    RequestResolved {
        id: Ulid,
        status: RequestStatus,
        booking_id: Option<Ulid>,
        reason: Option<RejectionReason>,
    },
    RequestDeleted { id: Ulid },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            title: "t".into(),
            facility_id: Ulid::nil(),
            span: Span::new(start, end),
            is_fixed: false,
            kind: EventKind::Other,
            status,
            team_id: None,
            request_id: None,
        }
    }

    fn state() -> FacilityState {
        FacilityState::new(Ulid::new(), "Main Pitch".into(), FacilityKind::Pitch)
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_intersect() {
        let a = Span::new(100, 200);
        assert_eq!(a.intersect(&Span::new(150, 400)), Some(Span::new(150, 200)));
        assert_eq!(a.intersect(&Span::new(200, 400)), None);
        assert!(a.contains_span(&Span::new(120, 180)));
        assert!(!a.contains_span(&Span::new(50, 180)));
    }

    #[test]
    fn span_display_is_utc_minutes() {
        // 2026-03-02T18:30Z
        let start = 1_772_476_200_000;
        let span = Span::new(start, start + 90 * MINUTE_MS);
        assert_eq!(span.to_string(), "2026-03-02 18:30 to 2026-03-02 20:00");
    }

    #[test]
    fn kinds_round_trip_through_tags() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), *kind);
        }
        assert_eq!("Pitch".parse::<FacilityKind>().unwrap(), FacilityKind::Pitch);
        assert!("court".parse::<FacilityKind>().is_err());
    }

    #[test]
    fn default_durations() {
        assert_eq!(EventKind::AdultTraining.default_duration_minutes(), Some(90));
        assert_eq!(EventKind::Championship.default_duration_minutes(), Some(150));
        assert_eq!(EventKind::Other.default_duration_minutes(), None);
    }

    #[test]
    fn kind_suitability() {
        assert!(EventKind::Match.suits(FacilityKind::Pitch));
        assert!(!EventKind::Match.suits(FacilityKind::Gym));
        assert!(EventKind::GymSession.suits(FacilityKind::Hall));
        assert!(EventKind::JuvenileTraining.suits(FacilityKind::Gym));
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }

    #[test]
    fn day_set_parse_and_display() {
        let days: DaySet = "mon, Wednesday,fri".parse().unwrap();
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Wed));
        assert!(!days.contains(Weekday::Tue));
        assert_eq!(days.to_string(), "mon,wed,fri");
        assert!("".parse::<DaySet>().unwrap().is_empty());
        assert!("funday".parse::<DaySet>().is_err());
    }

    #[test]
    fn time_window_validity() {
        assert!(TimeWindow::new(18 * 60, 21 * 60).is_valid());
        assert!(TimeWindow::whole_day().is_valid());
        assert!(!TimeWindow::new(600, 600).is_valid());
        assert!(!TimeWindow::new(600, MINUTES_PER_DAY + 1).is_valid());
    }

    #[test]
    fn bookings_kept_sorted() {
        let mut fs = state();
        fs.insert_booking(booking(300, 400, BookingStatus::Draft));
        fs.insert_booking(booking(100, 200, BookingStatus::Draft));
        fs.insert_booking(booking(200, 300, BookingStatus::Published));
        let starts: Vec<Ms> = fs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut fs = state();
        let b = booking(100, 200, BookingStatus::Draft);
        let id = b.id;
        fs.insert_booking(b);
        assert!(fs.remove_booking(Ulid::new()).is_none());
        assert_eq!(fs.remove_booking(id).map(|b| b.id), Some(id));
        assert!(fs.bookings.is_empty());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut fs = state();
        fs.insert_booking(booking(100, 200, BookingStatus::Draft));
        fs.insert_booking(booking(450, 600, BookingStatus::Draft));
        fs.insert_booking(booking(1000, 1100, BookingStatus::Draft));
        let hits: Vec<_> = fs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn occupying_ignores_cancelled() {
        let mut fs = state();
        fs.insert_booking(booking(100, 200, BookingStatus::Cancelled));
        fs.insert_booking(booking(150, 250, BookingStatus::Proposed));
        let query = Span::new(0, 1000);
        assert_eq!(fs.overlapping(&query).count(), 2);
        assert_eq!(fs.occupying(&query).count(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut team = Team::new(Ulid::new(), "U14 Boys");
        team.usual_day = Some(Weekday::Tue);
        let event = Event::TeamSaved { team };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

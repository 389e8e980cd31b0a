use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.is_empty() {
        return Err(EngineError::invalid("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_window(span: &Span, max: Ms) -> Result<(), EngineError> {
    if span.is_empty() {
        return Err(EngineError::invalid("end must be after start"));
    }
    if span.duration_ms() > max {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str, what: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid(format!("{what} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::invalid("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}

/// Reject `span` if any occupying booking other than `own` overlaps it.
pub(crate) fn check_no_conflict(
    fs: &FacilityState,
    span: &Span,
    own: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    match fs.occupying(span).find(|b| Some(b.id) != own) {
        Some(existing) => Err(conflict_with(fs, existing)),
        None => Ok(()),
    }
}

pub(crate) fn conflict_with(fs: &FacilityState, existing: &Booking) -> EngineError {
    EngineError::Conflict {
        facility_id: fs.id,
        facility: fs.name.clone(),
        booking: existing.id,
        title: existing.title.clone(),
        span: existing.span,
    }
}

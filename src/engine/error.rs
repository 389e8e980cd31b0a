use ulid::Ulid;

use crate::model::Span;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, rejected before any state is touched.
    Validation(String),
    /// The facility is already occupied during `span` by `booking`.
    Conflict {
        facility_id: Ulid,
        facility: String,
        booking: Ulid,
        title: String,
        span: Span,
    },
    NotFound(Ulid),
    NameTaken(String),
    /// An insert named an id that is already in use.
    AlreadyExists(Ulid),
    /// Still referenced by bookings or requests.
    InUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
    /// A background task failed, e.g. the solver thread panicked.
    Internal(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict {
                facility,
                booking,
                title,
                span,
                ..
            } => write!(
                f,
                "{facility} is already booked from {span} by '{title}' ({booking})"
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::NameTaken(name) => write!(f, "name already in use: {name}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InUse(id) => write!(f, "{id} is still referenced"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

use crate::model::{DateRange, Id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    /// Absent, malformed or inactive reservation.
    InvalidArgument(&'static str),
    /// An atom would overlap an occupied range of `room_id`.
    Conflict { room_id: Id, range: DateRange },
}

impl std::fmt::Display for PlanningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            PlanningError::Conflict { room_id, range } => write!(
                f,
                "conflict in room {room_id} with occupied range [{}, {})",
                range.begin, range.end
            ),
        }
    }
}

impl std::error::Error for PlanningError {}

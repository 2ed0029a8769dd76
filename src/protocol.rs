use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::limits;
use crate::model::*;
use crate::persistence::{Operation, OperationResult, StreamFilter, TaskError};

/// Stream id chosen by the client, unique within its session.
pub type ClientStreamId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    Malformed(String),
    UnknownService(String),
    Invalid(String),
    LimitExceeded(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed message: {msg}"),
            ProtocolError::UnknownService(s) => write!(f, "unknown service: {s}"),
            ProtocolError::Invalid(msg) => write!(f, "invalid item: {msg}"),
            ProtocolError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

// ── Client → server ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateStream {
        id: ClientStreamId,
        #[serde(rename = "type")]
        kind: EntityKind,
        #[serde(default)]
        service: String,
        #[serde(default)]
        options: Value,
    },
    RemoveStream {
        id: ClientStreamId,
    },
    ScheduleOperations {
        id: u64,
        operations: Vec<OperationMessage>,
    },
}

impl ClientMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationMessage {
    EraseAllData,
    LoadAll,
    Store { t: EntityKind, o: Value },
    Update { t: EntityKind, o: Value },
    Delete { t: EntityKind, o: Id },
}

impl OperationMessage {
    pub fn to_operation(&self) -> Result<Operation, ProtocolError> {
        match self {
            OperationMessage::EraseAllData => Ok(Operation::EraseAll),
            OperationMessage::LoadAll => Ok(Operation::LoadAll),
            OperationMessage::Store { t, o } => Ok(Operation::StoreNew(parse_item(*t, o)?)),
            OperationMessage::Update { t, o } => {
                let item = parse_item(*t, o)?;
                if item.id() == UNPERSISTED {
                    return Err(ProtocolError::Invalid(format!("update of a {t} without an id")));
                }
                Ok(Operation::Update(item))
            }
            OperationMessage::Delete { t, o } => Ok(Operation::Delete { kind: *t, id: *o }),
        }
    }
}

/// Convert a whole batch; fails on the first bad operation.
pub fn to_operations(messages: &[OperationMessage]) -> Result<Vec<Operation>, ProtocolError> {
    if messages.len() > limits::MAX_BATCH_SIZE {
        return Err(ProtocolError::LimitExceeded(format!(
            "batch of {} operations exceeds {}",
            messages.len(),
            limits::MAX_BATCH_SIZE
        )));
    }
    messages.iter().map(OperationMessage::to_operation).collect()
}

fn parse_item(kind: EntityKind, value: &Value) -> Result<Item, ProtocolError> {
    match kind {
        EntityKind::Hotel => {
            let hotel: Hotel = serde_json::from_value(value.clone())?;
            validate_hotel(&hotel)?;
            Ok(Item::Hotel(hotel))
        }
        EntityKind::Reservation => {
            let reservation: Reservation = serde_json::from_value(value.clone())?;
            validate_reservation(&reservation)?;
            Ok(Item::Reservation(reservation))
        }
    }
}

fn check_len(what: &str, value: &str, max: usize) -> Result<(), ProtocolError> {
    if value.len() > max {
        return Err(ProtocolError::LimitExceeded(format!("{what} longer than {max} bytes")));
    }
    Ok(())
}

fn validate_hotel(hotel: &Hotel) -> Result<(), ProtocolError> {
    check_len("hotel name", &hotel.name, limits::MAX_NAME_LEN)?;
    for category in &hotel.categories {
        check_len("category name", &category.name, limits::MAX_NAME_LEN)?;
        check_len("category code", &category.short_code, limits::MAX_NAME_LEN)?;
    }
    for room in &hotel.rooms {
        check_len("room name", &room.name, limits::MAX_NAME_LEN)?;
    }
    Ok(())
}

fn validate_reservation(reservation: &Reservation) -> Result<(), ProtocolError> {
    check_len("description", &reservation.description, limits::MAX_DESCRIPTION_LEN)?;
    if reservation.atoms.len() > limits::MAX_ATOMS_PER_RESERVATION {
        return Err(ProtocolError::LimitExceeded(format!(
            "more than {} atoms",
            limits::MAX_ATOMS_PER_RESERVATION
        )));
    }
    reservation
        .validate()
        .map_err(|e| ProtocolError::Invalid(e.to_string()))
}

/// Map `service` + `options` of a `create_stream` to a filter.
pub fn parse_service(kind: EntityKind, service: &str, options: &Value) -> Result<StreamFilter, ProtocolError> {
    let by_id = match kind {
        EntityKind::Hotel => "hotel.by_id",
        EntityKind::Reservation => "reservation.by_id",
    };
    if service.is_empty() {
        return Ok(StreamFilter::All);
    }
    if service != by_id {
        return Err(ProtocolError::UnknownService(service.to_string()));
    }
    options
        .get("id")
        .and_then(Value::as_i64)
        .map(StreamFilter::ById)
        .ok_or_else(|| ProtocolError::Malformed(format!("{service} needs an integer options.id")))
}

// ── Server → client ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerMessage {
    StreamAdd {
        id: ClientStreamId,
        items: Value,
    },
    StreamUpdate {
        id: ClientStreamId,
        items: Value,
    },
    StreamRemove {
        id: ClientStreamId,
        ids: Vec<Id>,
    },
    StreamClear {
        id: ClientStreamId,
    },
    StreamInitialize {
        id: ClientStreamId,
    },
    TaskResults {
        id: u64,
        status: TaskOutcome,
        results: Vec<OperationResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn task_results(id: u64, result: Result<Vec<OperationResult>, TaskError>) -> Self {
        match result {
            Ok(results) => ServerMessage::TaskResults {
                id,
                status: TaskOutcome::Completed,
                results,
                message: None,
            },
            Err(e) => ServerMessage::TaskResults {
                id,
                status: TaskOutcome::Failed,
                results: Vec::new(),
                message: Some(e.to_string()),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

use serde::Serialize;

use crate::model::*;

/// One unit of work for the worker. A batch of operations runs inside a
/// single storage transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Re-deliver a fresh snapshot to every active stream.
    LoadAll,
    EraseAll,
    StoreNew(Item),
    Update(Item),
    Delete { kind: EntityKind, id: Id },
}

impl Operation {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::LoadAll => "load_all",
            Operation::EraseAll => "erase_all",
            Operation::StoreNew(_) => "store_new",
            Operation::Update(_) => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Per-operation outcome of a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    /// Rows written, deleted, or loaded.
    pub affected: usize,
    /// Id of the stored, updated, or deleted item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl OperationResult {
    pub fn with_id(id: Id) -> Self {
        Self {
            affected: 1,
            id: Some(id),
        }
    }

    pub fn affected(affected: usize) -> Self {
        Self { affected, id: None }
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

/// Identity of the single user the service runs for out of the box.
pub const DEFAULT_USER_ID: UserId = Uuid::nil();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub balance: f64,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self { id, balance: 0.0 }
    }
}

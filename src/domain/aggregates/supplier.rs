//! Dropship suppliers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Supplier {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: Uuid::now_v7(), name: name.into(), email: email.into(), active: true, created_at: Utc::now() }
    }
}

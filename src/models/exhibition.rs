use serde::{Deserialize, Serialize};

/// Read model for the exhibition gating attribute. The core consumes this
/// flag but does not own the exhibition record; it must be re-checked on
/// every claim attempt because it can flip between read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExhibitionGate {
    pub exhibition_id: i64,
    pub status: String,
    pub is_active: bool,
}

impl ExhibitionGate {
    pub fn published(exhibition_id: i64) -> Self {
        Self {
            exhibition_id,
            status: "published".to_string(),
            is_active: true,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.status == "published" && self.is_active
    }
}

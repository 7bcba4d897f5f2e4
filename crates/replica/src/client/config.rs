use serde::{Deserialize, Serialize};

use crate::registry::Color;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub username: String,
    pub color: Color,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: "Player".to_string(),
            color: Color::WHITE,
        }
    }
}

//! Collection configuration shared by the subscription and the gateway.

use serde::{Deserialize, Serialize};

/// Where listings live in the remote store and which field carries the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    /// Remote collection name (default: "books")
    #[serde(default = "default_collection_name")]
    pub name: String,

    /// Field compared against the principal's email (default: "sellerEmail")
    #[serde(default = "default_owner_field")]
    pub owner_field: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            owner_field: default_owner_field(),
        }
    }
}

fn default_collection_name() -> String {
    "books".to_string()
}

fn default_owner_field() -> String {
    "sellerEmail".to_string()
}

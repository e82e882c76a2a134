use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Model, Value, expect_int, expect_text, unknown_column};
use crate::error::StorageError;

/// A node (file or folder) in a user's file tree, pointing into the shared
/// repository pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRepository {
    #[serde(flatten)]
    pub model: Model,
    pub identity: String,
    pub user_identity: String,
    #[serde(rename = "parentID")]
    pub parent_id: i64,
    pub repository_identity: String,
    /// File extension, empty for folders.
    pub ext: String,
    pub name: String,
}

impl Entity for UserRepository {
    const TABLE: &'static str = "user_repository";
    const CACHE_PREFIX: &'static str = "userRepository";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "identity",
        "user_identity",
        "parent_id",
        "repository_identity",
        "ext",
        "name",
    ];

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("identity", self.identity.as_str().into()),
            ("user_identity", self.user_identity.as_str().into()),
            ("parent_id", self.parent_id.into()),
            ("repository_identity", self.repository_identity.as_str().into()),
            ("ext", self.ext.as_str().into()),
            ("name", self.name.as_str().into()),
        ]
    }

    fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError> {
        match column {
            "identity" => self.identity = expect_text(column, value)?,
            "user_identity" => self.user_identity = expect_text(column, value)?,
            "parent_id" => self.parent_id = expect_int(column, value)?,
            "repository_identity" => self.repository_identity = expect_text(column, value)?,
            "ext" => self.ext = expect_text(column, value)?,
            "name" => self.name = expect_text(column, value)?,
            _ => return Err(unknown_column(column)),
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Model, Value, expect_int, expect_text, unknown_column};
use crate::error::StorageError;

/// A stored blob in the content-addressed pool, shared by every user file
/// with the same hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPool {
    #[serde(flatten)]
    pub model: Model,
    pub identity: String,
    /// Content hash, unique per blob.
    pub hash: String,
    pub name: String,
    pub ext: String,
    /// Size in bytes.
    pub size: i64,
    pub path: String,
}

impl Entity for RepositoryPool {
    const TABLE: &'static str = "repository_pool";
    const CACHE_PREFIX: &'static str = "repositoryPool";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "identity",
        "hash",
        "name",
        "ext",
        "size",
        "path",
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
            ("hash", self.hash.as_str().into()),
            ("name", self.name.as_str().into()),
            ("ext", self.ext.as_str().into()),
            ("size", self.size.into()),
            ("path", self.path.as_str().into()),
        ]
    }

    fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError> {
        match column {
            "identity" => self.identity = expect_text(column, value)?,
            "hash" => self.hash = expect_text(column, value)?,
            "name" => self.name = expect_text(column, value)?,
            "ext" => self.ext = expect_text(column, value)?,
            "size" => self.size = expect_int(column, value)?,
            "path" => self.path = expect_text(column, value)?,
            _ => return Err(unknown_column(column)),
        }
        Ok(())
    }
}

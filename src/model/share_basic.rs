use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Model, Value, expect_int, expect_text, unknown_column};
use crate::error::StorageError;

/// A share link for one of a user's files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBasic {
    #[serde(flatten)]
    pub model: Model,
    pub identity: String,
    pub user_identity: String,
    /// Identity in the shared repository pool.
    pub repository_identity: String,
    /// Identity in the owner's file tree.
    pub user_repository_identity: String,
    /// Lifetime in seconds; 0 never expires.
    pub expired_time: i64,
    pub click_num: i64,
}

impl Entity for ShareBasic {
    const TABLE: &'static str = "share_basic";
    const CACHE_PREFIX: &'static str = "shareBasic";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "identity",
        "user_identity",
        "repository_identity",
        "user_repository_identity",
        "expired_time",
        "click_num",
    ];
    // Click counts move constantly; keep cached copies short-lived.
    const CACHE_TTL: Duration = Duration::from_secs(60);

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
            ("repository_identity", self.repository_identity.as_str().into()),
            (
                "user_repository_identity",
                self.user_repository_identity.as_str().into(),
            ),
            ("expired_time", self.expired_time.into()),
            ("click_num", self.click_num.into()),
        ]
    }

    fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError> {
        match column {
            "identity" => self.identity = expect_text(column, value)?,
            "user_identity" => self.user_identity = expect_text(column, value)?,
            "repository_identity" => self.repository_identity = expect_text(column, value)?,
            "user_repository_identity" => {
                self.user_repository_identity = expect_text(column, value)?
            }
            "expired_time" => self.expired_time = expect_int(column, value)?,
            "click_num" => self.click_num = expect_int(column, value)?,
            _ => return Err(unknown_column(column)),
        }
        Ok(())
    }
}

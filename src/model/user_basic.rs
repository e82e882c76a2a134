use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Model, Value, expect_text, unknown_column};
use crate::error::StorageError;

/// An account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBasic {
    #[serde(flatten)]
    pub model: Model,
    pub identity: String,
    pub name: String,
    pub password: String,
    pub email: String,
}

impl Entity for UserBasic {
    const TABLE: &'static str = "user_basic";
    const CACHE_PREFIX: &'static str = "userBasic";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "identity",
        "name",
        "password",
        "email",
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
            ("name", self.name.as_str().into()),
            ("password", self.password.as_str().into()),
            ("email", self.email.as_str().into()),
        ]
    }

    fn apply(&mut self, column: &str, value: Value) -> Result<(), StorageError> {
        match column {
            "identity" => self.identity = expect_text(column, value)?,
            "name" => self.name = expect_text(column, value)?,
            "password" => self.password = expect_text(column, value)?,
            "email" => self.email = expect_text(column, value)?,
            _ => return Err(unknown_column(column)),
        }
        Ok(())
    }
}

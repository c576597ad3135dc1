use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Single-character flag stored as `Y` / `N`, used for soft-delete markers
/// and the include-all-users switch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum YesNo {
    #[sea_orm(string_value = "Y")]
    #[serde(rename = "Y")]
    Y,
    #[default]
    #[sea_orm(string_value = "N")]
    #[serde(rename = "N")]
    N,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        matches!(self, Self::Y)
    }
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value {
            Self::Y
        } else {
            Self::N
        }
    }
}

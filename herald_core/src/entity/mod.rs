// SeaORM entities for the message core.

pub mod group_user;
pub mod message;
pub mod message_type;
pub mod msg_group;
pub mod user;
mod yes_no;

pub use yes_no::YesNo;

use sea_orm::{prelude::DateTimeUtc, ActiveValue};


/// Fills the audit timestamps the way the storage layer is expected to:
/// `create_time` once on insert (unless the caller supplied one), `update_time` on every save.
pub(crate) fn stamp_audit(
    create_time: &mut ActiveValue<DateTimeUtc>,
    update_time: &mut ActiveValue<DateTimeUtc>,
    insert: bool,
) {
    let now = chrono::Utc::now();
    if insert && create_time.is_not_set() {
        *create_time = ActiveValue::Set(now);
    }
    *update_time = ActiveValue::Set(now);
}

pub mod prelude {
    pub use super::group_user::{
        ActiveModel as MembershipActiveModel, Column as MembershipColumn, Entity as Membership,
        Model as MembershipModel,
    };
    pub use super::message::{
        ActiveModel as MessageActiveModel, Column as MessageColumn, Entity as Message,
        Model as MessageModel,
    };
    pub use super::message_type::{
        ActiveModel as MessageTypeActiveModel, Column as MessageTypeColumn,
        Entity as MessageType, Model as MessageTypeModel,
    };
    pub use super::msg_group::{
        ActiveModel as GroupActiveModel, Column as GroupColumn, Entity as Group,
        Model as GroupModel,
    };
    pub use super::user::{
        ActiveModel as UserActiveModel, Column as UserColumn, Entity as User,
        Model as UserModel, UserStatus,
    };
    pub use super::YesNo;

    pub use sea_orm::{
        ActiveModelTrait,
        ActiveValue,

        ColumnTrait,
        ConnectionTrait,

        DatabaseConnection,
        DatabaseTransaction,
        DbErr,

        EntityTrait,
        ModelTrait,
        NotSet,
        PaginatorTrait,
        QueryFilter,
        QueryOrder,
        QuerySelect,
        Set,
        TransactionTrait,
    };
}

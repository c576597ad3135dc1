use log::{debug, info};
use sea_orm::{prelude::DateTimeUtc, sea_query::Expr, ConnectionTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::{codes, is_unique_violation, Classified, ErrorClass},
    ids::{GroupId, MessageId, UserId},
    models::{with_read_retry, Page, PageRequest},
    service::{
        groups::{find_live_group, lock_live_group},
        visibility::{self, MessageFilter, MessageView, Viewer},
    },
};

const MAX_TITLE_LEN: usize = 255;
const MAX_TYPE_CODE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum MessagesServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    #[error("send time {requested} is earlier than the latest message of the group ({latest})")]
    SendTimeRegression {
        requested: DateTimeUtc,
        latest: DateTimeUtc,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("message type {0:?} already exists")]
    TypeExists(String),
}

impl Classified for MessagesServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            MessagesServiceError::DbError(error) => error.class(),
            MessagesServiceError::GroupNotFound => ErrorClass::Resource,
            MessagesServiceError::MessageNotFound => ErrorClass::Resource,
            MessagesServiceError::UnknownMessageType(_) => ErrorClass::Parameter,
            MessagesServiceError::SendTimeRegression { .. } => ErrorClass::Parameter,
            MessagesServiceError::InvalidMessage(_) => ErrorClass::Parameter,
            MessagesServiceError::TypeExists(_) => ErrorClass::Resource,
        }
    }

    fn code(&self) -> u32 {
        match self {
            MessagesServiceError::DbError(error) => error.code(),
            MessagesServiceError::GroupNotFound => codes::GROUP_NOT_FOUND,
            MessagesServiceError::MessageNotFound => codes::MESSAGE_NOT_FOUND,
            MessagesServiceError::UnknownMessageType(_) => codes::UNKNOWN_MESSAGE_TYPE,
            MessagesServiceError::SendTimeRegression { .. } => codes::SEND_TIME_REGRESSION,
            MessagesServiceError::InvalidMessage(_) => codes::INVALID_PARAMETER,
            MessagesServiceError::TypeExists(_) => codes::ALREADY_EXISTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub title: String,
    pub content: String,
    pub type_code: String,
    /// Defaults to now, or to the latest send time of the group when the
    /// clock is behind it.
    pub send_time: Option<DateTimeUtc>,
}

impl NewMessage {
    fn validate(&self) -> Result<(), MessagesServiceError> {
        let title = self.title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(MessagesServiceError::InvalidMessage(
                "title must be 1 to 255 characters",
            ));
        }
        if self.type_code.trim().is_empty() {
            return Err(MessagesServiceError::InvalidMessage("message type is required"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MessagesService {
    db: DatabaseConnection,
}

impl MessagesService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Appends a message to a live group and advances the group's
    /// `latest_message_id`, both in one transaction.
    pub async fn append_message(
        &self,
        group_id: GroupId,
        message: NewMessage,
        actor: UserId,
    ) -> Result<MessageModel, MessagesServiceError> {
        message.validate()?;

        let txn = self.db.begin().await?;

        // the lock orders ids and send times consistently within the group
        let group = lock_live_group(&txn, group_id)
            .await?
            .ok_or(MessagesServiceError::GroupNotFound)?;

        let type_code = message.type_code.trim().to_string();
        let known_type = MessageType::find()
            .filter(MessageTypeColumn::TypeCode.eq(type_code.as_str()))
            .one(&txn)
            .await?;
        if known_type.is_none() {
            return Err(MessagesServiceError::UnknownMessageType(type_code));
        }

        let latest_send_time = latest_send_time(&txn, &group).await?;
        let send_time = match (message.send_time, latest_send_time) {
            (Some(requested), Some(latest)) if requested < latest => {
                return Err(MessagesServiceError::SendTimeRegression { requested, latest });
            }
            (Some(requested), _) => requested,
            (None, Some(latest)) => latest.max(chrono::Utc::now()),
            (None, None) => chrono::Utc::now(),
        };

        let inserted = MessageActiveModel {
            group_id: Set(group.id),
            title: Set(message.title.trim().to_string()),
            content: Set(message.content),
            type_code: Set(type_code),
            send_time: Set(send_time),
            is_deleted: Set(YesNo::N),
            create_user: Set(actor),
            update_user: Set(actor),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        Group::update_many()
            .col_expr(GroupColumn::LatestMessageId, Expr::value(inserted.id))
            .filter(GroupColumn::Id.eq(group.id))
            .filter(GroupColumn::LatestMessageId.lt(inserted.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            "message {} appended to group {} by {actor}",
            inserted.id, inserted.group_id
        );
        Ok(inserted)
    }

    pub async fn get_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageModel>, MessagesServiceError> {
        let db = &self.db;
        let message = with_read_retry(|| async move {
            Message::find_by_id(message_id)
                .filter(MessageColumn::IsDeleted.eq(YesNo::N))
                .one(db)
                .await
        })
        .await?;
        Ok(message)
    }

    /// 0 when the group has no messages yet.
    pub async fn latest_message_id_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<MessageId, MessagesServiceError> {
        let group = find_live_group(&self.db, group_id)
            .await?
            .ok_or(MessagesServiceError::GroupNotFound)?;
        Ok(group.latest_message_id)
    }

    /// Messages visible to `user_id`, newest first, optionally of one type.
    pub async fn list_messages_for_user(
        &self,
        user_id: UserId,
        page: PageRequest,
        type_code: Option<&str>,
    ) -> Result<Page<MessageView>, MessagesServiceError> {
        let db = &self.db;
        let filter = MessageFilter {
            type_code,
            ..Default::default()
        };

        let listed = with_read_retry(|| async move {
            let viewer = Viewer::resolve(db, user_id).await?;
            let total = visibility::count_visible(db, &viewer, filter).await?;
            let rows = if total > page.offset() {
                visibility::list_visible(db, &viewer, filter, page).await?
            } else {
                Vec::new()
            };
            Ok::<_, DbErr>(Page { rows, total })
        })
        .await?;

        debug!(
            "user {user_id}: page {} holds {} of {} visible messages",
            page.page,
            listed.rows.len(),
            listed.total
        );
        Ok(listed)
    }

    pub async fn list_message_types(&self) -> Result<Vec<MessageTypeModel>, MessagesServiceError> {
        let db = &self.db;
        let types = with_read_retry(|| async move {
            MessageType::find()
                .order_by_asc(MessageTypeColumn::Id)
                .all(db)
                .await
        })
        .await?;
        Ok(types)
    }

    pub async fn create_message_type(
        &self,
        type_code: &str,
        type_name: &str,
    ) -> Result<MessageTypeModel, MessagesServiceError> {
        let type_code = type_code.trim();
        if type_code.is_empty() || type_code.len() > MAX_TYPE_CODE_LEN {
            return Err(MessagesServiceError::InvalidMessage(
                "type code must be 1 to 32 characters",
            ));
        }
        if type_name.trim().is_empty() {
            return Err(MessagesServiceError::InvalidMessage("type name is required"));
        }

        let created = MessageTypeActiveModel {
            type_code: Set(type_code.to_string()),
            type_name: Set(type_name.trim().to_string()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                MessagesServiceError::TypeExists(type_code.to_string())
            } else {
                MessagesServiceError::DbError(err)
            }
        })?;

        info!("message type {} created", created.type_code);
        Ok(created)
    }
}

async fn latest_send_time<C>(conn: &C, group: &GroupModel) -> Result<Option<DateTimeUtc>, DbErr>
where
    C: ConnectionTrait,
{
    if group.latest_message_id == MessageId::ZERO {
        return Ok(None);
    }

    Message::find_by_id(group.latest_message_id)
        .select_only()
        .column(MessageColumn::SendTime)
        .into_tuple::<DateTimeUtc>()
        .one(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        service::{
            groups::{GroupsService, NewGroup},
            members::MembersService,
        },
        test_utils::{at, create_message_type, create_test_user, setup_test_db, ADMIN},
    };

    struct Fixture {
        db: DatabaseConnection,
        groups: GroupsService,
        messages: MessagesService,
    }

    async fn setup() -> Fixture {
        let db = setup_test_db().await;
        create_message_type(&db, "notice").await;
        Fixture {
            groups: GroupsService::new(db.clone()),
            messages: MessagesService::new(db.clone()),
            db,
        }
    }

    fn notice(title: &str, secs: i64) -> NewMessage {
        NewMessage {
            title: title.into(),
            content: format!("{title} body"),
            type_code: "notice".into(),
            send_time: Some(at(secs)),
        }
    }

    async fn group_with(fx: &Fixture, name: &str, user_ids: Vec<UserId>) -> GroupId {
        fx.groups
            .create_group(
                NewGroup {
                    name: name.into(),
                    user_ids,
                    ..Default::default()
                },
                ADMIN,
            )
            .await
            .unwrap()
            .group
            .id
    }

    #[tokio::test]
    async fn test_append_advances_latest_message_id() {
        let fx = setup().await;
        let group_id = group_with(&fx, "G", vec![]).await;
        assert_eq!(
            fx.messages.latest_message_id_in_group(group_id).await.unwrap(),
            MessageId::ZERO
        );

        let m1 = fx.messages.append_message(group_id, notice("M1", 10), ADMIN).await.unwrap();
        let m2 = fx.messages.append_message(group_id, notice("M2", 20), ADMIN).await.unwrap();

        assert!(m2.id > m1.id);
        assert_eq!(
            fx.messages.latest_message_id_in_group(group_id).await.unwrap(),
            m2.id
        );

        let stored = fx.messages.get_message(m1.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "M1");
        assert_eq!(stored.group_id, group_id);
        assert_eq!(stored.create_user, ADMIN);
    }

    #[tokio::test]
    async fn test_append_to_missing_or_deleted_group_fails() {
        let fx = setup().await;
        let result = fx
            .messages
            .append_message(GroupId::new(404), notice("M", 10), ADMIN)
            .await;
        assert!(matches!(result, Err(MessagesServiceError::GroupNotFound)));

        let group_id = group_with(&fx, "G", vec![]).await;
        fx.groups.delete_group(group_id, ADMIN).await.unwrap();
        let result = fx.messages.append_message(group_id, notice("M", 10), ADMIN).await;
        assert!(matches!(result, Err(MessagesServiceError::GroupNotFound)));
    }

    #[tokio::test]
    async fn test_append_rejects_unknown_type_and_bad_input() {
        let fx = setup().await;
        let group_id = group_with(&fx, "G", vec![]).await;

        let mut message = notice("M", 10);
        message.type_code = "promo".into();
        let result = fx.messages.append_message(group_id, message, ADMIN).await;
        assert!(matches!(result, Err(MessagesServiceError::UnknownMessageType(code)) if code == "promo"));

        let result = fx.messages.append_message(group_id, notice("  ", 10), ADMIN).await;
        assert!(matches!(result, Err(MessagesServiceError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_send_time_cannot_go_backwards_within_a_group() {
        let fx = setup().await;
        let group_id = group_with(&fx, "G", vec![]).await;
        let other = group_with(&fx, "Other", vec![]).await;

        fx.messages.append_message(group_id, notice("M1", 20), ADMIN).await.unwrap();

        let result = fx.messages.append_message(group_id, notice("M0", 10), ADMIN).await;
        assert!(matches!(result, Err(MessagesServiceError::SendTimeRegression { .. })));

        // same send time is fine, ids still break the tie
        fx.messages.append_message(group_id, notice("M2", 20), ADMIN).await.unwrap();
        // other groups keep their own clock
        fx.messages.append_message(other, notice("X", 10), ADMIN).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_messages_for_member() {
        let fx = setup().await;
        let u1 = create_test_user(&fx.db, 1).await;
        let u2 = create_test_user(&fx.db, 2).await;
        let group_id = group_with(&fx, "G", vec![u1]).await;

        for (title, secs) in [("M1", 10), ("M2", 20), ("M3", 30)] {
            fx.messages.append_message(group_id, notice(title, secs), ADMIN).await.unwrap();
        }

        let page = fx
            .messages
            .list_messages_for_user(u1, PageRequest::new(1, 2), None)
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let titles: Vec<&str> = page.rows.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["M3", "M2"]);
        assert_eq!(page.rows[0].type_name, "Notice");
        assert!(!page.rows[0].is_read);

        let outsider = fx
            .messages
            .list_messages_for_user(u2, PageRequest::default(), None)
            .await
            .unwrap();
        assert_eq!(outsider.total, 0);
        assert!(outsider.rows.is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_filters_by_type() {
        let fx = setup().await;
        create_message_type(&fx.db, "event").await;
        let u1 = create_test_user(&fx.db, 1).await;
        let group_id = group_with(&fx, "G", vec![u1]).await;

        fx.messages.append_message(group_id, notice("N", 10), ADMIN).await.unwrap();
        let mut event = notice("E", 20);
        event.type_code = "event".into();
        fx.messages.append_message(group_id, event, ADMIN).await.unwrap();

        let page = fx
            .messages
            .list_messages_for_user(u1, PageRequest::default(), Some("event"))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].title, "E");
        assert_eq!(page.rows[0].type_code, "event");
    }

    #[tokio::test]
    async fn test_removed_member_no_longer_lists_messages() {
        let fx = setup().await;
        let u1 = create_test_user(&fx.db, 1).await;
        let group_id = group_with(&fx, "G", vec![u1]).await;
        fx.messages.append_message(group_id, notice("M1", 10), ADMIN).await.unwrap();

        let members = MembersService::new(fx.db.clone());
        members.remove_users(group_id, &[u1], ADMIN).await.unwrap();

        let page = fx
            .messages
            .list_messages_for_user(u1, PageRequest::default(), None)
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        // sent while away, and the re-add lands exactly on it
        fx.messages.append_message(group_id, notice("M2", 20), ADMIN).await.unwrap();
        members.add_users(group_id, &[u1], ADMIN).await.unwrap();
        let m3 = fx
            .messages
            .append_message(group_id, notice("M3", 30), ADMIN)
            .await
            .unwrap();

        let page = fx
            .messages
            .list_messages_for_user(u1, PageRequest::default(), None)
            .await
            .unwrap();
        let ids: Vec<MessageId> = page.rows.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![m3.id]);
    }

    #[tokio::test]
    async fn test_message_types() {
        let fx = setup().await;
        let created = fx.messages.create_message_type("event", "Event").await.unwrap();
        assert_eq!(created.type_code, "event");

        let result = fx.messages.create_message_type("event", "Again").await;
        assert!(matches!(result, Err(MessagesServiceError::TypeExists(_))));

        let codes: Vec<String> = fx
            .messages
            .list_message_types()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.type_code)
            .collect();
        assert_eq!(codes, vec!["notice".to_string(), "event".to_string()]);
    }
}

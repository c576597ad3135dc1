//! Who can see which message.
//!
//! A message in group G is visible to user U when either
//! * G is an explicit group and U holds a live membership whose
//!   `join_message_id` is below the message id, or
//! * G includes all users, U is active, and the message was sent no earlier
//!   than U's account creation.
//!
//! A visible message is unread when it is above U's watermark for G. For
//! all-users groups without a shadow membership the watermark is U's
//! effective join point, which every visible message is above.
//!
//! The same rule exists twice: as a SQL condition for counts and listings,
//! and as [`is_visible`] for single-message decisions on the write path.

use sea_orm::{
    prelude::DateTimeUtc,
    sea_query::{Alias, Condition, Expr, Func, Order, Query, SelectStatement},
    ConnectionTrait, FromQueryResult,
};
use serde::{Deserialize, Serialize};

use crate::{
    entity::prelude::*,
    ids::{GroupId, MessageId, UserId},
    models::PageRequest,
};

const TOTAL: &str = "total";

/// What the read path needs to know about the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
    /// Creation time of an active user; `None` for unknown or disabled users,
    /// who see nothing from all-users groups.
    pub all_users_since: Option<DateTimeUtc>,
}

impl Viewer {
    pub async fn resolve<C>(conn: &C, user_id: UserId) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let user = User::find_by_id(user_id).one(conn).await?;
        Ok(Self::from_user(user_id, user.as_ref()))
    }

    pub fn from_user(user_id: UserId, user: Option<&UserModel>) -> Self {
        Self {
            user_id,
            all_users_since: user.filter(|u| u.is_active()).map(|u| u.create_time),
        }
    }
}

/// Single-message form of the visibility rule. `membership` must be the
/// viewer's row for the message's group, if any.
pub fn is_visible(
    viewer: &Viewer,
    group: &GroupModel,
    message: &MessageModel,
    membership: Option<&MembershipModel>,
) -> bool {
    if !group.is_live() || message.is_deleted.is_yes() {
        return false;
    }

    if group.includes_all_users() {
        viewer
            .all_users_since
            .is_some_and(|since| message.send_time >= since)
    } else {
        membership.is_some_and(|m| m.is_live() && m.join_message_id < message.id)
    }
}

/// Highest message id in `group_id` sent before `since`; 0 when there is none.
/// This is where a user created at `since` enters an all-users group.
pub async fn effective_join_point<C>(
    conn: &C,
    group_id: GroupId,
    since: DateTimeUtc,
) -> Result<MessageId, DbErr>
where
    C: ConnectionTrait,
{
    let latest_before = Message::find()
        .select_only()
        .column(MessageColumn::Id)
        .filter(MessageColumn::GroupId.eq(group_id))
        .filter(MessageColumn::SendTime.lt(since))
        .order_by_desc(MessageColumn::Id)
        .into_tuple::<MessageId>()
        .one(conn)
        .await?;

    Ok(latest_before.unwrap_or(MessageId::ZERO))
}

/// Filters applied on top of the visibility rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFilter<'a> {
    pub type_code: Option<&'a str>,
    pub message_id: Option<MessageId>,
}

/// A message as the reader sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub group_id: GroupId,
    pub title: String,
    pub content: String,
    pub send_time: DateTimeUtc,
    #[serde(rename = "type")]
    pub type_code: String,
    pub type_name: String,
    pub is_read: bool,
}

#[derive(Debug, FromQueryResult)]
struct MessageRow {
    id: MessageId,
    group_id: GroupId,
    title: String,
    content: String,
    send_time: DateTimeUtc,
    type_code: String,
    type_name: Option<String>,
    last_read_message_id: Option<MessageId>,
}

impl From<MessageRow> for MessageView {
    fn from(row: MessageRow) -> Self {
        let is_read = row.last_read_message_id.is_some_and(|w| row.id <= w);
        Self {
            id: row.id,
            group_id: row.group_id,
            title: row.title,
            content: row.content,
            send_time: row.send_time,
            type_name: row.type_name.unwrap_or_else(|| row.type_code.clone()),
            type_code: row.type_code,
            is_read,
        }
    }
}

pub async fn count_visible<C>(
    conn: &C,
    viewer: &Viewer,
    filter: MessageFilter<'_>,
) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let mut stmt = visible_messages(viewer, filter);
    stmt.expr_as(
        Func::count(Expr::col((Message, MessageColumn::Id))),
        Alias::new(TOTAL),
    );
    run_count(conn, &stmt).await
}

pub async fn count_unread<C>(
    conn: &C,
    viewer: &Viewer,
    filter: MessageFilter<'_>,
) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let mut stmt = visible_messages(viewer, filter);
    stmt.cond_where(
        Condition::any()
            .add(Expr::col((Membership, MembershipColumn::Id)).is_null())
            .add(
                Expr::col((Message, MessageColumn::Id))
                    .gt(Expr::col((Membership, MembershipColumn::LastReadMessageId))),
            ),
    )
    .expr_as(
        Func::count(Expr::col((Message, MessageColumn::Id))),
        Alias::new(TOTAL),
    );
    run_count(conn, &stmt).await
}

/// Visible messages newest first: `send_time DESC`, ties by `id DESC`.
pub async fn list_visible<C>(
    conn: &C,
    viewer: &Viewer,
    filter: MessageFilter<'_>,
    page: PageRequest,
) -> Result<Vec<MessageView>, DbErr>
where
    C: ConnectionTrait,
{
    let mut stmt = visible_messages(viewer, filter);
    stmt.columns([
        (Message, MessageColumn::Id),
        (Message, MessageColumn::GroupId),
        (Message, MessageColumn::Title),
        (Message, MessageColumn::Content),
        (Message, MessageColumn::SendTime),
        (Message, MessageColumn::TypeCode),
    ])
    .column((MessageType, MessageTypeColumn::TypeName))
    .column((Membership, MembershipColumn::LastReadMessageId))
    .order_by((Message, MessageColumn::SendTime), Order::Desc)
    .order_by((Message, MessageColumn::Id), Order::Desc)
    .limit(page.page_size)
    .offset(page.offset());

    let builder = conn.get_database_backend();
    let rows = MessageRow::find_by_statement(builder.build(&stmt))
        .all(conn)
        .await?;

    Ok(rows.into_iter().map(MessageView::from).collect())
}

async fn run_count<C>(conn: &C, stmt: &SelectStatement) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let builder = conn.get_database_backend();
    let total = match conn.query_one(builder.build(stmt)).await? {
        Some(row) => row.try_get::<i64>("", TOTAL)?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or_default())
}

/// `msg_message` joined to its group, the viewer's live membership and the
/// message type, restricted to what the viewer may see. No projection yet.
fn visible_messages(viewer: &Viewer, filter: MessageFilter<'_>) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(Message)
        .inner_join(
            Group,
            Expr::col((Group, GroupColumn::Id)).equals((Message, MessageColumn::GroupId)),
        )
        .left_join(
            Membership,
            Condition::all()
                .add(
                    Expr::col((Membership, MembershipColumn::GroupId))
                        .equals((Message, MessageColumn::GroupId)),
                )
                .add(Expr::col((Membership, MembershipColumn::UserId)).eq(viewer.user_id))
                .add(Expr::col((Membership, MembershipColumn::IsDeleted)).eq(YesNo::N)),
        )
        .left_join(
            MessageType,
            Expr::col((MessageType, MessageTypeColumn::TypeCode))
                .equals((Message, MessageColumn::TypeCode)),
        )
        .and_where(Expr::col((Message, MessageColumn::IsDeleted)).eq(YesNo::N))
        .and_where(Expr::col((Group, GroupColumn::IsDeleted)).eq(YesNo::N))
        .cond_where(visibility(viewer));

    if let Some(type_code) = filter.type_code {
        stmt.and_where(Expr::col((Message, MessageColumn::TypeCode)).eq(type_code));
    }
    if let Some(message_id) = filter.message_id {
        stmt.and_where(Expr::col((Message, MessageColumn::Id)).eq(message_id));
    }

    stmt
}

fn visibility(viewer: &Viewer) -> Condition {
    let explicit = Condition::all()
        .add(Expr::col((Group, GroupColumn::IncludeAllUser)).eq(YesNo::N))
        .add(Expr::col((Membership, MembershipColumn::Id)).is_not_null())
        .add(
            Expr::col((Message, MessageColumn::Id))
                .gt(Expr::col((Membership, MembershipColumn::JoinMessageId))),
        );

    let mut any = Condition::any().add(explicit);
    if let Some(since) = viewer.all_users_since {
        any = any.add(
            Condition::all()
                .add(Expr::col((Group, GroupColumn::IncludeAllUser)).eq(YesNo::Y))
                .add(Expr::col((Message, MessageColumn::SendTime)).gte(since)),
        );
    }
    any
}

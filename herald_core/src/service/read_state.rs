use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use sea_orm::{
    prelude::DateTimeUtc,
    sea_query::{Expr, OnConflict},
    ConnectionTrait,
};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::{codes, Classified, ErrorClass},
    ids::{GroupId, MessageId, UserId},
    models::with_read_retry,
    service::{
        groups::{all_users_group_ids, find_live_group},
        members::{self, USER_BATCH_SIZE},
        visibility::{self, effective_join_point, is_visible, MessageFilter, MessageView, Viewer},
    },
};

#[derive(Debug, Error)]
pub enum ReadStateError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("message not found")]
    MessageNotFound,

    #[error("message is not visible to this user")]
    NotVisible,

    #[error("group not found")]
    GroupNotFound,

    #[error("group does not include all users")]
    NotAllUsersGroup,
}

impl Classified for ReadStateError {
    fn class(&self) -> ErrorClass {
        match self {
            ReadStateError::DbError(error) => error.class(),
            ReadStateError::MessageNotFound => ErrorClass::Resource,
            ReadStateError::NotVisible => ErrorClass::Business,
            ReadStateError::GroupNotFound => ErrorClass::Resource,
            ReadStateError::NotAllUsersGroup => ErrorClass::Business,
        }
    }

    fn code(&self) -> u32 {
        match self {
            ReadStateError::DbError(error) => error.code(),
            ReadStateError::MessageNotFound => codes::MESSAGE_NOT_FOUND,
            ReadStateError::NotVisible => codes::MESSAGE_NOT_VISIBLE,
            ReadStateError::GroupNotFound => codes::GROUP_NOT_FOUND,
            ReadStateError::NotAllUsersGroup => codes::INVALID_PARAMETER,
        }
    }
}

/// Unread counts and read watermarks.
#[derive(Clone)]
pub struct ReadStateService {
    db: DatabaseConnection,
}

impl ReadStateService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Number of visible messages above the user's watermark, over explicit
    /// memberships and eligible all-users groups alike.
    pub async fn unread_count(
        &self,
        user_id: UserId,
        type_code: Option<&str>,
    ) -> Result<u64, ReadStateError> {
        let db = &self.db;
        let filter = MessageFilter {
            type_code,
            ..Default::default()
        };

        let count = with_read_retry(|| async move {
            let viewer = Viewer::resolve(db, user_id).await?;
            visibility::count_unread(db, &viewer, filter).await
        })
        .await?;

        debug!("user {user_id}: {count} unread");
        Ok(count)
    }

    /// Moves the user's watermark for the message's group up to the message.
    /// Returns the resulting watermark, which never decreases.
    pub async fn mark_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<MessageId, ReadStateError> {
        let txn = self.db.begin().await?;
        let watermark = mark_read_in(&txn, user_id, message_id).await?;
        txn.commit().await?;
        Ok(watermark)
    }

    /// Moves every watermark of the user to the group's latest message.
    /// Returns how many watermarks moved.
    pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64, ReadStateError> {
        let txn = self.db.begin().await?;
        let viewer = Viewer::resolve(&txn, user_id).await?;

        let mut moved = 0;

        let explicit: Vec<(MembershipModel, Option<GroupModel>)> = Membership::find()
            .find_also_related(Group)
            .filter(MembershipColumn::UserId.eq(user_id))
            .filter(MembershipColumn::IsDeleted.eq(YesNo::N))
            .all(&txn)
            .await?;
        for (membership, group) in explicit {
            let Some(group) = group.filter(|g| g.is_live() && !g.includes_all_users()) else {
                continue;
            };
            moved += advance_watermark(&txn, &membership, group.latest_message_id).await?;
        }

        if let Some(since) = viewer.all_users_since {
            for group_id in all_users_group_ids(&txn).await? {
                let Some(group) = find_live_group(&txn, group_id).await? else {
                    continue;
                };
                let shadow = ensure_shadow_membership(&txn, &group, user_id, since).await?;
                moved += advance_watermark(&txn, &shadow, group.latest_message_id).await?;
            }
        }

        txn.commit().await?;

        info!("user {user_id}: marked all read, {moved} watermarks moved");
        Ok(moved)
    }

    /// Loads a message for reading and marks it read in the same call.
    pub async fn open_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<MessageView, ReadStateError> {
        let txn = self.db.begin().await?;
        mark_read_in(&txn, user_id, message_id).await?;

        let viewer = Viewer::resolve(&txn, user_id).await?;
        let filter = MessageFilter {
            message_id: Some(message_id),
            ..Default::default()
        };
        let view = visibility::list_visible(&txn, &viewer, filter, Default::default())
            .await?
            .into_iter()
            .next()
            .ok_or(ReadStateError::MessageNotFound)?;

        txn.commit().await?;
        Ok(view)
    }

    /// Writes shadow memberships for every active user of an all-users group
    /// that lacks one, walking users in batches. Existing rows are left alone.
    pub async fn materialize_all_users_group(&self, group_id: GroupId) -> Result<u64, ReadStateError> {
        let group = find_live_group(&self.db, group_id)
            .await?
            .ok_or(ReadStateError::GroupNotFound)?;
        if !group.includes_all_users() {
            return Err(ReadStateError::NotAllUsersGroup);
        }

        let db = &self.db;
        let group = &group;
        let counter = AtomicU64::new(0);
        let created = &counter;

        members::for_each_user_batched(db, USER_BATCH_SIZE, move |batch| async move {
            for user in batch {
                let join = effective_join_point(db, group.id, user.create_time).await?;
                let inserted = insert_shadow_if_absent(db, group.id, user.id, join).await?;
                created.fetch_add(inserted, Ordering::Relaxed);
            }
            Ok::<(), ReadStateError>(())
        })
        .await?;

        let created = counter.into_inner();
        info!("group {group_id}: materialized {created} shadow memberships");
        Ok(created)
    }
}

async fn mark_read_in<C>(
    conn: &C,
    user_id: UserId,
    message_id: MessageId,
) -> Result<MessageId, ReadStateError>
where
    C: ConnectionTrait,
{
    let message = Message::find_by_id(message_id)
        .filter(MessageColumn::IsDeleted.eq(YesNo::N))
        .one(conn)
        .await?
        .ok_or(ReadStateError::MessageNotFound)?;
    let group = find_live_group(conn, message.group_id)
        .await?
        .ok_or(ReadStateError::MessageNotFound)?;

    let viewer = Viewer::resolve(conn, user_id).await?;
    let membership = Membership::find()
        .filter(MembershipColumn::GroupId.eq(group.id))
        .filter(MembershipColumn::UserId.eq(user_id))
        .one(conn)
        .await?;

    if !is_visible(&viewer, &group, &message, membership.as_ref()) {
        return Err(ReadStateError::NotVisible);
    }

    let membership = match (group.includes_all_users(), membership, viewer.all_users_since) {
        (false, Some(membership), _) => membership,
        (true, _, Some(since)) => ensure_shadow_membership(conn, &group, user_id, since).await?,
        _ => return Err(ReadStateError::NotVisible),
    };

    advance_watermark(conn, &membership, message.id).await?;

    let watermark = membership.last_read_message_id.max(message.id);
    debug!("user {user_id}: group {} read up to {watermark}", group.id);
    Ok(watermark)
}

/// Conditional bump so concurrent readers can only move the watermark up.
async fn advance_watermark<C>(
    conn: &C,
    membership: &MembershipModel,
    to: MessageId,
) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    if to <= membership.last_read_message_id {
        return Ok(0);
    }

    let result = Membership::update_many()
        .col_expr(MembershipColumn::LastReadMessageId, Expr::value(to))
        .col_expr(MembershipColumn::UpdateTime, Expr::value(chrono::Utc::now()))
        .filter(MembershipColumn::Id.eq(membership.id))
        .filter(MembershipColumn::LastReadMessageId.lt(to))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// The user's live shadow row for an all-users group, created or recovered
/// at the user's effective join point when needed.
async fn ensure_shadow_membership<C>(
    conn: &C,
    group: &GroupModel,
    user_id: UserId,
    since: DateTimeUtc,
) -> Result<MembershipModel, DbErr>
where
    C: ConnectionTrait,
{
    let existing = find_membership(conn, group.id, user_id).await?;
    if let Some(membership) = existing.as_ref().filter(|m| m.is_live()) {
        return Ok(membership.clone());
    }

    let join = effective_join_point(conn, group.id, since).await?;
    match existing {
        Some(deleted) => {
            Membership::update_many()
                .col_expr(MembershipColumn::IsDeleted, Expr::value(YesNo::N))
                .col_expr(MembershipColumn::JoinMessageId, Expr::value(join))
                .col_expr(MembershipColumn::LastReadMessageId, Expr::value(join))
                .col_expr(MembershipColumn::UpdateUser, Expr::value(user_id))
                .col_expr(MembershipColumn::UpdateTime, Expr::value(chrono::Utc::now()))
                .filter(MembershipColumn::Id.eq(deleted.id))
                .exec(conn)
                .await?;
        }
        None => {
            insert_shadow_if_absent(conn, group.id, user_id, join).await?;
        }
    }

    find_membership(conn, group.id, user_id)
        .await?
        .ok_or_else(|| {
            DbErr::RecordNotFound(format!(
                "shadow membership of user {user_id} in group {}",
                group.id
            ))
        })
}

async fn insert_shadow_if_absent<C>(
    conn: &C,
    group_id: GroupId,
    user_id: UserId,
    join: MessageId,
) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    let row = MembershipActiveModel {
        group_id: Set(group_id),
        user_id: Set(user_id),
        join_message_id: Set(join),
        last_read_message_id: Set(join),
        is_deleted: Set(YesNo::N),
        create_user: Set(user_id),
        update_user: Set(user_id),
        create_time: Set(now),
        update_time: Set(now),
        ..Default::default()
    };

    Membership::insert(row)
        .on_conflict(
            OnConflict::columns([MembershipColumn::GroupId, MembershipColumn::UserId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
}

async fn find_membership<C>(
    conn: &C,
    group_id: GroupId,
    user_id: UserId,
) -> Result<Option<MembershipModel>, DbErr>
where
    C: ConnectionTrait,
{
    Membership::find()
        .filter(MembershipColumn::GroupId.eq(group_id))
        .filter(MembershipColumn::UserId.eq(user_id))
        .one(conn)
        .await
}

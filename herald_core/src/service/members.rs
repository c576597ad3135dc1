use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
};

use log::info;
use sea_orm::{
    sea_query::{Expr, Query},
    ConnectionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::{codes, Classified, ErrorClass},
    ids::{GroupId, UserId},
    models::{Page, PageRequest},
    service::groups::{find_live_group, lock_live_group},
};

/// Batch size used when walking the whole user base.
pub const USER_BATCH_SIZE: u64 = 200;

#[derive(Debug, Error)]
pub enum MembersServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("membership of an include-all-users group is implicit")]
    AllUsersGroup,

    #[error("unknown users: {0:?}")]
    UnknownUsers(Vec<UserId>),
}

impl Classified for MembersServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            MembersServiceError::DbError(error) => error.class(),
            MembersServiceError::GroupNotFound => ErrorClass::Resource,
            MembersServiceError::AllUsersGroup => ErrorClass::Business,
            MembersServiceError::UnknownUsers(_) => ErrorClass::Resource,
        }
    }

    fn code(&self) -> u32 {
        match self {
            MembersServiceError::DbError(error) => error.code(),
            MembersServiceError::GroupNotFound => codes::GROUP_NOT_FOUND,
            MembersServiceError::AllUsersGroup => codes::ALL_USERS_GROUP_MEMBERS,
            MembersServiceError::UnknownUsers(_) => codes::USER_NOT_FOUND,
        }
    }
}

/// How an add request was applied, per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUsersOutcome {
    pub created: Vec<UserId>,
    pub recovered: Vec<UserId>,
    pub unchanged: Vec<UserId>,
}

#[derive(Clone)]
pub struct MembersService {
    db: DatabaseConnection,
}

impl MembersService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Memberships (live and soft-deleted) of the given users in a group.
    pub async fn get_existing(
        &self,
        group_id: GroupId,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, MembershipModel>, MembersServiceError> {
        Ok(existing_memberships(&self.db, group_id, user_ids).await?)
    }

    /// Add users to an explicit group. New users get a fresh row, users who
    /// left get their row recovered; both start at the group's current
    /// latest message so no backlog shows up. Live members are untouched.
    pub async fn add_users(
        &self,
        group_id: GroupId,
        user_ids: &[UserId],
        actor: UserId,
    ) -> Result<AddUsersOutcome, MembersServiceError> {
        let user_ids = dedup(user_ids);

        let txn = self.db.begin().await?;

        let group = lock_live_group(&txn, group_id)
            .await?
            .ok_or(MembersServiceError::GroupNotFound)?;
        if group.includes_all_users() {
            return Err(MembersServiceError::AllUsersGroup);
        }

        let missing = missing_users(&txn, &user_ids).await?;
        if !missing.is_empty() {
            return Err(MembersServiceError::UnknownUsers(missing));
        }

        let outcome = apply_add_users(&txn, &group, &user_ids, actor).await?;

        txn.commit().await?;

        info!(
            "group {group_id}: {actor} added {} users, recovered {}, {} already members",
            outcome.created.len(),
            outcome.recovered.len(),
            outcome.unchanged.len()
        );
        Ok(outcome)
    }

    /// Soft-remove users from an explicit group. Already removed users are ignored.
    pub async fn remove_users(
        &self,
        group_id: GroupId,
        user_ids: &[UserId],
        actor: UserId,
    ) -> Result<u64, MembersServiceError> {
        let user_ids = dedup(user_ids);

        let txn = self.db.begin().await?;

        let group = find_live_group(&txn, group_id)
            .await?
            .ok_or(MembersServiceError::GroupNotFound)?;
        if group.includes_all_users() {
            return Err(MembersServiceError::AllUsersGroup);
        }

        let removed = if user_ids.is_empty() {
            0
        } else {
            Membership::update_many()
                .col_expr(MembershipColumn::IsDeleted, Expr::value(YesNo::Y))
                .col_expr(MembershipColumn::UpdateUser, Expr::value(actor))
                .col_expr(MembershipColumn::UpdateTime, Expr::value(chrono::Utc::now()))
                .filter(MembershipColumn::GroupId.eq(group_id))
                .filter(MembershipColumn::UserId.is_in(user_ids))
                .filter(MembershipColumn::IsDeleted.eq(YesNo::N))
                .exec(&txn)
                .await?
                .rows_affected
        };

        txn.commit().await?;

        info!("group {group_id}: {actor} removed {removed} members");
        Ok(removed)
    }

    /// Members of a group with their profiles. For an all-users group this is
    /// every active user.
    pub async fn list_members(
        &self,
        group_id: GroupId,
        page: PageRequest,
    ) -> Result<Page<UserModel>, MembersServiceError> {
        let group = find_live_group(&self.db, group_id)
            .await?
            .ok_or(MembersServiceError::GroupNotFound)?;

        let query = if group.includes_all_users() {
            User::find().filter(UserColumn::Status.eq(UserStatus::Active))
        } else {
            User::find()
                .inner_join(Membership)
                .filter(MembershipColumn::GroupId.eq(group_id))
                .filter(MembershipColumn::IsDeleted.eq(YesNo::N))
        };

        let paginator = query
            .order_by_asc(UserColumn::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.index()).await?;

        Ok(Page { rows, total })
    }

    /// Active users without a live membership in the group, optionally
    /// filtered by nickname. Nobody is outside an all-users group.
    pub async fn list_non_members(
        &self,
        group_id: GroupId,
        page: PageRequest,
        nickname: Option<&str>,
    ) -> Result<Page<UserModel>, MembersServiceError> {
        let group = find_live_group(&self.db, group_id)
            .await?
            .ok_or(MembersServiceError::GroupNotFound)?;
        if group.includes_all_users() {
            return Ok(Page {
                rows: Vec::new(),
                total: 0,
            });
        }

        let members = Query::select()
            .column(MembershipColumn::UserId)
            .from(Membership)
            .and_where(MembershipColumn::GroupId.eq(group_id))
            .and_where(MembershipColumn::IsDeleted.eq(YesNo::N))
            .to_owned();

        let mut query = User::find()
            .filter(UserColumn::Status.eq(UserStatus::Active))
            .filter(UserColumn::Id.not_in_subquery(members));
        if let Some(nickname) = nickname.map(str::trim).filter(|n| !n.is_empty()) {
            query = query.filter(UserColumn::Nickname.contains(nickname));
        }

        let paginator = query
            .order_by_asc(UserColumn::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.index()).await?;

        Ok(Page { rows, total })
    }

    pub async fn for_each_user_batched<F, Fut, E>(
        &self,
        batch_size: u64,
        f: F,
    ) -> Result<(), E>
    where
        F: FnMut(Vec<UserModel>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<DbErr>,
    {
        for_each_user_batched(&self.db, batch_size, f).await
    }
}

/// Walks active users in id order, `batch_size` at a time, so callers never
/// hold the whole user base in memory.
pub async fn for_each_user_batched<C, F, Fut, E>(
    conn: &C,
    batch_size: u64,
    mut f: F,
) -> Result<(), E>
where
    C: ConnectionTrait,
    F: FnMut(Vec<UserModel>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<DbErr>,
{
    let batch_size = batch_size.max(1);
    let mut after: Option<UserId> = None;

    loop {
        let mut query = User::find().filter(UserColumn::Status.eq(UserStatus::Active));
        if let Some(last) = after {
            query = query.filter(UserColumn::Id.gt(last));
        }
        let batch = query
            .order_by_asc(UserColumn::Id)
            .limit(batch_size)
            .all(conn)
            .await?;

        let Some(last) = batch.last().map(|u| u.id) else {
            return Ok(());
        };
        let done = (batch.len() as u64) < batch_size;

        f(batch).await?;

        if done {
            return Ok(());
        }
        after = Some(last);
    }
}

pub(crate) async fn existing_memberships<C>(
    conn: &C,
    group_id: GroupId,
    user_ids: &[UserId],
) -> Result<HashMap<UserId, MembershipModel>, DbErr>
where
    C: ConnectionTrait,
{
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = Membership::find()
        .filter(MembershipColumn::GroupId.eq(group_id))
        .filter(MembershipColumn::UserId.is_in(user_ids.iter().copied()))
        .all(conn)
        .await?;

    Ok(rows.into_iter().map(|m| (m.user_id, m)).collect())
}

/// Users from `user_ids` that are not known to the directory.
pub(crate) async fn missing_users<C>(conn: &C, user_ids: &[UserId]) -> Result<Vec<UserId>, DbErr>
where
    C: ConnectionTrait,
{
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let known: BTreeSet<UserId> = User::find()
        .select_only()
        .column(UserColumn::Id)
        .filter(UserColumn::Id.is_in(user_ids.iter().copied()))
        .into_tuple::<UserId>()
        .all(conn)
        .await?
        .into_iter()
        .collect();

    Ok(user_ids
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect())
}

/// Classify and apply an add request. Must run inside the caller's
/// transaction, with `group` read in that same transaction.
pub(crate) async fn apply_add_users<C>(
    conn: &C,
    group: &GroupModel,
    user_ids: &[UserId],
    actor: UserId,
) -> Result<AddUsersOutcome, DbErr>
where
    C: ConnectionTrait,
{
    let latest = group.latest_message_id;
    let existing = existing_memberships(conn, group.id, user_ids).await?;

    let mut outcome = AddUsersOutcome::default();
    let mut recover_ids = Vec::new();

    for &user_id in user_ids {
        match existing.get(&user_id) {
            Some(membership) if membership.is_live() => outcome.unchanged.push(user_id),
            Some(membership) => {
                recover_ids.push(membership.id);
                outcome.recovered.push(user_id);
            }
            None => {
                MembershipActiveModel {
                    group_id: Set(group.id),
                    user_id: Set(user_id),
                    join_message_id: Set(latest),
                    last_read_message_id: Set(latest),
                    is_deleted: Set(YesNo::N),
                    create_user: Set(actor),
                    update_user: Set(actor),
                    ..Default::default()
                }
                .insert(conn)
                .await?;
                outcome.created.push(user_id);
            }
        }
    }

    if !recover_ids.is_empty() {
        Membership::update_many()
            .col_expr(MembershipColumn::IsDeleted, Expr::value(YesNo::N))
            .col_expr(MembershipColumn::JoinMessageId, Expr::value(latest))
            .col_expr(MembershipColumn::LastReadMessageId, Expr::value(latest))
            .col_expr(MembershipColumn::UpdateUser, Expr::value(actor))
            .col_expr(MembershipColumn::UpdateTime, Expr::value(chrono::Utc::now()))
            .filter(MembershipColumn::Id.is_in(recover_ids))
            .exec(conn)
            .await?;
    }

    Ok(outcome)
}

fn dedup(user_ids: &[UserId]) -> Vec<UserId> {
    user_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

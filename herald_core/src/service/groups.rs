use std::collections::{BTreeSet, HashMap};

use log::info;
use sea_orm::{sea_query::Expr, ConnectionTrait, Select};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::{codes, is_unique_violation, Classified, ErrorClass},
    ids::{EventId, GroupId, MessageId, UserId},
    models::{Page, PageRequest},
    service::members::{self, AddUsersOutcome},
};

const MAX_GROUP_NAME_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum GroupsServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("group name {0:?} is already used by another group")]
    NameTaken(String),

    #[error("group name must be 1 to 128 characters")]
    InvalidName,

    #[error("an include-all-users group cannot have explicit members")]
    AllUsersGroupWithMembers,

    #[error("unknown users: {0:?}")]
    UnknownUsers(Vec<UserId>),
}

impl Classified for GroupsServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            GroupsServiceError::DbError(error) => error.class(),
            GroupsServiceError::GroupNotFound => ErrorClass::Resource,
            GroupsServiceError::NameTaken(_) => ErrorClass::Resource,
            GroupsServiceError::InvalidName => ErrorClass::Parameter,
            GroupsServiceError::AllUsersGroupWithMembers => ErrorClass::Business,
            GroupsServiceError::UnknownUsers(_) => ErrorClass::Resource,
        }
    }

    fn code(&self) -> u32 {
        match self {
            GroupsServiceError::DbError(error) => error.code(),
            GroupsServiceError::GroupNotFound => codes::GROUP_NOT_FOUND,
            GroupsServiceError::NameTaken(_) => codes::GROUP_NAME_TAKEN,
            GroupsServiceError::InvalidName => codes::INVALID_PARAMETER,
            GroupsServiceError::AllUsersGroupWithMembers => codes::ALL_USERS_GROUP_MEMBERS,
            GroupsServiceError::UnknownUsers(_) => codes::USER_NOT_FOUND,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub event_id: Option<EventId>,
    pub include_all_users: bool,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupScope {
    #[default]
    Active,
    Deleted,
    All,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFilter {
    pub name: Option<String>,
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub scope: GroupScope,
}

/// Admin listing row: the group plus its derived member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    #[serde(flatten)]
    pub group: GroupModel,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedGroup {
    pub group: GroupModel,
    pub members: AddUsersOutcome,
}

#[derive(Clone)]
pub struct GroupsService {
    db: DatabaseConnection,
}

impl GroupsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a group and its initial members in one transaction.
    pub async fn create_group(
        &self,
        new_group: NewGroup,
        actor: UserId,
    ) -> Result<CreatedGroup, GroupsServiceError> {
        let name = normalize_name(&new_group.name)?;
        if new_group.include_all_users && !new_group.user_ids.is_empty() {
            return Err(GroupsServiceError::AllUsersGroupWithMembers);
        }

        let txn = self.db.begin().await?;

        ensure_name_free(&txn, &name, None).await?;

        let user_ids: Vec<UserId> = new_group
            .user_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let missing = members::missing_users(&txn, &user_ids).await?;
        if !missing.is_empty() {
            return Err(GroupsServiceError::UnknownUsers(missing));
        }

        let group = GroupActiveModel {
            group_name: Set(name.clone()),
            live_name: Set(Some(name.clone())),
            description: Set(new_group.description),
            event_id: Set(new_group.event_id),
            include_all_user: Set(new_group.include_all_users.into()),
            latest_message_id: Set(MessageId::ZERO),
            is_deleted: Set(YesNo::N),
            create_user: Set(actor),
            update_user: Set(actor),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| name_conflict(err, &name))?;

        let outcome = members::apply_add_users(&txn, &group, &user_ids, actor).await?;

        txn.commit().await?;

        info!(
            "group {} ({:?}) created by {actor}: include_all_user={:?}, {} initial members",
            group.id,
            group.group_name,
            group.include_all_user,
            outcome.created.len()
        );

        Ok(CreatedGroup {
            group,
            members: outcome,
        })
    }

    /// Rename or re-describe a live group.
    pub async fn update_group(
        &self,
        group_id: GroupId,
        changes: GroupChanges,
        actor: UserId,
    ) -> Result<GroupModel, GroupsServiceError> {
        let txn = self.db.begin().await?;

        let group = find_live_group(&txn, group_id)
            .await?
            .ok_or(GroupsServiceError::GroupNotFound)?;

        let mut name = group.group_name.clone();
        let mut active: GroupActiveModel = group.clone().into();

        if let Some(requested) = changes.name {
            let requested = normalize_name(&requested)?;
            if requested != group.group_name {
                ensure_name_free(&txn, &requested, Some(group_id)).await?;
                active.group_name = Set(requested.clone());
                active.live_name = Set(Some(requested.clone()));
                name = requested;
            }
        }

        if let Some(description) = changes.description {
            active.description = Set(description);
        }

        active.update_user = Set(actor);
        let updated = active
            .update(&txn)
            .await
            .map_err(|err| name_conflict(err, &name))?;

        txn.commit().await?;
        Ok(updated)
    }

    /// Soft-delete a group and every membership it owns in one write.
    pub async fn delete_group(
        &self,
        group_id: GroupId,
        actor: UserId,
    ) -> Result<(), GroupsServiceError> {
        let txn = self.db.begin().await?;

        let group = find_live_group(&txn, group_id)
            .await?
            .ok_or(GroupsServiceError::GroupNotFound)?;

        let mut active: GroupActiveModel = group.into();
        active.is_deleted = Set(YesNo::Y);
        active.live_name = Set(None);
        active.update_user = Set(actor);
        active.update(&txn).await?;

        let memberships = Membership::update_many()
            .col_expr(MembershipColumn::IsDeleted, Expr::value(YesNo::Y))
            .col_expr(MembershipColumn::UpdateUser, Expr::value(actor))
            .col_expr(MembershipColumn::UpdateTime, Expr::value(chrono::Utc::now()))
            .filter(MembershipColumn::GroupId.eq(group_id))
            .filter(MembershipColumn::IsDeleted.eq(YesNo::N))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            "group {group_id} deleted by {actor}; {} memberships closed",
            memberships.rows_affected
        );
        Ok(())
    }

    /// Get a live group by id.
    pub async fn get_group(
        &self,
        group_id: GroupId,
    ) -> Result<Option<GroupModel>, GroupsServiceError> {
        Ok(find_live_group(&self.db, group_id).await?)
    }

    pub async fn list_groups(
        &self,
        page: PageRequest,
        filter: GroupFilter,
    ) -> Result<Page<GroupRow>, GroupsServiceError> {
        let mut query = Group::find();

        query = match filter.scope {
            GroupScope::Active => query.filter(GroupColumn::IsDeleted.eq(YesNo::N)),
            GroupScope::Deleted => query.filter(GroupColumn::IsDeleted.eq(YesNo::Y)),
            GroupScope::All => query,
        };

        if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            query = query.filter(GroupColumn::GroupName.contains(name));
        }

        if let Some(event_id) = filter.event_id {
            query = query.filter(GroupColumn::EventId.eq(event_id));
        }

        let paginator = query
            .order_by_desc(GroupColumn::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let groups = paginator.fetch_page(page.index()).await?;

        let counts = self.member_counts(&groups).await?;
        let rows = groups
            .into_iter()
            .map(|group| GroupRow {
                member_count: counts.get(&group.id).copied().unwrap_or(0),
                group,
            })
            .collect();

        Ok(Page { rows, total })
    }

    /// Ids of live include-all-users groups. A newly registered user is
    /// implicitly a member of each of these.
    pub async fn list_all_users_group_ids(&self) -> Result<Vec<GroupId>, GroupsServiceError> {
        Ok(all_users_group_ids(&self.db).await?)
    }

    /// Live memberships per explicit group; active users for all-users groups.
    /// Deleted groups count zero.
    async fn member_counts(
        &self,
        groups: &[GroupModel],
    ) -> Result<HashMap<GroupId, u64>, DbErr> {
        let explicit: Vec<GroupId> = groups
            .iter()
            .filter(|g| g.is_live() && !g.includes_all_users())
            .map(|g| g.id)
            .collect();

        let mut counts: HashMap<GroupId, u64> = HashMap::new();

        if !explicit.is_empty() {
            let rows: Vec<(GroupId, i64)> = Membership::find()
                .select_only()
                .column(MembershipColumn::GroupId)
                .column_as(Expr::col(MembershipColumn::Id).count(), "member_count")
                .filter(MembershipColumn::GroupId.is_in(explicit))
                .filter(MembershipColumn::IsDeleted.eq(YesNo::N))
                .group_by(MembershipColumn::GroupId)
                .into_tuple()
                .all(&self.db)
                .await?;
            counts.extend(rows.into_iter().map(|(id, n)| (id, n.max(0) as u64)));
        }

        if groups.iter().any(|g| g.is_live() && g.includes_all_users()) {
            let active_users = User::find()
                .filter(UserColumn::Status.eq(UserStatus::Active))
                .count(&self.db)
                .await?;
            for group in groups.iter().filter(|g| g.is_live() && g.includes_all_users()) {
                counts.insert(group.id, active_users);
            }
        }

        Ok(counts)
    }
}

pub(crate) async fn find_live_group<C>(
    conn: &C,
    group_id: GroupId,
) -> Result<Option<GroupModel>, DbErr>
where
    C: ConnectionTrait,
{
    Group::find_by_id(group_id)
        .filter(GroupColumn::IsDeleted.eq(YesNo::N))
        .one(conn)
        .await
}

/// Like [`find_live_group`] but holds the row lock until the transaction
/// ends, so writers of one group run one after another. No-op on SQLite,
/// which already serializes writers.
pub(crate) async fn lock_live_group<C>(
    conn: &C,
    group_id: GroupId,
) -> Result<Option<GroupModel>, DbErr>
where
    C: ConnectionTrait,
{
    locked_live_group(group_id).one(conn).await
}

fn locked_live_group(group_id: GroupId) -> Select<Group> {
    Group::find_by_id(group_id)
        .filter(GroupColumn::IsDeleted.eq(YesNo::N))
        .lock_exclusive()
}

pub(crate) async fn all_users_group_ids<C>(conn: &C) -> Result<Vec<GroupId>, DbErr>
where
    C: ConnectionTrait,
{
    Group::find()
        .select_only()
        .column(GroupColumn::Id)
        .filter(GroupColumn::IncludeAllUser.eq(YesNo::Y))
        .filter(GroupColumn::IsDeleted.eq(YesNo::N))
        .order_by_asc(GroupColumn::Id)
        .into_tuple()
        .all(conn)
        .await
}

fn normalize_name(name: &str) -> Result<String, GroupsServiceError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(GroupsServiceError::InvalidName);
    }
    Ok(name.to_string())
}

/// Two concurrent writers can both pass `ensure_name_free`; the unique
/// `live_name` index turns the loser's write into this error.
fn name_conflict(err: DbErr, name: &str) -> GroupsServiceError {
    if is_unique_violation(&err) {
        GroupsServiceError::NameTaken(name.to_string())
    } else {
        GroupsServiceError::DbError(err)
    }
}

async fn ensure_name_free<C>(
    conn: &C,
    name: &str,
    except: Option<GroupId>,
) -> Result<(), GroupsServiceError>
where
    C: ConnectionTrait,
{
    let mut query = Group::find()
        .filter(GroupColumn::GroupName.eq(name))
        .filter(GroupColumn::IsDeleted.eq(YesNo::N));
    if let Some(group_id) = except {
        query = query.filter(GroupColumn::Id.ne(group_id));
    }

    if query.one(conn).await?.is_some() {
        return Err(GroupsServiceError::NameTaken(name.to_string()));
    }
    Ok(())
}

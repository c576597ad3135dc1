//! End-to-end runs across the registry, ledger, store and read state,
//! checking the storage-wide invariants after every step.

use crate::{
    entity::prelude::*,
    ids::{GroupId, MessageId, UserId},
    models::PageRequest,
    service::{
        groups::{GroupFilter, GroupScope, GroupsService, NewGroup},
        members::MembersService,
        messages::{MessagesService, NewMessage},
        read_state::ReadStateService,
        visibility::{is_visible, Viewer},
    },
    test_utils::{at, create_message_type, create_test_user_at, setup_test_db, ADMIN},
};

struct Platform {
    db: DatabaseConnection,
    groups: GroupsService,
    members: MembersService,
    messages: MessagesService,
    reads: ReadStateService,
}

impl Platform {
    async fn new() -> Self {
        let db = setup_test_db().await;
        create_message_type(&db, "notice").await;
        Self {
            groups: GroupsService::new(db.clone()),
            members: MembersService::new(db.clone()),
            messages: MessagesService::new(db.clone()),
            reads: ReadStateService::new(db.clone()),
            db,
        }
    }

    async fn create_group(&self, name: &str, include_all_users: bool, users: &[i64]) -> GroupId {
        self.groups
            .create_group(
                NewGroup {
                    name: name.into(),
                    include_all_users,
                    user_ids: users.iter().copied().map(UserId::new).collect(),
                    ..Default::default()
                },
                ADMIN,
            )
            .await
            .unwrap()
            .group
            .id
    }

    async fn append(&self, group_id: GroupId, secs: i64) -> MessageId {
        self.messages
            .append_message(
                group_id,
                NewMessage {
                    title: format!("sent at {secs}"),
                    content: "body".into(),
                    type_code: "notice".into(),
                    send_time: Some(at(secs)),
                },
                ADMIN,
            )
            .await
            .unwrap()
            .id
    }

    async fn unread(&self, raw: i64) -> u64 {
        self.reads.unread_count(UserId::new(raw), None).await.unwrap()
    }

    async fn membership(&self, group_id: GroupId, raw: i64) -> MembershipModel {
        self.members
            .get_existing(group_id, &[UserId::new(raw)])
            .await
            .unwrap()
            .remove(&UserId::new(raw))
            .unwrap()
    }

    async fn latest(&self, group_id: GroupId) -> MessageId {
        Group::find_by_id(group_id)
            .one(&self.db)
            .await
            .unwrap()
            .unwrap()
            .latest_message_id
    }

    /// Watermark ordering, message ids under the group maximum, pair and name
    /// uniqueness, and unread counts matching a brute-force recount.
    async fn check_invariants(&self) {
        let groups = Group::find().all(&self.db).await.unwrap();
        let memberships = Membership::find().all(&self.db).await.unwrap();
        let messages = Message::find().all(&self.db).await.unwrap();
        let users = User::find().all(&self.db).await.unwrap();
        let group = |id: GroupId| groups.iter().find(|g| g.id == id).unwrap();

        for m in memberships.iter().filter(|m| m.is_live()) {
            assert!(m.join_message_id <= m.last_read_message_id, "{m:?}");
            assert!(m.last_read_message_id <= group(m.group_id).latest_message_id, "{m:?}");
            let twins = memberships
                .iter()
                .filter(|o| o.is_live() && o.group_id == m.group_id && o.user_id == m.user_id)
                .count();
            assert_eq!(twins, 1);
        }

        for message in &messages {
            assert!(message.id <= group(message.group_id).latest_message_id);
        }

        let live: Vec<&GroupModel> = groups.iter().filter(|g| g.is_live()).collect();
        for g in &live {
            assert_eq!(live.iter().filter(|o| o.group_name == g.group_name).count(), 1);
        }

        for user in &users {
            let viewer = Viewer::from_user(user.id, Some(user));
            let expected = messages
                .iter()
                .filter(|message| {
                    let owner = group(message.group_id);
                    let row = memberships
                        .iter()
                        .find(|m| m.group_id == owner.id && m.user_id == user.id);
                    if !is_visible(&viewer, owner, message, row) {
                        return false;
                    }
                    match row.filter(|m| m.is_live()) {
                        Some(m) => message.id > m.last_read_message_id,
                        None => true,
                    }
                })
                .count() as u64;
            assert_eq!(
                self.reads.unread_count(user.id, None).await.unwrap(),
                expected,
                "unread count of user {}",
                user.id
            );
        }
    }
}

#[tokio::test]
async fn test_distribution_lifecycle() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 10, at(0)).await;
    create_test_user_at(&p.db, 20, at(0)).await;

    // explicit group starts empty with zeroed watermarks
    let g1 = p.create_group("G1", false, &[10, 20]).await;
    assert_eq!(p.latest(g1).await, MessageId::ZERO);
    for raw in [10, 20] {
        let m = p.membership(g1, raw).await;
        assert_eq!(m.join_message_id, MessageId::ZERO);
        assert_eq!(m.last_read_message_id, MessageId::ZERO);
    }
    p.check_invariants().await;

    let m1 = p.append(g1, 10).await;
    let m2 = p.append(g1, 20).await;
    assert_eq!(p.latest(g1).await, m2);
    assert_eq!(p.unread(10).await, 2);
    p.check_invariants().await;

    p.reads.mark_read(UserId::new(10), m1).await.unwrap();
    assert_eq!(p.membership(g1, 10).await.last_read_message_id, m1);
    assert_eq!(p.unread(10).await, 1);
    p.reads.mark_read(UserId::new(10), m2).await.unwrap();
    assert_eq!(p.unread(10).await, 0);
    p.check_invariants().await;

    // leave, miss a message, come back without backlog
    p.members
        .remove_users(g1, &[UserId::new(10)], ADMIN)
        .await
        .unwrap();
    assert_eq!(p.unread(10).await, 0);
    let m3 = p.append(g1, 30).await;
    assert_eq!(p.unread(10).await, 0);

    p.members
        .add_users(g1, &[UserId::new(10)], ADMIN)
        .await
        .unwrap();
    let back = p.membership(g1, 10).await;
    assert_eq!(back.join_message_id, m3);
    assert_eq!(back.last_read_message_id, m3);
    assert_eq!(p.unread(10).await, 0);

    p.append(g1, 40).await;
    assert_eq!(p.unread(10).await, 1);
    p.check_invariants().await;

    // all-users group resolves its audience by account time
    let all = p.create_group("All", true, &[]).await;
    create_test_user_at(&p.db, 30, at(45)).await;
    p.append(all, 50).await;
    assert_eq!(p.unread(30).await, 1);
    create_test_user_at(&p.db, 40, at(55)).await;
    p.append(all, 60).await;
    assert_eq!(p.unread(30).await, 2);
    assert_eq!(p.unread(40).await, 1);
    p.check_invariants().await;

    // deleting G1 hides it and its unread messages, keeps the messages
    let before_delete = p.unread(10).await;
    p.groups.delete_group(g1, ADMIN).await.unwrap();

    let active = p
        .groups
        .list_groups(PageRequest::default(), GroupFilter::default())
        .await
        .unwrap();
    assert!(active.rows.iter().all(|row| row.group.id != g1));

    let deleted = p
        .groups
        .list_groups(
            PageRequest::default(),
            GroupFilter {
                scope: GroupScope::Deleted,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let row = deleted.rows.iter().find(|row| row.group.id == g1).unwrap();
    assert_eq!(row.member_count, 0);

    let stored = Message::find()
        .filter(MessageColumn::GroupId.eq(g1))
        .count(&p.db)
        .await
        .unwrap();
    assert_eq!(stored, 4);

    // user 10 is also an all-users reader of M5 and M6
    assert_eq!(before_delete, 3);
    assert_eq!(p.unread(10).await, 2);
    p.check_invariants().await;
}

#[tokio::test]
async fn test_add_remove_add_resets_to_latest() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 1, at(0)).await;
    create_test_user_at(&p.db, 2, at(0)).await;
    let g = p.create_group("G", false, &[]).await;
    let ids = [UserId::new(1), UserId::new(2)];

    p.members.add_users(g, &ids, ADMIN).await.unwrap();
    p.append(g, 10).await;
    p.members.remove_users(g, &ids, ADMIN).await.unwrap();
    let latest = p.append(g, 20).await;
    let outcome = p.members.add_users(g, &ids, ADMIN).await.unwrap();

    assert_eq!(outcome.recovered, ids.to_vec());
    for raw in [1, 2] {
        let m = p.membership(g, raw).await;
        assert!(m.is_live());
        assert_eq!(m.join_message_id, latest);
        assert_eq!(m.last_read_message_id, latest);
    }
    p.check_invariants().await;
}

#[tokio::test]
async fn test_adding_live_member_keeps_watermarks() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 1, at(0)).await;
    let g = p.create_group("G", false, &[1]).await;
    let m1 = p.append(g, 10).await;
    p.append(g, 20).await;
    p.reads.mark_read(UserId::new(1), m1).await.unwrap();

    let outcome = p.members.add_users(g, &[UserId::new(1)], ADMIN).await.unwrap();
    assert_eq!(outcome.unchanged, vec![UserId::new(1)]);

    let m = p.membership(g, 1).await;
    assert_eq!(m.join_message_id, MessageId::ZERO);
    assert_eq!(m.last_read_message_id, m1);
    assert_eq!(p.unread(1).await, 1);
}

#[tokio::test]
async fn test_mark_all_read_twice_changes_nothing_more() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 1, at(0)).await;
    let g = p.create_group("G", false, &[1]).await;
    let all = p.create_group("All", true, &[]).await;
    p.append(g, 10).await;
    p.append(all, 20).await;
    p.append(g, 30).await;

    p.reads.mark_all_read(UserId::new(1)).await.unwrap();
    let first = (p.membership(g, 1).await, p.membership(all, 1).await);
    p.reads.mark_all_read(UserId::new(1)).await.unwrap();
    let second = (p.membership(g, 1).await, p.membership(all, 1).await);

    assert_eq!(first.0.last_read_message_id, second.0.last_read_message_id);
    assert_eq!(first.1.last_read_message_id, second.1.last_read_message_id);
    assert_eq!(p.unread(1).await, 0);
    p.check_invariants().await;
}

#[tokio::test]
async fn test_watermark_never_moves_back() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 1, at(0)).await;
    let g = p.create_group("G", false, &[1]).await;
    let ids = [p.append(g, 10).await, p.append(g, 20).await, p.append(g, 30).await];

    let mut highest = MessageId::ZERO;
    for id in [ids[1], ids[0], ids[2], ids[1]] {
        let watermark = p.reads.mark_read(UserId::new(1), id).await.unwrap();
        assert!(watermark >= highest);
        highest = watermark;
    }
    assert_eq!(highest, ids[2]);
    p.check_invariants().await;
}

#[tokio::test]
async fn test_all_users_group_created_after_registration() {
    let p = Platform::new().await;
    create_test_user_at(&p.db, 1, at(0)).await;
    let early = p.create_group("Early", true, &[]).await;
    p.append(early, 5).await;

    let late = p.create_group("Late", true, &[]).await;
    for secs in [10, 20, 30] {
        p.append(late, secs).await;
    }

    let listed = p
        .messages
        .list_messages_for_user(UserId::new(1), PageRequest::default(), None)
        .await
        .unwrap();
    assert_eq!(listed.total, 4);
    assert_eq!(p.unread(1).await, 4);
    p.check_invariants().await;
}

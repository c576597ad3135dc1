//! Races on a file-backed pool. SQLite may fail some writers with busy or
//! stale-snapshot errors; whatever succeeds must leave the store consistent.

use crate::{
    entity::prelude::*,
    ids::{GroupId, MessageId, UserId},
    service::{
        groups::{GroupsService, GroupsServiceError, NewGroup},
        messages::{MessagesService, NewMessage},
        read_state::ReadStateService,
    },
    test_utils::{at, create_message_type, create_test_user, setup_pooled_test_db, ADMIN},
};

const WRITERS: usize = 8;

async fn group_with_reader(db: &DatabaseConnection, reader: UserId) -> GroupId {
    GroupsService::new(db.clone())
        .create_group(
            NewGroup {
                name: "Race".into(),
                user_ids: vec![reader],
                ..Default::default()
            },
            ADMIN,
        )
        .await
        .unwrap()
        .group
        .id
}

fn notice(title: String, send_time: Option<chrono::DateTime<chrono::Utc>>) -> NewMessage {
    NewMessage {
        title,
        content: "body".into(),
        type_code: "notice".into(),
        send_time,
    }
}

#[tokio::test]
async fn test_concurrent_creates_leave_one_live_name() {
    let (_dir, db) = setup_pooled_test_db(4).await;
    let groups = GroupsService::new(db.clone());

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let groups = groups.clone();
            tokio::spawn(async move {
                groups
                    .create_group(
                        NewGroup {
                            name: "Weekly".into(),
                            ..Default::default()
                        },
                        ADMIN,
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(GroupsServiceError::NameTaken(name)) => assert_eq!(name, "Weekly"),
            Err(GroupsServiceError::DbError(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);

    let live = Group::find()
        .filter(GroupColumn::GroupName.eq("Weekly"))
        .filter(GroupColumn::IsDeleted.eq(YesNo::N))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn test_concurrent_appends_keep_group_order() {
    let (_dir, db) = setup_pooled_test_db(4).await;
    create_message_type(&db, "notice").await;
    let reader = create_test_user(&db, 10).await;
    let group_id = group_with_reader(&db, reader).await;
    let messages = MessagesService::new(db.clone());

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let messages = messages.clone();
            tokio::spawn(async move {
                messages
                    .append_message(group_id, notice(format!("m{n}"), None), ADMIN)
                    .await
            })
        })
        .collect();

    let mut appended = Vec::new();
    for handle in handles {
        if let Ok(message) = handle.await.unwrap() {
            appended.push(message.id);
        }
    }
    assert!(!appended.is_empty());

    let stored = Message::find()
        .filter(MessageColumn::GroupId.eq(group_id))
        .order_by_asc(MessageColumn::Id)
        .all(&db)
        .await
        .unwrap();
    assert_eq!(stored.len(), appended.len());
    for pair in stored.windows(2) {
        assert!(pair[0].send_time <= pair[1].send_time, "{pair:?}");
    }

    let group = Group::find_by_id(group_id).one(&db).await.unwrap().unwrap();
    assert_eq!(Some(group.latest_message_id), stored.last().map(|m| m.id));
}

#[tokio::test]
async fn test_concurrent_mark_read_only_moves_forward() {
    let (_dir, db) = setup_pooled_test_db(4).await;
    create_message_type(&db, "notice").await;
    let reader = create_test_user(&db, 10).await;
    let group_id = group_with_reader(&db, reader).await;

    let messages = MessagesService::new(db.clone());
    let mut ids = Vec::new();
    for n in 0..WRITERS {
        let secs = (n as i64 + 1) * 10;
        let message = messages
            .append_message(group_id, notice(format!("m{n}"), Some(at(secs))), ADMIN)
            .await
            .unwrap();
        ids.push(message.id);
    }

    let reads = ReadStateService::new(db.clone());
    // newest first, so late finishers carry lower ids
    let handles: Vec<_> = ids
        .iter()
        .rev()
        .map(|&id| {
            let reads = reads.clone();
            tokio::spawn(async move { reads.mark_read(reader, id).await })
        })
        .collect();

    let mut returned: Vec<MessageId> = Vec::new();
    for handle in handles {
        if let Ok(watermark) = handle.await.unwrap() {
            returned.push(watermark);
        }
    }
    assert!(!returned.is_empty());

    let membership = Membership::find()
        .filter(MembershipColumn::GroupId.eq(group_id))
        .filter(MembershipColumn::UserId.eq(reader))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let watermark = membership.last_read_message_id;
    assert_eq!(returned.iter().max(), Some(&watermark));
    assert!(returned.iter().all(|w| *w <= watermark));
    assert!(watermark <= *ids.last().unwrap());
}

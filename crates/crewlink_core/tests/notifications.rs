use crewlink_core::db::open_db_in_memory;
use crewlink_core::model::chat::MessageKind;
use crewlink_core::model::notification::{EntityKind, EntityRef, NotificationKind, ResolvedSource};
use crewlink_core::model::org::{NewTask, Task};
use crewlink_core::model::user::{NewUser, UserId};
use crewlink_core::repo::access_repo::SqliteAccessRepository;
use crewlink_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crewlink_core::repo::membership_repo::{MembershipRepository, SqliteMembershipRepository};
use crewlink_core::repo::message_repo::SqliteMessageRepository;
use crewlink_core::repo::notification_repo::SqliteNotificationRepository;
use crewlink_core::{
    AccessResolver, CoreConfig, ErrorKind, MessageService, NotificationService,
};
use rusqlite::Connection;
use uuid::Uuid;

fn create_user(conn: &Connection, name: &str) -> UserId {
    SqliteEntityRepository::try_new(conn)
        .unwrap()
        .create_user(&NewUser::new(name, format!("{name}@crew.test"), "hash"))
        .unwrap()
        .id
}

fn notifications(conn: &Connection) -> NotificationService<SqliteNotificationRepository<'_>> {
    NotificationService::new(SqliteNotificationRepository::try_new(conn).unwrap())
}

fn create_task(conn: &Connection) -> Task {
    let entities = SqliteEntityRepository::try_new(conn).unwrap();
    let cluster = entities.create_cluster("Acme", "ACME").unwrap();
    let project = entities.create_project(cluster.id, "Apollo").unwrap();
    entities
        .create_task(&NewTask::new(project.id, "Write launch notes"))
        .unwrap()
}

#[test]
fn notify_never_deduplicates() {
    let conn = open_db_in_memory().unwrap();
    let bob = create_user(&conn, "bob");
    let alice = create_user(&conn, "alice");
    let service = notifications(&conn);
    let entity = EntityRef::task(Uuid::new_v4());

    let first = service
        .notify(bob, Some(alice), entity, NotificationKind::Assignment, "ping")
        .unwrap();
    let second = service
        .notify(bob, Some(alice), entity, NotificationKind::Assignment, "ping")
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(service.unread_count(bob).unwrap(), 2);

    let err = service
        .notify(Uuid::new_v4(), None, entity, NotificationKind::Mention, "nobody")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn only_the_target_can_mark_a_notification_read() {
    let conn = open_db_in_memory().unwrap();
    let bob = create_user(&conn, "bob");
    let mallory = create_user(&conn, "mallory");
    let service = notifications(&conn);
    let notification = service
        .notify(
            bob,
            None,
            EntityRef::message(Uuid::new_v4()),
            NotificationKind::Mention,
            "hello",
        )
        .unwrap();

    let err = service.mark_read(notification.id, mallory).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(!service.get(notification.id).unwrap().is_read);

    service.mark_read(notification.id, bob).unwrap();
    service.mark_read(notification.id, bob).unwrap();
    assert!(service.get(notification.id).unwrap().is_read);
    assert_eq!(service.unread_count(bob).unwrap(), 0);

    let err = service.mark_read(Uuid::new_v4(), bob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn feed_lists_newest_first_and_filters_unread() {
    let conn = open_db_in_memory().unwrap();
    let bob = create_user(&conn, "bob");
    let service = notifications(&conn);
    let ids: Vec<_> = (0..3)
        .map(|index| {
            service
                .notify(
                    bob,
                    None,
                    EntityRef::task(Uuid::new_v4()),
                    NotificationKind::Assignment,
                    format!("n{index}"),
                )
                .unwrap()
                .id
        })
        .collect();
    service.mark_read(ids[2], bob).unwrap();

    let feed = service.list_for_user(bob, false, None).unwrap();
    assert_eq!(
        feed.iter().map(|n| n.id).collect::<Vec<_>>(),
        vec![ids[2], ids[1], ids[0]]
    );
    let unread = service.list_for_user(bob, true, Some(1)).unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, ids[1]);

    assert_eq!(service.mark_all_read(bob).unwrap(), 2);
    assert_eq!(service.unread_count(bob).unwrap(), 0);
}

#[test]
fn assignment_notifies_only_newly_assigned_users() {
    let conn = open_db_in_memory().unwrap();
    let task = create_task(&conn);
    let lead = create_user(&conn, "lead");
    let bob = create_user(&conn, "bob");
    let carol = create_user(&conn, "carol");
    let service = notifications(&conn);

    let assigned = service.assign_task(task.id, lead, &[bob, bob]).unwrap();
    assert_eq!(assigned, vec![bob]);
    let assigned = service.assign_task(task.id, lead, &[bob, carol]).unwrap();
    assert_eq!(assigned, vec![carol]);

    assert_eq!(service.unread_count(bob).unwrap(), 1);
    assert_eq!(service.unread_count(carol).unwrap(), 1);
    let notification = &service.list_for_user(bob, false, None).unwrap()[0];
    assert_eq!(notification.kind, NotificationKind::Assignment);
    assert_eq!(notification.entity, EntityRef::task(task.id));
    assert_eq!(notification.source_user_id, Some(lead));

    let mut assignees = service.list_assignees(task.id).unwrap();
    assignees.sort();
    let mut expected = vec![bob, carol];
    expected.sort();
    assert_eq!(assignees, expected);

    assert!(service.unassign_task(task.id, bob).unwrap());
    assert!(!service.unassign_task(task.id, bob).unwrap());
    assert_eq!(service.assign_task(task.id, lead, &[bob]).unwrap(), vec![bob]);
    assert_eq!(service.unread_count(bob).unwrap(), 2);
}

#[test]
fn assignment_is_all_or_nothing() {
    let conn = open_db_in_memory().unwrap();
    let task = create_task(&conn);
    let lead = create_user(&conn, "lead");
    let bob = create_user(&conn, "bob");
    let retired = create_user(&conn, "retired");
    SqliteEntityRepository::try_new(&conn)
        .unwrap()
        .deactivate_user(retired)
        .unwrap();
    let service = notifications(&conn);

    let err = service.assign_task(task.id, lead, &[bob, retired]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(service.list_assignees(task.id).unwrap().is_empty());
    assert_eq!(service.unread_count(bob).unwrap(), 0);

    let err = service.assign_task(Uuid::new_v4(), lead, &[bob]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn dangling_source_resolves_to_unavailable() {
    let conn = open_db_in_memory().unwrap();
    let task = create_task(&conn);
    let lead = create_user(&conn, "lead");
    let bob = create_user(&conn, "bob");
    let service = notifications(&conn);
    service.assign_task(task.id, lead, &[bob]).unwrap();
    let notification = service.list_for_user(bob, false, None).unwrap().remove(0);

    match service.resolve_source(&notification).unwrap() {
        ResolvedSource::Task(resolved) => assert_eq!(resolved.id, task.id),
        other => panic!("unexpected source: {other:?}"),
    }

    SqliteEntityRepository::try_new(&conn)
        .unwrap()
        .delete_project(task.project_id)
        .unwrap();
    assert_eq!(
        service.resolve_source(&notification).unwrap(),
        ResolvedSource::Unavailable
    );
    assert!(!service.get(notification.id).unwrap().is_read);
}

#[test]
fn mentions_notify_distinct_audience_members_only() {
    let conn = open_db_in_memory().unwrap();
    let entities = SqliteEntityRepository::try_new(&conn).unwrap();
    let memberships = SqliteMembershipRepository::try_new(&conn).unwrap();
    let cluster = entities.create_cluster("Acme", "ACME").unwrap().id;
    let chat = entities.ensure_cluster_chat(cluster).unwrap();
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let outsider = create_user(&conn, "outsider");
    memberships.add_cluster_member(cluster, alice).unwrap();
    memberships.add_cluster_member(cluster, bob).unwrap();

    let config = CoreConfig::default();
    let messages = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        AccessResolver::new(
            SqliteAccessRepository::try_new(&conn).unwrap(),
            config.project_chat_visibility,
        ),
        &config,
    );
    let message = messages
        .send_message(
            chat,
            alice,
            format!("<@{bob}> <@{outsider}> <@{alice}> and again <@{bob}>"),
            MessageKind::Text,
        )
        .unwrap();

    let service = notifications(&conn);
    let feed = service.list_for_user(bob, false, None).unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].kind, NotificationKind::Mention);
    assert_eq!(feed[0].entity.kind, EntityKind::Message);
    assert_eq!(feed[0].entity.id, message.id);
    assert_eq!(feed[0].source_user_id, Some(alice));
    assert_eq!(service.unread_count(outsider).unwrap(), 0);
    assert_eq!(service.unread_count(alice).unwrap(), 0);

    match service.resolve_source(&feed[0]).unwrap() {
        ResolvedSource::Message(resolved) => assert_eq!(resolved.id, message.id),
        other => panic!("unexpected source: {other:?}"),
    }
}

use crewlink_core::db::open_db_in_memory;
use crewlink_core::model::chat::ChatKind;
use crewlink_core::model::membership::ChatRole;
use crewlink_core::model::org::{NewTask, TaskStatus};
use crewlink_core::model::user::NewUser;
use crewlink_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crewlink_core::repo::membership_repo::{MembershipRepository, SqliteMembershipRepository};
use crewlink_core::repo::RepoError;
use crewlink_core::{CoreError, ErrorKind};
use rusqlite::Connection;
use uuid::Uuid;

#[test]
fn repositories_refuse_unmigrated_connections() {
    let conn = Connection::open_in_memory().unwrap();
    let result = SqliteEntityRepository::try_new(&conn);
    assert!(matches!(
        result,
        Err(RepoError::UninitializedConnection {
            actual_version: 0,
            ..
        })
    ));
}

#[test]
fn users_are_trimmed_and_deactivated_in_place() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let user = repo
        .create_user(&NewUser::new("  Alice  ", " alice@crew.test ", "hash"))
        .unwrap();
    assert_eq!(user.display_name, "Alice");
    assert_eq!(user.email, "alice@crew.test");
    assert!(user.is_active);

    repo.deactivate_user(user.id).unwrap();
    assert!(!repo.get_user(user.id).unwrap().unwrap().is_active);
    assert!(matches!(
        repo.deactivate_user(Uuid::new_v4()),
        Err(RepoError::NotFound { entity: "user", .. })
    ));
}

#[test]
fn duplicate_email_is_a_permanent_rejection() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    repo.create_user(&NewUser::new("alice", "alice@crew.test", "hash"))
        .unwrap();

    let err = repo
        .create_user(&NewUser::new("impostor", "ALICE@crew.test", "hash"))
        .unwrap_err();
    assert!(err.is_constraint_violation());
    assert!(!err.is_transient());
    assert_eq!(CoreError::from(err).kind(), ErrorKind::InvalidState);
}

#[test]
fn project_creation_allocates_a_project_chat() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let cluster = repo.create_cluster("Acme", "ACME").unwrap();
    let project = repo.create_project(cluster.id, "Apollo").unwrap();

    let chat = repo.get_chat(project.chat_id).unwrap().unwrap();
    assert_eq!(chat.kind, ChatKind::Project);
    assert_eq!(project.cluster_id, cluster.id);

    assert!(matches!(
        repo.create_project(Uuid::new_v4(), "Orphan"),
        Err(RepoError::NotFound { entity: "cluster", .. })
    ));
}

#[test]
fn cluster_chat_is_created_once() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let cluster = repo.create_cluster("Acme", "ACME").unwrap();
    assert_eq!(cluster.chat_id, None);

    let first = repo.ensure_cluster_chat(cluster.id).unwrap();
    let second = repo.ensure_cluster_chat(cluster.id).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        repo.get_chat(first).unwrap().unwrap().kind,
        ChatKind::Company
    );
    assert_eq!(repo.get_cluster(cluster.id).unwrap().unwrap().chat_id, Some(first));
}

#[test]
fn tasks_default_to_todo_and_reject_out_of_range_progress() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let cluster = repo.create_cluster("Acme", "ACME").unwrap();
    let project = repo.create_project(cluster.id, "Apollo").unwrap();

    let task = repo.create_task(&NewTask::new(project.id, "Kickoff")).unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.progress, 0);
    assert_eq!(repo.get_task(task.id).unwrap(), Some(task));

    let mut overdone = NewTask::new(project.id, "Overdone");
    overdone.progress = 101;
    assert!(matches!(
        repo.create_task(&overdone),
        Err(RepoError::InvalidData(_))
    ));
}

#[test]
fn direct_chat_creator_is_admin() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let alice = repo
        .create_user(&NewUser::new("alice", "alice@crew.test", "hash"))
        .unwrap();
    let bob = repo
        .create_user(&NewUser::new("bob", "bob@crew.test", "hash"))
        .unwrap();

    let chat = repo.create_direct_chat(alice.id, &[bob.id, bob.id]).unwrap();
    assert_eq!(chat.kind, ChatKind::Direct);

    let members = SqliteMembershipRepository::try_new(&conn)
        .unwrap()
        .list_chat_members(chat.id)
        .unwrap();
    assert_eq!(members.len(), 2);
    let alice_role = members.iter().find(|m| m.user_id == alice.id).unwrap().role;
    let bob_role = members.iter().find(|m| m.user_id == bob.id).unwrap().role;
    assert_eq!(alice_role, ChatRole::Admin);
    assert_eq!(bob_role, ChatRole::Member);
}

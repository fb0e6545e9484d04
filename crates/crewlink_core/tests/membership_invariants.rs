use crewlink_core::db::{open_db, open_db_in_memory};
use crewlink_core::model::membership::{ClusterRole, ProjectRole};
use crewlink_core::model::org::{ClusterId, ProjectId};
use crewlink_core::model::user::{NewUser, UserId};
use crewlink_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crewlink_core::repo::membership_repo::{MembershipRepository, SqliteMembershipRepository};
use crewlink_core::{CoreConfig, CoreError, ErrorKind, MembershipService, PromotionPolicy};
use rusqlite::Connection;
use std::sync::{Arc, Barrier};

fn create_user(conn: &Connection, name: &str) -> UserId {
    SqliteEntityRepository::try_new(conn)
        .unwrap()
        .create_user(&NewUser::new(name, format!("{name}@crew.test"), "hash"))
        .unwrap()
        .id
}

fn create_cluster(conn: &Connection, code: &str) -> ClusterId {
    SqliteEntityRepository::try_new(conn)
        .unwrap()
        .create_cluster("Acme", code)
        .unwrap()
        .id
}

fn create_project(conn: &Connection, cluster_id: ClusterId) -> ProjectId {
    SqliteEntityRepository::try_new(conn)
        .unwrap()
        .create_project(cluster_id, "Apollo")
        .unwrap()
        .id
}

fn service(conn: &Connection, policy: PromotionPolicy) -> MembershipService<SqliteMembershipRepository<'_>> {
    MembershipService::new(SqliteMembershipRepository::try_new(conn).unwrap(), policy)
}

fn count_role(conn: &Connection, table: &str, key: &str, group_id: uuid::Uuid, role: &str) -> i64 {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {key} = ?1 AND role = ?2;"),
        [group_id.to_string(), role.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn first_member_becomes_admin_and_later_members_join_as_members() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);

    assert_eq!(members.add_cluster_member(cluster, alice).unwrap(), ClusterRole::Admin);
    assert_eq!(members.add_cluster_member(cluster, bob).unwrap(), ClusterRole::Member);
    assert_eq!(members.cluster_admin(cluster).unwrap(), Some(alice));

    let err = members.add_cluster_member(cluster, bob).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyMember { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn set_admin_demotes_previous_admin_atomically() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_cluster_member(cluster, alice).unwrap();
    members.add_cluster_member(cluster, bob).unwrap();

    let swap = members.set_admin(cluster, bob).unwrap();
    assert_eq!(swap.previous, Some(alice));
    assert_eq!(swap.current, Some(bob));
    assert!(swap.changed());

    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    assert_eq!(repo.cluster_role(cluster, alice).unwrap(), Some(ClusterRole::Member));
    assert_eq!(repo.cluster_role(cluster, bob).unwrap(), Some(ClusterRole::Admin));
    assert_eq!(count_role(&conn, "cluster_members", "cluster_id", cluster, "admin"), 1);
}

#[test]
fn promoting_current_admin_is_a_no_op() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_cluster_member(cluster, alice).unwrap();

    let swap = members.set_admin(cluster, alice).unwrap();
    assert!(!swap.changed());
    assert_eq!(members.cluster_admin(cluster).unwrap(), Some(alice));
}

#[test]
fn set_admin_rejects_non_members_and_unknown_clusters() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let outsider = create_user(&conn, "outsider");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_cluster_member(cluster, alice).unwrap();

    let err = members.set_admin(cluster, outsider).unwrap_err();
    assert!(matches!(err, CoreError::NotAMember { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(members.cluster_admin(cluster).unwrap(), Some(alice));

    let err = members.set_admin(uuid::Uuid::new_v4(), alice).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn set_admin_if_fails_with_conflict_when_holder_changed() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let carol = create_user(&conn, "carol");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    for user in [alice, bob, carol] {
        members.add_cluster_member(cluster, user).unwrap();
    }

    members.set_admin_if(cluster, bob, Some(alice)).unwrap();
    let err = members.set_admin_if(cluster, carol, Some(alice)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(members.cluster_admin(cluster).unwrap(), Some(bob));
}

#[test]
fn admin_cannot_leave_while_other_members_remain() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_cluster_member(cluster, alice).unwrap();
    members.add_cluster_member(cluster, bob).unwrap();

    let err = members.remove_cluster_member(cluster, alice).unwrap_err();
    assert!(matches!(err, CoreError::LastAdmin { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    members.remove_cluster_member(cluster, bob).unwrap();
    members.remove_cluster_member(cluster, alice).unwrap();
    assert!(members.list_cluster_members(cluster).unwrap().is_empty());
    assert_eq!(members.cluster_admin(cluster).unwrap(), None);

    assert_eq!(members.add_cluster_member(cluster, bob).unwrap(), ClusterRole::Admin);
}

#[test]
fn deactivated_users_cannot_join_or_be_promoted() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let carol = create_user(&conn, "carol");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_cluster_member(cluster, alice).unwrap();
    members.add_cluster_member(cluster, bob).unwrap();

    let entities = SqliteEntityRepository::try_new(&conn).unwrap();
    entities.deactivate_user(bob).unwrap();
    entities.deactivate_user(carol).unwrap();

    let err = members.add_cluster_member(cluster, carol).unwrap_err();
    assert!(matches!(err, CoreError::InactiveUser(id) if id == carol));
    let err = members.set_admin(cluster, bob).unwrap_err();
    assert!(matches!(err, CoreError::InactiveUser(id) if id == bob));
    assert_eq!(members.cluster_admin(cluster).unwrap(), Some(alice));
}

#[test]
fn project_has_at_most_one_lead() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let project = create_project(&conn, cluster);
    let alice = create_user(&conn, "alice");
    let bob = create_user(&conn, "bob");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_project_member(project, alice).unwrap();
    members.add_project_member(project, bob).unwrap();
    assert_eq!(members.project_lead(project).unwrap(), None);

    members.promote_lead(project, alice).unwrap();
    let swap = members.promote_lead(project, bob).unwrap();
    assert_eq!(swap.previous, Some(alice));
    assert_eq!(members.project_lead(project).unwrap(), Some(bob));
    assert_eq!(count_role(&conn, "project_members", "project_id", project, "lead"), 1);

    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    assert_eq!(repo.project_role(project, alice).unwrap(), Some(ProjectRole::Member));

    members.clear_lead(project).unwrap();
    assert_eq!(members.project_lead(project).unwrap(), None);
    assert_eq!(count_role(&conn, "project_members", "project_id", project, "lead"), 0);
}

#[test]
fn removing_the_lead_leaves_project_without_lead() {
    let conn = open_db_in_memory().unwrap();
    let cluster = create_cluster(&conn, "ACME");
    let project = create_project(&conn, cluster);
    let alice = create_user(&conn, "alice");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    members.add_project_member(project, alice).unwrap();
    members.promote_lead(project, alice).unwrap();

    members.remove_project_member(project, alice).unwrap();
    assert_eq!(members.project_lead(project).unwrap(), None);

    let err = members.remove_project_member(project, alice).unwrap_err();
    assert!(matches!(err, CoreError::NotAMember { .. }));
}

struct RaceFixture {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
    cluster: ClusterId,
    candidates: Vec<UserId>,
}

fn race_fixture(candidates: usize) -> RaceFixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let conn = open_db(&path, &CoreConfig::default()).unwrap();
    let cluster = create_cluster(&conn, "RACE");
    let members = service(&conn, PromotionPolicy::LastCommittedWins);
    let founder = create_user(&conn, "founder");
    members.add_cluster_member(cluster, founder).unwrap();

    let candidates = (0..candidates)
        .map(|index| {
            let user = create_user(&conn, &format!("candidate{index}"));
            members.add_cluster_member(cluster, user).unwrap();
            user
        })
        .collect();
    RaceFixture {
        _dir: dir,
        path,
        cluster,
        candidates,
    }
}

fn race_promotions(fixture: &RaceFixture, policy: PromotionPolicy) -> Vec<Result<UserId, ErrorKind>> {
    let barrier = Arc::new(Barrier::new(fixture.candidates.len()));
    let handles: Vec<_> = fixture
        .candidates
        .iter()
        .copied()
        .map(|candidate| {
            let barrier = Arc::clone(&barrier);
            let path = fixture.path.clone();
            let cluster = fixture.cluster;
            std::thread::spawn(move || {
                let conn = open_db(&path, &CoreConfig::default()).unwrap();
                let members = service(&conn, policy);
                barrier.wait();
                members
                    .set_admin(cluster, candidate)
                    .map(|_| candidate)
                    .map_err(|err| err.kind())
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn racing_promotions_leave_exactly_one_admin() {
    let fixture = race_fixture(6);
    let outcomes = race_promotions(&fixture, PromotionPolicy::LastCommittedWins);
    assert!(outcomes.iter().all(Result::is_ok));

    let conn = open_db(&fixture.path, &CoreConfig::default()).unwrap();
    assert_eq!(
        count_role(&conn, "cluster_members", "cluster_id", fixture.cluster, "admin"),
        1
    );
    let admin = service(&conn, PromotionPolicy::LastCommittedWins)
        .cluster_admin(fixture.cluster)
        .unwrap()
        .unwrap();
    assert!(fixture.candidates.contains(&admin));
}

#[test]
fn racing_promotions_under_reject_policy_report_conflicts() {
    let fixture = race_fixture(6);
    let outcomes = race_promotions(&fixture, PromotionPolicy::RejectConcurrent);

    let winners: Vec<UserId> = outcomes.iter().filter_map(|o| o.ok()).collect();
    assert!(!winners.is_empty());
    for outcome in &outcomes {
        if let Err(kind) = outcome {
            assert_eq!(*kind, ErrorKind::Conflict);
        }
    }

    let conn = open_db(&fixture.path, &CoreConfig::default()).unwrap();
    assert_eq!(
        count_role(&conn, "cluster_members", "cluster_id", fixture.cluster, "admin"),
        1
    );
    let admin = service(&conn, PromotionPolicy::RejectConcurrent)
        .cluster_admin(fixture.cluster)
        .unwrap()
        .unwrap();
    assert!(winners.contains(&admin));
}

use arbor_core::db::{open_db, BUSY_TIMEOUT};
use arbor_core::{
    CancelToken, CloneRequest, CloneService, NewNode, Node, NodeType, ProjectLeases,
    SqliteNodeRepository, TreeService,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Seeded {
    _dir: tempfile::TempDir,
    path: PathBuf,
    project: Node,
    process: Node,
    stage: Node,
}

/// Second project `p2 -> pr2 -> st2` in the same database.
struct Neighbour {
    project: Node,
    process: Node,
}

fn seed(leases: &Arc<ProjectLeases>) -> Seeded {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arbor.db");
    let conn = open_db(&path).unwrap();
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn).unwrap(),
        Arc::clone(leases),
    );

    let project = tree
        .create_node(NewNode::new(None, NodeType::Project, "p1", "alice"))
        .unwrap();
    let process = tree
        .create_node(NewNode::new(Some(project.id), NodeType::Process, "pr1", "alice"))
        .unwrap();
    let stage = tree
        .create_node(NewNode::new(Some(process.id), NodeType::Stage, "st1", "alice"))
        .unwrap();
    tree.create_node(NewNode::new(Some(stage.id), NodeType::Subprocess, "sp1", "alice"))
        .unwrap();
    Seeded {
        _dir: dir,
        path,
        project,
        process,
        stage,
    }
}

fn seed_neighbour(path: &Path, leases: &Arc<ProjectLeases>) -> Neighbour {
    let conn = open_db(path).unwrap();
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn).unwrap(),
        Arc::clone(leases),
    );
    let project = tree
        .create_node(NewNode::new(None, NodeType::Project, "p2", "carol"))
        .unwrap();
    let process = tree
        .create_node(NewNode::new(Some(project.id), NodeType::Process, "pr2", "carol"))
        .unwrap();
    tree.create_node(NewNode::new(Some(process.id), NodeType::Stage, "st2", "carol"))
        .unwrap();
    Neighbour { project, process }
}

fn spawn_clone(
    path: &Path,
    leases: &Arc<ProjectLeases>,
    request: CloneRequest,
    done: mpsc::Sender<usize>,
) -> thread::JoinHandle<()> {
    let path = path.to_path_buf();
    let leases = Arc::clone(leases);
    thread::spawn(move || {
        let conn = open_db(&path).unwrap();
        let outcome = CloneService::new(&conn, leases)
            .clone_subtree(&request, "bob", &CancelToken::new())
            .unwrap();
        done.send(outcome.node_ids.len()).unwrap();
    })
}

fn project_size(path: &Path, project: &Node) -> usize {
    let conn = open_db(path).unwrap();
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn).unwrap(),
        Arc::new(ProjectLeases::new()),
    );
    tree.list_project_nodes(project.id).unwrap().len()
}

#[test]
fn clone_waits_for_the_destination_lease() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);

    let held = leases.acquire(&[seeded.project.id]);
    let (tx, rx) = mpsc::channel();
    let worker = spawn_clone(
        &seeded.path,
        &leases,
        CloneRequest::new(seeded.process.id).under(seeded.project.id),
        tx,
    );

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(project_size(&seeded.path, &seeded.project), 4);

    drop(held);
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 3);
    worker.join().unwrap();
    assert_eq!(project_size(&seeded.path, &seeded.project), 7);
    assert!(!leases.is_held(seeded.project.id));
}

#[test]
fn concurrent_clones_into_one_project_serialize() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);

    let (tx, rx) = mpsc::channel();
    let workers: Vec<_> = (0..2)
        .map(|_| {
            spawn_clone(
                &seeded.path,
                &leases,
                CloneRequest::new(seeded.process.id).under(seeded.project.id),
                tx.clone(),
            )
        })
        .collect();
    drop(tx);

    let cloned: Vec<usize> = rx.iter().collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(cloned, vec![3, 3]);
    assert_eq!(project_size(&seeded.path, &seeded.project), 10);

    let conn = open_db(&seeded.path).unwrap();
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn).unwrap(),
        Arc::clone(&leases),
    );
    let processes = tree.get_children(seeded.project.id).unwrap();
    let positions: Vec<i64> = processes.iter().map(|node| node.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
}

#[test]
fn reads_proceed_while_a_lease_is_held() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);

    let _held = leases.acquire(&[seeded.project.id]);
    let conn = open_db(&seeded.path).unwrap();
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn).unwrap(),
        Arc::clone(&leases),
    );
    let walked = tree
        .get_subtree(seeded.project.id)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(walked.len(), 4);
    assert_eq!(tree.get_children(seeded.process.id).unwrap().len(), 1);
}

#[test]
fn cross_project_clone_waits_for_the_source_lease() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);
    let neighbour = seed_neighbour(&seeded.path, &leases);

    let held = leases.acquire(&[seeded.project.id]);
    let (tx, rx) = mpsc::channel();
    let worker = spawn_clone(
        &seeded.path,
        &leases,
        CloneRequest::new(seeded.process.id).under(neighbour.project.id),
        tx,
    );

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(project_size(&seeded.path, &neighbour.project), 3);

    drop(held);
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 3);
    worker.join().unwrap();
    assert_eq!(project_size(&seeded.path, &neighbour.project), 6);
    assert_eq!(project_size(&seeded.path, &seeded.project), 4);
    assert!(!leases.is_held(seeded.project.id));
    assert!(!leases.is_held(neighbour.project.id));
}

#[test]
fn opposite_cross_project_clones_both_finish() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);
    let neighbour = seed_neighbour(&seeded.path, &leases);

    let (tx, rx) = mpsc::channel();
    let forward = spawn_clone(
        &seeded.path,
        &leases,
        CloneRequest::new(seeded.process.id).under(neighbour.project.id),
        tx.clone(),
    );
    let backward = spawn_clone(
        &seeded.path,
        &leases,
        CloneRequest::new(neighbour.process.id).under(seeded.project.id),
        tx,
    );

    let mut cloned = vec![
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
    ];
    cloned.sort();
    forward.join().unwrap();
    backward.join().unwrap();
    assert_eq!(cloned, vec![2, 3]);
    assert_eq!(project_size(&seeded.path, &seeded.project), 6);
    assert_eq!(project_size(&seeded.path, &neighbour.project), 6);
}

#[test]
fn move_waits_for_the_destination_lease() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);
    let neighbour = seed_neighbour(&seeded.path, &leases);

    let held = leases.acquire(&[neighbour.project.id]);
    let (tx, rx) = mpsc::channel();
    let worker = {
        let path = seeded.path.clone();
        let leases = Arc::clone(&leases);
        let stage_id = seeded.stage.id;
        let target_id = neighbour.process.id;
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let tree = TreeService::new(SqliteNodeRepository::try_new(&conn).unwrap(), leases);
            let moved = tree.move_node(stage_id, target_id, None).unwrap();
            tx.send(moved.root_project_id).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(project_size(&seeded.path, &seeded.project), 4);

    drop(held);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        neighbour.project.id
    );
    worker.join().unwrap();
    assert_eq!(project_size(&seeded.path, &seeded.project), 2);
    assert_eq!(project_size(&seeded.path, &neighbour.project), 5);
}

#[test]
fn writers_wait_out_an_open_clone_transaction() {
    let leases = Arc::new(ProjectLeases::new());
    let seeded = seed(&leases);

    let holder = open_db(&seeded.path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let (tx, rx) = mpsc::channel();
    let worker = {
        let path = seeded.path.clone();
        let leases = Arc::clone(&leases);
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let tree = TreeService::new(SqliteNodeRepository::try_new(&conn).unwrap(), leases);
            let created = tree.create_node(NewNode::new(None, NodeType::Project, "p3", "dave"));
            tx.send(created.map(|node| node.id)).unwrap();
        })
    };

    let hold_for = Duration::from_millis(300);
    assert!(hold_for < BUSY_TIMEOUT);
    assert!(rx.recv_timeout(hold_for).is_err());
    holder.execute_batch("COMMIT;").unwrap();

    let created = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    worker.join().unwrap();
    let conn = open_db(&seeded.path).unwrap();
    let tree = TreeService::new(SqliteNodeRepository::try_new(&conn).unwrap(), leases);
    assert!(tree.get_node(created).unwrap().is_some());
}

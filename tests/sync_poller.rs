//! End-to-end polling against a live server on an ephemeral port.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockdispatch::dispatch::api::AppState;
use lockdispatch::dispatch::db::{DbHandle, DispatchDb, NewJob, NewUser};
use lockdispatch::dispatch::lifecycle::Actor;
use lockdispatch::dispatch::models::{JobStatus, User, UserRole};
use lockdispatch::dispatch::server::build_router;
use lockdispatch::dispatch::sync::{HttpSyncSource, Poller};
use tokio::sync::watch;

struct LiveServer {
    base_url: String,
    db: DbHandle,
    admin: User,
    token: String,
}

async fn spawn_server() -> LiveServer {
    let db = DispatchDb::new_in_memory().unwrap();
    let admin = db
        .create_user(&NewUser {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            role: UserRole::Admin,
            commission_rate: None,
            password: "password123".to_string(),
        })
        .unwrap();
    let token = db.create_session(admin.id, 1).unwrap();

    let handle = DbHandle::new(db);
    let state = Arc::new(AppState::new(handle.clone(), 1));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    LiveServer {
        base_url: format!("http://{}", addr),
        db: handle,
        admin,
        token,
    }
}

fn new_job(client_name: &str) -> NewJob {
    NewJob {
        client_name: client_name.to_string(),
        client_phone: "555-0100".to_string(),
        address: "12 Elm St".to_string(),
        description: "Locked out".to_string(),
        job_type: None,
        scheduled_at: None,
        estimated_price: None,
        worker_id: None,
        client_id: None,
    }
}

async fn create_job(server: &LiveServer, client_name: &str) {
    let job = new_job(client_name);
    let actor = Actor::from(&server.admin);
    server
        .db
        .call(move |db| db.create_job(&job, actor))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_poller_sees_changes_from_live_server() {
    let server = spawn_server().await;
    let source = HttpSyncSource::new(&server.base_url, &server.token).unwrap();
    let mut poller = Poller::new(source);

    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let sink = snapshots.clone();
    poller.on_change(move |snap| {
        sink.lock()
            .unwrap()
            .push((snap.version, snap.jobs.len()));
    });

    // First poll always reports the current state.
    assert!(poller.poll_once().await.unwrap());
    let first = poller.last_version().unwrap();
    assert!(!poller.poll_once().await.unwrap());

    create_job(&server, "Dana").await;
    assert!(poller.poll_once().await.unwrap());
    let second = poller.last_version().unwrap();
    assert!(second > first);

    let seen = snapshots.lock().unwrap().clone();
    assert_eq!(seen, vec![(first, 0), (second, 1)]);
}

#[tokio::test]
async fn test_poller_run_loop_stops_on_shutdown() {
    let server = spawn_server().await;
    let source = HttpSyncSource::new(&server.base_url, &server.token).unwrap();
    let mut poller = Poller::new(source);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    poller.on_change(move |snap| {
        let all: Vec<JobStatus> = snap.jobs.iter().map(|j| j.status).collect();
        sink.lock().unwrap().push(all);
    });

    create_job(&server, "Eli").await;

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        poller.run(Duration::from_millis(20), rx).await;
        poller
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    tx.send(true).unwrap();
    let poller = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("poller should stop after shutdown")
        .unwrap();

    assert!(poller.last_version().is_some());
    let seen = statuses.lock().unwrap().clone();
    assert_eq!(seen, vec![vec![JobStatus::Pending]]);
}

#[tokio::test]
async fn test_bad_token_is_an_error_not_a_change() {
    let server = spawn_server().await;
    let source = HttpSyncSource::new(&server.base_url, "not-a-token").unwrap();
    let mut poller = Poller::new(source);
    assert!(poller.poll_once().await.is_err());
    assert_eq!(poller.last_version(), None);
}

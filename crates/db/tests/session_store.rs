use chrono::Utc;
use tempfile::TempDir;

use fixdesk_core::domain::session::{SessionState, SlotKey, StatePatch};
use fixdesk_db::{connect_with_settings, migrations, SessionRepository, SqlSessionRepository};

#[tokio::test]
async fn file_backed_sessions_survive_pool_restart() {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("fixdesk.db").display());

    let state = SessionState::default().apply(
        &StatePatch::new()
            .with(StatePatch::set_slot(SlotKey::Equipment, "dishwasher"))
            .with(StatePatch::set_slot(SlotKey::Problem, "not draining")),
        Utc::now(),
    );

    let id = {
        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let repo = SqlSessionRepository::new(pool.clone());
        let record = repo.get_or_create("whatsapp", "+5531955554444").await.expect("create");
        repo.set_state(&record.id, &state).await.expect("save");
        pool.close().await;
        record.id
    };

    let pool = connect_with_settings(&url, 2, 5).await.expect("reconnect");
    migrations::run_pending(&pool).await.expect("migrations are idempotent");
    let repo = SqlSessionRepository::new(pool.clone());
    let reloaded = repo.get_or_create("whatsapp", "+5531955554444").await.expect("reload");

    assert_eq!(reloaded.id, id);
    assert_eq!(reloaded.state, state);
    pool.close().await;
}

#[tokio::test]
async fn concurrent_first_contacts_converge_on_one_session() {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("race.db").display());
    let pool = connect_with_settings(&url, 4, 5).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let repo = SqlSessionRepository::new(pool.clone());
        handles.push(tokio::spawn(async move {
            repo.get_or_create("whatsapp", "+5541933332222").await.map(|record| record.id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join").expect("get_or_create"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    pool.close().await;
}

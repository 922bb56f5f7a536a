//! End-to-end session behaviour against an on-disk SQLite store.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    parley_config::{ParleyConfig, StoreConfig},
    parley_sessions::{
        Address, ConversationThread, Session, SessionManager, THREAD_KEY, ThreadRegistry,
    },
    serde_json::{Value, json},
};

struct Survey {
    closes: AtomicUsize,
}

#[async_trait]
impl ConversationThread for Survey {
    fn name(&self) -> &str {
        "survey"
    }

    async fn open(&self, session: &mut Session) -> anyhow::Result<()> {
        session.set_state(Some("question_1"));
        session.reply("How did you hear about us?").await;
        Ok(())
    }

    async fn close(&self, session: &mut Session) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        session.set("survey_done", true);
        Ok(())
    }
}

fn config(dir: &tempfile::TempDir) -> ParleyConfig {
    ParleyConfig {
        store: StoreConfig {
            url: Some(format!(
                "sqlite://{}",
                dir.path().join("db").join("sessions.db").display()
            )),
            ..StoreConfig::default()
        },
        ..ParleyConfig::default()
    }
}

fn threads(survey: &Arc<Survey>) -> ThreadRegistry {
    let mut registry = ThreadRegistry::new();
    registry.register(survey.clone());
    registry
}

fn addr(raw: &str) -> Address {
    Address::new(raw).unwrap()
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let survey = Arc::new(Survey {
        closes: AtomicUsize::new(0),
    });

    {
        let manager = SessionManager::from_config(&config(&dir), threads(&survey))
            .await
            .unwrap();
        let mut session = manager.open(addr("0xfeed")).await;
        session.set("nickname", "bob");
        session.open_thread("survey").await.unwrap();
        session.sync().await;
        manager.shutdown().await;
    }

    let manager = SessionManager::from_config(&config(&dir), threads(&survey))
        .await
        .unwrap();
    let mut session = manager.open(addr("0xfeed")).await;
    assert_eq!(session.get("nickname"), Some(&json!("bob")));
    assert_eq!(session.thread().map(|t| t.name()), Some("survey"));
    assert_eq!(session.state(), Some("question_1"));

    session.close_thread().await;
    assert_eq!(survey.closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.get("survey_done"), Some(&json!(true)));
    assert_eq!(session.get(THREAD_KEY), Some(&Value::Null));
    session.sync().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn rapid_sets_match_final_memory() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::from_config(&config(&dir), ThreadRegistry::new())
        .await
        .unwrap();

    let mut session = manager.open(addr("0xfeed")).await;
    for n in 0..50 {
        session.set("n", n);
    }
    session.sync().await;

    let stored = manager.store().fetch(&addr("0xfeed")).await.unwrap().unwrap();
    assert_eq!(&stored, session.data());
    assert_eq!(stored["n"], json!(49));
    assert_eq!(manager.store().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reset_then_reload_is_blank() {
    let dir = tempfile::tempdir().unwrap();
    let survey = Arc::new(Survey {
        closes: AtomicUsize::new(0),
    });
    let manager = SessionManager::from_config(&config(&dir), threads(&survey))
        .await
        .unwrap();

    let mut session = manager.open(addr("0xfeed")).await;
    session.set("nickname", "bob");
    session.open_thread("survey").await.unwrap();
    session.reset().await;
    session.sync().await;
    drop(session);

    let session = manager.open(addr("0xfeed")).await;
    let keys: Vec<&str> = session.data().keys().map(String::as_str).collect();
    assert_eq!(keys, ["address", "timestamp"]);
    assert!(session.thread().is_none());
    assert_eq!(survey.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sessions_for_different_addresses_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::from_config(&config(&dir), ThreadRegistry::new())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let mut session = manager.open(addr(&format!("0x{i}"))).await;
            session.set("i", i);
            session.sync().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let rows = manager.store().list().await.unwrap();
    assert_eq!(rows.len(), 8);
    for row in rows {
        let i: u64 = row.address.as_str()[2..].parse().unwrap();
        assert_eq!(row.data["i"], json!(i));
        assert!(row.timestamp().is_some());
    }
}

#[tokio::test]
async fn set_is_visible_to_a_fresh_session_without_sync() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::from_config(&config(&dir), ThreadRegistry::new())
        .await
        .unwrap();

    let mut session = manager.open(addr("0xfeed")).await;
    session.set("nickname", "bob");
    drop(session);
    let fresh = manager.open(addr("0xfeed")).await;
    assert_eq!(fresh.get("nickname"), Some(&json!("bob")));

    // A session still alive counts too.
    let mut live = fresh;
    live.set("nickname", "carol");
    let fresh = manager.open(addr("0xfeed")).await;
    assert_eq!(fresh.get("nickname"), Some(&json!("carol")));
    assert_eq!(live.get("nickname"), fresh.get("nickname"));
    manager.shutdown().await;
}

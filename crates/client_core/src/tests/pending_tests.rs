use super::*;
use std::time::Duration;

fn token(raw: &str) -> ClientToken {
    ClientToken::from(raw)
}

async fn wait_aborted(watcher: &tokio::task::AbortHandle) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !watcher.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("retry task aborted");
}

#[tokio::test]
async fn first_confirmation_wins() {
    let mut pending = PendingSends::new();
    assert!(pending.begin(token("tok-1")));
    assert!(!pending.begin(token("tok-1")));

    assert!(pending.confirm(&token("tok-1"), SendPath::Durable));
    assert!(!pending.confirm(&token("tok-1"), SendPath::Live));
    assert!(!pending.fail(&token("tok-1")));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn live_confirmation_cancels_the_durable_retry() {
    let mut pending = PendingSends::new();
    pending.begin(token("tok-1"));
    let retry = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    let watcher = retry.abort_handle();
    pending.attach_retry(&token("tok-1"), retry);

    assert!(pending.confirm(&token("tok-1"), SendPath::Live));
    wait_aborted(&watcher).await;
}

#[tokio::test]
async fn retry_for_a_settled_token_is_aborted_on_attach() {
    let mut pending = PendingSends::new();
    pending.begin(token("tok-1"));
    pending.confirm(&token("tok-1"), SendPath::Live);

    let retry = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    let watcher = retry.abort_handle();
    pending.attach_retry(&token("tok-1"), retry);
    wait_aborted(&watcher).await;
}

#[tokio::test]
async fn failure_settles_once() {
    let mut pending = PendingSends::new();
    pending.begin(token("tok-1"));
    pending.begin(token("tok-2"));
    assert_eq!(pending.len(), 2);

    assert!(pending.fail(&token("tok-1")));
    assert!(!pending.fail(&token("tok-1")));
    assert!(!pending.confirm(&token("tok-1"), SendPath::Durable));
    assert!(pending.contains(&token("tok-2")));
}

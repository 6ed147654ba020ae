//! End-to-end turn lifecycle: interim transcripts, backend commits,
//! admission guards, and the display event stream

mod common;

use common::{harness, spawn_backend, wait_until};
use samvad::UiEvent;

fn delta_line(content: &str) -> String {
    format!("{{\"type\":\"text\",\"content\":\"{content}\"}}\n")
}

#[tokio::test]
async fn commit_submits_transcript_verbatim() {
    let backend = spawn_backend(vec![delta_line("Sure, "), delta_line("done.")]).await;
    let h = harness(&backend.base);
    let mut ui = h.client.ui_events().unwrap();

    h.client.arbiter().on_interim("Turn on the lights");
    h.client.arbiter().on_commit();

    wait_until("chat request", || backend.chat_hits() == 1).await;
    let request = backend.chat_requests.lock().unwrap()[0].clone();
    assert_eq!(request["text"], "Turn on the lights");
    assert_eq!(request["language"], "en");

    assert_eq!(
        ui.recv().await,
        Some(UiEvent::UserTurn("Turn on the lights".to_string()))
    );
    assert_eq!(
        ui.recv().await,
        Some(UiEvent::AssistantDelta("Sure, ".to_string()))
    );
    assert_eq!(
        ui.recv().await,
        Some(UiEvent::AssistantDelta("done.".to_string()))
    );

    // buffer consumed by the dispatched turn
    assert!(h.client.arbiter().interim_snapshot().is_empty());
}

#[tokio::test]
async fn consecutive_commits_both_submit() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.arbiter().on_interim("turn on the lights");
    h.client.arbiter().on_commit();
    wait_until("first chat request", || backend.chat_hits() == 1).await;

    // the dispatched turn must run to completion and release the
    // in-flight flag, or every later commit is dropped
    wait_until("in-flight flag cleared", || !h.client.session().is_submitting()).await;

    h.clock.advance(5000); // past the lockout and duplicate windows
    h.client.arbiter().on_interim("play jazz");
    h.client.arbiter().on_commit();
    wait_until("second chat request", || backend.chat_hits() == 2).await;
}

#[tokio::test]
async fn manual_submission_clears_spoken_transcript() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.arbiter().on_interim("what time is it");
    h.client.submit_text("turn on the lights").await;
    assert!(h.client.arbiter().interim_snapshot().is_empty());

    // a later commit must not resurrect the consumed transcript
    h.clock.advance(5000);
    h.client.arbiter().on_commit();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(backend.chat_hits(), 1);
}

#[tokio::test]
async fn short_transcript_is_discarded_as_noise() {
    let backend = spawn_backend(vec![delta_line("never sent")]).await;
    let h = harness(&backend.base);

    h.client.arbiter().on_interim("hm");
    h.client.arbiter().on_commit();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(backend.chat_hits(), 0);
    assert!(h.client.arbiter().interim_snapshot().is_empty());
}

#[tokio::test]
async fn commit_with_empty_buffer_produces_no_turn() {
    let backend = spawn_backend(vec![delta_line("never sent")]).await;
    let h = harness(&backend.base);

    h.client.arbiter().on_commit();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(backend.chat_hits(), 0);
}

#[tokio::test]
async fn interim_replaces_buffer_and_ignores_blank_updates() {
    let backend = spawn_backend(vec![]).await;
    let h = harness(&backend.base);
    let arbiter = h.client.arbiter();

    arbiter.on_interim("turn");
    arbiter.on_interim("turn on the lights");
    assert_eq!(arbiter.interim_snapshot(), "turn on the lights");

    // a blank update must not erase the held transcript
    arbiter.on_interim("   ");
    assert_eq!(arbiter.interim_snapshot(), "turn on the lights");
}

#[tokio::test]
async fn absorption_window_discards_late_recognizer_output() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.submit_text("turn on the lights").await;
    assert_eq!(backend.chat_hits(), 1);

    // recognizer output arriving just after the submission is stale
    h.client.arbiter().on_interim("the lights");
    assert!(h.client.arbiter().interim_snapshot().is_empty());

    h.clock.advance(2000);
    h.client.arbiter().on_interim("a brand new utterance");
    assert_eq!(h.client.arbiter().interim_snapshot(), "a brand new utterance");
}

#[tokio::test]
async fn lockout_rejects_rapid_successive_turns() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.submit_text("turn on the lights").await;
    h.client.submit_text("what is the weather today").await;
    assert_eq!(backend.chat_hits(), 1);

    // "play jazz" is dissimilar enough (length delta 9, no containment)
    // that only the lockout could have rejected it
    h.clock.advance(1201);
    h.client.submit_text("play jazz").await;
    assert_eq!(backend.chat_hits(), 2);
}

#[tokio::test]
async fn near_duplicate_rejected_until_window_expires() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.submit_text("turn on the lights").await;
    assert_eq!(backend.chat_hits(), 1);

    h.clock.advance(2000);
    h.client.submit_text("turn on the lights please").await;
    assert_eq!(backend.chat_hits(), 1);

    h.clock.advance(4001);
    h.client.submit_text("turn on the lights please").await;
    assert_eq!(backend.chat_hits(), 2);
}

#[tokio::test]
async fn echo_guard_blocks_turns_right_after_playback() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.session().mark_playback_complete();
    h.client.submit_text("what about tomorrow").await;
    assert_eq!(backend.chat_hits(), 0);

    h.clock.advance(1200);
    h.client.submit_text("what about tomorrow").await;
    assert_eq!(backend.chat_hits(), 1);
}

#[tokio::test]
async fn blank_text_submission_is_ignored() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.submit_text("   ").await;
    assert_eq!(backend.chat_hits(), 0);
}

#[tokio::test]
async fn language_change_applies_to_subsequent_turns() {
    let backend = spawn_backend(vec![delta_line("ok")]).await;
    let h = harness(&backend.base);

    h.client.set_language("hi");
    h.client.submit_text("turn on the lights").await;

    let request = backend.chat_requests.lock().unwrap()[0].clone();
    assert_eq!(request["language"], "hi");
}

#[tokio::test]
async fn reset_notifies_the_backend() {
    let backend = spawn_backend(vec![]).await;
    let h = harness(&backend.base);

    h.client.reset();
    wait_until("backend reset", || {
        backend.resets.load(std::sync::atomic::Ordering::SeqCst) == 1
    })
    .await;
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;
use tether_core::SdkPayload;

fn assistant(text: &str) -> SdkMessage {
    SdkMessage::Assistant(SdkPayload::from_value(json!({"text": text})))
}

fn result() -> SdkMessage {
    SdkMessage::Result(SdkResult {
        subtype: Some("success".into()),
        result: Some("done".into()),
        ..SdkResult::default()
    })
}

fn bound(mux: &SessionMultiplexer) -> (LocalSessionId, mpsc::UnboundedReceiver<SessionEvent>) {
    let (local, rx) = mux.open_pending("c-1");
    assert_eq!(mux.bind("c-1", "s-1"), Some(local));
    (local, rx)
}

#[test]
fn pending_then_bound() {
    let mux = SessionMultiplexer::new();
    let (local, _rx) = mux.open_pending("c-1");
    assert_eq!(mux.status(local), SessionStatus::Pending);
    assert_eq!(mux.remote_id(local), None);

    mux.bind("c-1", "s-1");
    assert_eq!(mux.status(local), SessionStatus::Active);
    assert_eq!(mux.remote_id(local).as_deref(), Some("s-1"));
    assert_eq!(mux.lookup("s-1"), Some(local));
}

#[test]
fn bind_without_pending_request_is_none() {
    let mux = SessionMultiplexer::new();
    assert_eq!(mux.bind("c-9", "s-9"), None);
    assert!(mux.is_empty());
}

#[test]
fn local_ids_are_not_reused() {
    let mux = SessionMultiplexer::new();
    let (a, _rx_a) = mux.open_pending("c-1");
    mux.discard(a);
    let (b, _rx_b) = mux.open_pending("c-2");
    assert_ne!(a, b);
}

#[test]
fn result_ends_turn_exactly_once() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);

    assert!(mux.mark_busy("s-1"));
    assert!(mux.is_busy(local));
    assert_eq!(mux.status(local), SessionStatus::Streaming);

    mux.route("s-1", assistant("hi"));
    assert!(mux.is_busy(local));
    mux.route("s-1", result());
    assert!(!mux.is_busy(local));
    assert_eq!(mux.status(local), SessionStatus::Active);

    assert_eq!(rx.try_recv().unwrap(), SessionEvent::Message(assistant("hi")));
    assert!(matches!(rx.try_recv().unwrap(), SessionEvent::TurnCompleted(r) if r.result_text().as_deref() == Some("done")));

    // A duplicate result for the finished turn does not complete it again
    mux.route("s-1", result());
    assert!(rx.try_recv().is_err());
}

#[test]
fn streamed_turn_without_send_still_completes() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    mux.route("s-1", assistant("resumed"));
    assert_eq!(mux.status(local), SessionStatus::Streaming);
    mux.route("s-1", result());
    assert_eq!(mux.status(local), SessionStatus::Active);
    assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Message(_)));
    assert!(matches!(rx.try_recv().unwrap(), SessionEvent::TurnCompleted(_)));
}

#[test]
fn messages_for_unknown_session_are_dropped() {
    let mux = SessionMultiplexer::new();
    let (_local, mut rx) = bound(&mux);
    mux.route("s-other", assistant("stray"));
    mux.interrupted("s-other");
    mux.error("s-other", None, "x".into());
    mux.close_remote("s-other");
    assert!(rx.try_recv().is_err());
}

#[test]
fn interrupt_returns_to_active() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    mux.mark_busy("s-1");
    mux.interrupted("s-1");
    assert!(!mux.is_busy(local));
    assert_eq!(mux.status(local), SessionStatus::Active);
    assert_eq!(rx.try_recv().unwrap(), SessionEvent::Interrupted);
}

#[test]
fn session_error_is_delivered_and_clears_busy() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    mux.mark_busy("s-1");
    mux.error("s-1", Some("E_MODEL".into()), "overloaded".into());
    assert!(!mux.is_busy(local));
    assert_eq!(
        rx.try_recv().unwrap(),
        SessionEvent::Error {
            code: Some("E_MODEL".into()),
            message: "overloaded".into()
        }
    );
}

#[test]
fn remote_close_removes_session() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    mux.close_remote("s-1");
    assert_eq!(mux.status(local), SessionStatus::Closed);
    assert_eq!(mux.lookup("s-1"), None);
    assert_eq!(
        rx.try_recv().unwrap(),
        SessionEvent::Closed(CloseReason::Server)
    );
}

#[test]
fn events_after_local_close_are_dropped() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    assert_eq!(mux.close_local(local).as_deref(), Some("s-1"));
    mux.route("s-1", assistant("late"));
    mux.route("s-1", result());

    assert_eq!(rx.try_recv().unwrap(), SessionEvent::Closed(CloseReason::Local));
    assert!(rx.try_recv().is_err());
    assert_eq!(mux.close_local(local), None);
}

#[test]
fn close_all_reports_reason_to_every_session() {
    let mux = SessionMultiplexer::new();
    let (_a, mut rx_a) = bound(&mux);
    let (_b, mut rx_b) = mux.open_pending("c-2");

    mux.close_all(CloseReason::ConnectionLost);
    assert!(mux.is_empty());
    assert_eq!(
        rx_a.try_recv().unwrap(),
        SessionEvent::Closed(CloseReason::ConnectionLost)
    );
    assert_eq!(
        rx_b.try_recv().unwrap(),
        SessionEvent::Closed(CloseReason::ConnectionLost)
    );
    assert_eq!(mux.bind("c-2", "s-2"), None);
}

#[test]
fn closing_a_pending_session_forgets_its_request() {
    let mux = SessionMultiplexer::new();
    let (local, _rx) = mux.open_pending("c-1");
    assert_eq!(mux.close_local(local), None);
    assert_eq!(mux.len(), 0);
    assert_eq!(mux.bind("c-1", "s-1"), None);
}

#[test]
fn discard_is_silent() {
    let mux = SessionMultiplexer::new();
    let (local, mut rx) = bound(&mux);
    mux.discard(local);
    assert_eq!(mux.status(local), SessionStatus::Closed);
    assert_eq!(mux.lookup("s-1"), None);
    assert!(rx.try_recv().is_err());
}

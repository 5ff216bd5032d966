//! Session lifecycle tests
//!
//! Create, handshake, output routing, exit and teardown for isolated
//! sessions, driven through recording fakes and a manual clock.

use std::time::Duration;

use ptyhub_daemon::test_support::test_config;
use ptyhub_daemon::test_support::Harness;
use ptyhub_daemon::test_support::ProcessCall;
use ptyhub_daemon::CreateRequest;
use ptyhub_daemon::SessionError;
use ptyhub_ipc::DisplaySettings;
use ptyhub_ipc::OutboundMessage;
use ptyhub_ipc::SessionMessage;
use ptyhub_terminal::PtyError;
use ptyhub_terminal::PtyEvent;

fn harness() -> Harness {
    Harness::new(test_config())
}

fn ready(h: &mut Harness, id: &ptyhub_ipc::SessionId) {
    h.manager
        .handle_session_message(id, SessionMessage::Ready { cols: 80, rows: 24 });
}

fn outputs(messages: &[OutboundMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Output { data } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Handshake
// =============================================================================

#[test]
fn test_buffered_output_flushes_after_handshake_in_order() {
    let mut h = harness();
    let (id, channel) = h
        .open_isolated(CreateRequest::default().with_size(80, 24))
        .unwrap();

    match &h.process.calls()[0] {
        ProcessCall::Spawn { config, .. } => {
            assert_eq!((config.cols, config.rows), (80, 24));
        }
        other => panic!("expected spawn, got {:?}", other),
    }

    h.output(&id, "one");
    h.output(&id, "two");
    h.output(&id, "three");
    assert!(channel.messages().is_empty());
    assert_eq!(h.manager.get(&id).unwrap().pending_output(), 3);

    h.manager
        .handle_session_message(&id, SessionMessage::Ready { cols: 100, rows: 30 });

    assert_eq!(h.process.resizes(&id), vec![(100, 30)]);
    assert_eq!(
        channel.kinds(),
        vec![
            "settings-update",
            "theme-update",
            "runtime-config-update",
            "output",
            "output",
            "output"
        ]
    );
    assert_eq!(outputs(&channel.messages()), vec!["one", "two", "three"]);

    let session = h.manager.get(&id).unwrap();
    assert!(session.is_ready());
    assert_eq!(session.pending_output(), 0);
}

#[test]
fn test_output_after_handshake_is_forwarded_directly() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);
    channel.clear();

    h.output(&id, "hello\r\n");

    assert_eq!(
        channel.messages(),
        vec![OutboundMessage::Output {
            data: "hello\r\n".into()
        }]
    );
}

#[test]
fn test_second_ready_only_resizes() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);
    channel.clear();

    h.manager
        .handle_session_message(&id, SessionMessage::Ready { cols: 120, rows: 40 });

    assert!(channel.messages().is_empty());
    assert_eq!(h.process.resizes(&id), vec![(80, 24), (120, 40)]);
}

#[test]
fn test_post_before_ready_is_dropped() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();

    h.manager.post_to_session(
        &id,
        OutboundMessage::Output {
            data: "early".into(),
        },
    );

    assert!(channel.messages().is_empty());
}

#[test]
fn test_queue_drops_chunks_beyond_cap() {
    let mut h = Harness::new(test_config().with_max_pending_chunks(2));
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();

    h.output(&id, "a");
    h.output(&id, "b");
    h.output(&id, "c");
    assert_eq!(h.manager.get(&id).unwrap().pending_output(), 2);

    ready(&mut h, &id);
    assert_eq!(outputs(&channel.messages()), vec!["a", "b"]);
}

#[test]
fn test_ready_timeout_shows_error_and_destroys() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();

    h.advance(Duration::from_secs(9));
    assert!(h.manager.contains(&id));

    h.advance(Duration::from_secs(1));
    assert!(!h.manager.contains(&id));
    assert!(channel.is_disposed());
    assert_eq!(h.process.kill_count(&id), 1);
    assert_eq!(
        h.services.log().errors,
        vec!["Terminal 'Terminal 1' failed to initialize".to_string()]
    );
}

#[test]
fn test_ready_before_timeout_cancels_it() {
    let mut h = harness();
    let (id, _channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);

    h.advance(Duration::from_secs(30));

    assert!(h.manager.contains(&id));
    assert!(h.services.log().errors.is_empty());
}

// =============================================================================
// Out-of-band reports
// =============================================================================

#[test]
fn test_working_directory_report_updates_cwd() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);
    channel.clear();

    let chunk = "\x1b]7;file://host/home/user/project\x07$ ";
    h.output(&id, chunk);

    assert_eq!(h.manager.get(&id).unwrap().cwd(), Some("/home/user/project"));
    assert_eq!(
        channel.messages(),
        vec![
            OutboundMessage::Output { data: chunk.into() },
            OutboundMessage::CwdUpdate {
                cwd: "/home/user/project".into()
            },
        ]
    );

    // Same directory again: output only.
    channel.clear();
    h.output(&id, chunk);
    assert_eq!(channel.kinds(), vec!["output"]);
}

#[test]
fn test_working_directory_tracked_while_buffering() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();

    h.output(&id, "\x1b]7;file:///tmp/work\x07");

    assert_eq!(h.manager.get(&id).unwrap().cwd(), Some("/tmp/work"));
    assert!(channel.messages().is_empty());
}

#[test]
fn test_notification_report_reaches_host() {
    let mut h = harness();
    let (id, channel) = h
        .open_isolated(CreateRequest::default().with_title("build"))
        .unwrap();
    ready(&mut h, &id);
    channel.clear();

    let chunk = "\x1b]9;Build finished\x07";
    h.output(&id, chunk);

    assert_eq!(
        h.services.log().notifications,
        vec![("build".to_string(), "Build finished".to_string())]
    );
    assert_eq!(outputs(&channel.messages()), vec![chunk]);
}

// =============================================================================
// Exit and errors
// =============================================================================

#[test]
fn test_exit_keeps_session_for_grace_period() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);
    let index = h.manager.get(&id).unwrap().index();

    h.manager.handle_pty_event(&id, PtyEvent::Exit(0));

    assert_eq!(
        channel.messages().last(),
        Some(&OutboundMessage::Exit { code: 0 })
    );
    assert!(h.manager.contains(&id));

    h.advance(Duration::from_millis(999));
    assert!(h.manager.contains(&id));

    h.advance(Duration::from_millis(1));
    assert!(!h.manager.contains(&id));
    assert!(channel.is_disposed());

    let (next, _) = h.open_isolated(CreateRequest::default()).unwrap();
    assert_eq!(h.manager.get(&next).unwrap().index(), index);
}

#[test]
fn test_expected_close_tears_down_quietly() {
    let mut h = harness();
    let (id, _channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);

    h.manager.handle_pty_event(
        &id,
        PtyEvent::Error(PtyError::Read {
            reason: "Input/output error (os error 5)".into(),
            raw_os_error: Some(5),
        }),
    );

    assert!(!h.manager.contains(&id));
    assert!(h.services.log().errors.is_empty());
}

#[test]
fn test_close_after_exit_waits_for_grace() {
    let mut h = harness();
    let (id, _channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);

    h.manager.handle_pty_event(&id, PtyEvent::Exit(0));
    h.manager.handle_pty_event(
        &id,
        PtyEvent::Error(PtyError::Read {
            reason: "read EOF".into(),
            raw_os_error: None,
        }),
    );
    assert!(h.manager.contains(&id));

    h.advance(Duration::from_secs(1));
    assert!(!h.manager.contains(&id));
    assert_eq!(h.process.kill_count(&id), 1);
}

#[test]
fn test_unexpected_error_is_reported() {
    let mut h = harness();
    let (id, _channel) = h.open_isolated(CreateRequest::default()).unwrap();

    h.manager.handle_pty_event(
        &id,
        PtyEvent::Error(PtyError::Read {
            reason: "Bad file descriptor (os error 9)".into(),
            raw_os_error: Some(9),
        }),
    );

    assert!(!h.manager.contains(&id));
    let errors = h.services.log().errors;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Terminal 'Terminal 1' failed"));
    assert!(errors[0].contains("Bad file descriptor"));
}

#[test]
fn test_events_for_removed_session_are_ignored() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &id);
    h.manager.destroy(&id);
    let seen = channel.envelopes().len();

    h.output(&id, "late");
    h.manager.handle_pty_event(&id, PtyEvent::Exit(1));

    assert_eq!(channel.envelopes().len(), seen);
    assert_eq!(h.scheduler.pending(), 0);
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_destroy_is_idempotent() {
    let mut h = harness();
    let (id, channel) = h.open_isolated(CreateRequest::default()).unwrap();

    assert!(h.manager.destroy(&id));
    assert!(!h.manager.destroy(&id));

    assert_eq!(h.process.kill_count(&id), 1);
    assert!(channel.is_disposed());
    assert!(h.manager.is_empty());
}

#[test]
fn test_indices_reuse_smallest_free() {
    let mut h = harness();
    let (first, _) = h.open_isolated(CreateRequest::default()).unwrap();
    let (second, _) = h.open_isolated(CreateRequest::default()).unwrap();
    let (third, _) = h.open_isolated(CreateRequest::default()).unwrap();
    assert_eq!(h.manager.get(&third).unwrap().index(), 3);

    h.manager.destroy(&second);
    let (fourth, _) = h.open_isolated(CreateRequest::default()).unwrap();

    assert_eq!(h.manager.get(&first).unwrap().index(), 1);
    assert_eq!(h.manager.get(&fourth).unwrap().index(), 2);
    assert_eq!(h.manager.get(&fourth).unwrap().title(), "Terminal 2");
}

#[test]
fn test_spawn_failure_registers_nothing() {
    let mut h = harness();
    h.process.fail_spawns(true);

    let result = h.open_isolated(CreateRequest::default());
    assert!(matches!(result, Err(SessionError::Spawn(_))));
    assert!(h.manager.is_empty());
    assert_eq!(h.scheduler.pending(), 0);

    h.process.fail_spawns(false);
    let (id, _) = h.open_isolated(CreateRequest::default()).unwrap();
    assert_eq!(h.manager.get(&id).unwrap().index(), 1);
}

#[test]
fn test_session_limit() {
    let mut h = Harness::new(test_config().with_max_sessions(2));
    h.open_isolated(CreateRequest::default()).unwrap();
    h.open_isolated(CreateRequest::default()).unwrap();

    let result = h.open_isolated(CreateRequest::default());

    assert!(matches!(result, Err(SessionError::LimitReached(2))));
    assert_eq!(h.process.spawn_count(), 2);
    assert_eq!(h.manager.len(), 2);
}

#[test]
fn test_input_and_resize_reach_process() {
    let mut h = harness();
    let (id, _) = h.open_isolated(CreateRequest::default()).unwrap();

    h.manager.handle_session_message(
        &id,
        SessionMessage::Input {
            data: "ls\r".into(),
        },
    );
    h.manager
        .handle_session_message(&id, SessionMessage::Resize { cols: 90, rows: 0 });
    h.manager
        .handle_session_message(&id, SessionMessage::Resize { cols: 90, rows: 20 });

    assert_eq!(h.process.writes(&id), vec![b"ls\r".to_vec()]);
    assert_eq!(h.process.resizes(&id), vec![(90, 20)]);
}

#[test]
fn test_settings_update_reaches_ready_sessions_only() {
    let mut h = harness();
    let (ready_id, ready_channel) = h.open_isolated(CreateRequest::default()).unwrap();
    let (_, waiting_channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &ready_id);
    ready_channel.clear();

    let settings = DisplaySettings {
        font_size: 16.0,
        ..DisplaySettings::default()
    };
    h.manager.update_settings(settings.clone());

    assert_eq!(
        ready_channel.messages(),
        vec![OutboundMessage::SettingsUpdate {
            settings: settings.clone()
        }]
    );
    assert!(waiting_channel.messages().is_empty());
    assert_eq!(h.manager.appearance().settings, settings);
}

#[test]
fn test_dispose_all_releases_everything() {
    let mut h = harness();
    let (first, first_channel) = h.open_isolated(CreateRequest::default()).unwrap();
    let (_, second_channel) = h.open_isolated(CreateRequest::default()).unwrap();
    ready(&mut h, &first);
    h.manager.handle_pty_event(&first, PtyEvent::Exit(0));

    h.manager.dispose_all();

    assert!(h.manager.is_empty());
    assert!(first_channel.is_disposed());
    assert!(second_channel.is_disposed());
    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(h.process.calls().last(), Some(&ProcessCall::DisposeAll));
}

use atfile_core::{
    attachment::{AttachmentOrigin, AttachmentState},
    backend::MockBehavior,
    bus::{BusConfig, BusError, MessageBus},
    editor::ActiveEditor,
    host::NO_ACTIVE_FILE,
    protocol::{Envelope, Request, Response},
    transcript::MessageSender,
    ChatSession, SessionError, Settings,
};
use std::time::Duration;


use fixture::VISIBLE_FILES;

fn paths(files: &[atfile_core::file::WorkspaceFile]) -> Vec<&str> {
    files.iter().map(|f| f.path()).collect()
}

#[test]
fn test_start_caches_filtered_listing() {
    fixture::run(|fixture| async move {
        let count = fixture.session.start().await.unwrap();
        assert_eq!(count, VISIBLE_FILES.len());
        assert_eq!(paths(&fixture.session.workspace_files()), VISIBLE_FILES);
    });
}

#[test]
fn test_listing_respects_max_results() {
    let mut settings = Settings::default();
    settings.file.max_results = 3;
    fixture::run_with_settings(settings, |fixture| async move {
        assert_eq!(fixture.session.start().await.unwrap(), 3);
        assert_eq!(
            paths(&fixture.session.workspace_files()),
            &VISIBLE_FILES[..3]
        );
    });
}

#[test]
fn test_extra_ignore_patterns_from_settings() {
    let mut settings = Settings::default();
    settings.file.extra_ignore_patterns = vec!["web/".to_string(), "*.txt".to_string()];
    fixture::run_with_settings(settings, |fixture| async move {
        fixture.session.start().await.unwrap();
        let files = fixture.session.workspace_files();
        assert!(!paths(&files).contains(&"web/index.ts"));
        assert!(!paths(&files).contains(&"empty.txt"));
        assert!(paths(&files).contains(&"src/main.rs"));
    });
}

#[test]
fn test_suggestions_for_open_mention() {
    fixture::run(|fixture| async move {
        fixture.session.start().await.unwrap();

        let suggestions = fixture.session.suggestions("explain @read", 13).unwrap();
        assert_eq!(suggestions.token.raw, "read");
        assert_eq!(paths(&suggestions.files), vec!["README.md", "docs/README.md"]);

        let everything = fixture.session.suggestions("look at @", 9).unwrap();
        assert_eq!(paths(&everything.files), VISIBLE_FILES);

        assert!(fixture.session.suggestions("no mention here", 15).is_none());
        assert!(fixture.session.suggestions("@zzz", 4).is_none());
        assert!(fixture.session.suggestions("explain @README.md now", 13).is_none());
    });
}

#[test]
fn test_suggestion_limit_from_settings() {
    let mut settings = Settings::default();
    settings.suggestions.limit = 2;
    fixture::run_with_settings(settings, |fixture| async move {
        fixture.session.start().await.unwrap();
        let suggestions = fixture.session.suggestions("@", 1).unwrap();
        assert_eq!(paths(&suggestions.files), &VISIBLE_FILES[..2]);
    });
}

#[test]
fn test_host_side_filtering() {
    fixture::run(|fixture| async move {
        let files = fixture.session.filtered_files("readme", None).await.unwrap();
        assert_eq!(paths(&files), vec!["README.md", "docs/README.md"]);

        let files = fixture.session.filtered_files("RS", Some(1)).await.unwrap();
        assert_eq!(paths(&files), vec!["src/lib.rs"]);
    });
}

#[test]
fn test_confirm_suggestion_attaches_and_sends() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();

        let completion = session
            .confirm_suggestion("explain @rea", 12, "README.md")
            .unwrap();
        assert_eq!(completion.text, "explain @README.md");
        assert_eq!(completion.cursor, completion.text.len());

        session.settle().await;
        let attachments = session.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].state, AttachmentState::Ready);
        assert_eq!(attachments[0].content.as_deref(), Some("# sample"));

        // the confirmed mention survives further edits
        let sync = session.on_text_changed(&completion.text, completion.cursor);
        assert!(sync.added.is_empty());
        assert!(sync.removed.is_empty());

        let reply = session.send(&completion.text).await.unwrap();
        assert_eq!(
            reply,
            "explain @README.md\n\n**Attached files:**\n**File: README.md**\n```\n# sample\n```"
        );
        assert_eq!(fixture.backend.last_prompt().as_deref(), Some(reply.as_str()));
        assert!(session.attachments().is_empty());

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].sender, MessageSender::User);
        assert_eq!(transcript[0].attachments, vec!["README.md".to_string()]);
        assert_eq!(transcript[1].sender, MessageSender::Assistant);
    });
}

#[test]
fn test_typed_mentions_follow_the_text() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();

        let text = "compare @main.rs with @lib.rs ";
        let sync = session.on_text_changed(text, text.len());
        assert_eq!(sync.added, vec!["main.rs".to_string(), "lib.rs".to_string()]);
        session.settle().await;
        assert!(session.attachments().iter().all(|a| a.is_ready()));

        let text = "compare @main.rs with ";
        let sync = session.on_text_changed(text, text.len());
        assert_eq!(sync.removed.len(), 1);
        assert_eq!(sync.removed[0].filename, "lib.rs");

        let attachments = session.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "main.rs");
        assert_eq!(
            attachments[0].content.as_deref(),
            Some("fn main() {\n    println!(\"hi\");\n}")
        );
    });
}

#[test]
fn test_open_mention_is_not_attached_until_closed() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        let text = "check @lib.r";
        assert!(session.on_text_changed(text, text.len()).added.is_empty());
        assert!(session.attachments().is_empty());

        let text = "check @lib.rs ";
        assert_eq!(
            session.on_text_changed(text, text.len()).added,
            vec!["lib.rs".to_string()]
        );
    });
}

#[test]
fn test_manual_attachment_is_not_tied_to_text() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        assert!(session.attach("mod.rs", AttachmentOrigin::Manual));
        assert!(!session.attach("mod.rs", AttachmentOrigin::Manual));
        session.settle().await;

        let sync = session.on_text_changed("nothing mentioned", 17);
        assert!(sync.removed.is_empty());
        assert_eq!(session.attachments().len(), 1);

        assert!(session.remove_attachment("mod.rs").is_some());
        assert!(session.attachments().is_empty());
    });
}

#[test]
fn test_failed_attachment_does_not_block_send() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        let text = "look at @missing.rs and @lib.rs ";
        session.on_text_changed(text, text.len());
        session.settle().await;

        let attachments = session.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "lib.rs");

        let errors: Vec<_> = session
            .transcript()
            .into_iter()
            .filter(|m| m.sender == MessageSender::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].content.contains("missing.rs"));

        // the failed mention is not refetched on every keystroke
        let text = "look at @missing.rs and @lib.rs please";
        assert!(session.on_text_changed(text, text.len()).added.is_empty());
        session.settle().await;
        assert_eq!(session.attachments().len(), 1);

        let reply = session.send(text).await.unwrap();
        assert!(reply.contains("**File: lib.rs**\n```\npub mod utils;\n```"));
        assert!(!reply.contains("**File: missing.rs**"));
    });
}

#[test]
fn test_ignored_file_is_hidden_but_attachable_by_name() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();
        assert!(session.suggestions("@key", 4).is_none());

        session.attach("key.pem", AttachmentOrigin::Manual);
        session.settle().await;
        let attachments = session.attachments();
        assert_eq!(attachments.len(), 1);
        assert!(attachments[0].is_ready());
    });
}

#[test]
fn test_empty_file_is_left_out_of_prompt() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.attach("empty.txt", AttachmentOrigin::Manual);
        session.settle().await;
        assert!(session.attachments()[0].is_ready());

        assert_eq!(session.send("just text").await.unwrap(), "just text");
    });
}

#[test]
fn test_blank_message_without_attachments_is_rejected() {
    fixture::run(|fixture| async move {
        assert_eq!(
            fixture.session.send("   ").await,
            Err(SessionError::EmptyMessage)
        );
        assert!(fixture.session.transcript().is_empty());
        assert_eq!(fixture.backend.call_count(), 0);
    });
}

#[test]
fn test_upstream_failure_clears_attachments() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        fixture.set_mock_behavior(MockBehavior::AlwaysError("model overloaded".to_string()));
        session.attach("lib.rs", AttachmentOrigin::Manual);
        session.settle().await;

        let err = session.send("hello").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Upstream("Failed to get AI response: model overloaded".to_string())
        );
        assert!(session.attachments().is_empty());

        let transcript = session.transcript();
        let errors: Vec<_> = transcript
            .iter()
            .filter(|m| m.sender == MessageSender::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, "Failed to get AI response: model overloaded");
        assert_eq!(transcript.last().unwrap().sender, MessageSender::Error);
    });
}

#[test]
fn test_restore_on_send_failure() {
    let mut settings = Settings::default();
    settings.attachments.restore_on_send_failure = true;
    fixture::run_with_settings(settings, |fixture| async move {
        let session = &fixture.session;
        fixture.set_mock_behavior(MockBehavior::Queue(vec![MockBehavior::AlwaysError(
            "rate limited".to_string(),
        )]));
        session.attach("lib.rs", AttachmentOrigin::Manual);
        session.settle().await;

        assert!(matches!(
            session.send("hello").await,
            Err(SessionError::Upstream(_))
        ));
        let attachments = session.attachments();
        assert_eq!(attachments.len(), 1);
        assert!(attachments[0].is_ready());

        let reply = session.send("hello again").await.unwrap();
        assert!(reply.contains("**File: lib.rs**"));
        assert!(session.attachments().is_empty());
    });
}

#[test]
fn test_use_current_file() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();

        assert_eq!(
            session.use_current_file().await,
            Err(SessionError::Host(NO_ACTIVE_FILE.to_string()))
        );

        fixture
            .host
            .editor_changed(Some(
                ActiveEditor::new("/work/src/main.rs", "fn main() {}").with_selection(0, 7),
            ))
            .unwrap();

        let reply = session.use_current_file().await.unwrap();
        assert_eq!(reply, "Current selection: main.rs\n```\nfn main\n```");

        let info = session.current_file().unwrap();
        assert_eq!(info.filename, "main.rs");
        assert!(info.has_selection);
    });
}

#[test]
fn test_select_file_then_use_it() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        let info = session.select_file("index.ts").await.unwrap().unwrap();
        assert_eq!(info.filename, "index.ts");
        assert_eq!(info.language.as_deref(), Some("typescript"));
        assert!(!info.has_selection);
        assert_eq!(session.current_file(), Some(info));

        let reply = session.use_current_file().await.unwrap();
        assert_eq!(
            reply,
            "Current file: index.ts\n```\nexport const answer = 42;\n```"
        );

        assert!(matches!(
            session.select_file("nope.rs").await,
            Err(SessionError::Host(_))
        ));
    });
}

#[test]
fn test_apply_to_file() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();

        let outcome = session
            .apply_to_file("mod.rs", "pub fn helper() -> u32 { 7 }")
            .await
            .unwrap();
        assert_eq!(outcome.file.path(), "src/utils/mod.rs");
        assert!(!outcome.created);
        assert_eq!(fixture.read("src/utils/mod.rs"), "pub fn helper() -> u32 { 7 }");

        let outcome = session.apply_to_file("notes.md", "hello").await.unwrap();
        assert!(outcome.created);
        assert_eq!(fixture.read("notes.md"), "hello");
        // the host pushes a fresh listing after creating a file
        assert!(paths(&session.workspace_files()).contains(&"notes.md"));
        assert_eq!(
            session.transcript().last().unwrap().sender,
            MessageSender::System
        );

        // an existing ignored file is replaced in place, not recreated
        let entries = session.transcript().len();
        let outcome = session.apply_to_file("server.log", "GET /health").await.unwrap();
        assert_eq!(outcome.file.path(), "server.log");
        assert!(!outcome.created);
        assert_eq!(session.transcript().len(), entries);
        assert_eq!(fixture.read("server.log"), "GET /health");

        assert!(matches!(
            session.apply_to_file("../outside.md", "x").await,
            Err(SessionError::Host(message)) if message.starts_with("Failed to apply changes to ../outside.md")
        ));
    });
}

#[test]
fn test_reload_ignore_rules() {
    fixture::run(|fixture| async move {
        let session = &fixture.session;
        session.start().await.unwrap();
        assert!(paths(&session.workspace_files()).contains(&"docs/README.md"));

        fixture.write(".gitignore", "secrets/\n*.tmp\ndocs/\n");
        let count = session.reload_ignore_rules().await.unwrap();
        assert_eq!(count, VISIBLE_FILES.len() - 1);
        assert!(!paths(&session.workspace_files()).contains(&"docs/README.md"));
    });
}

#[test]
fn test_dispose_fails_later_requests() {
    fixture::run(|fixture| async move {
        fixture.session.dispose();
        assert_eq!(
            fixture.session.refresh_files().await,
            Err(SessionError::Bus(BusError::Disposed))
        );
    });
}

#[tokio::test]
async fn test_removed_attachment_ignores_late_content() {
    let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
    let session = ChatSession::new(bus.clone(), Settings::default());

    assert!(session.attach("a.rs", AttachmentOrigin::Manual));
    let envelope = outbound.recv().await.unwrap();
    let id = envelope.id.unwrap();
    assert_eq!(
        envelope.body,
        Request::GetFileContent {
            filename: "a.rs".to_string()
        }
    );
    assert_eq!(
        session.attachments()[0].state,
        AttachmentState::ContentPending(id)
    );

    session.remove_attachment("a.rs").unwrap();
    bus.dispatch(Envelope::request(
        id,
        Response::FileContent {
            filename: "a.rs".to_string(),
            content: Some("late".to_string()),
        },
    ));
    session.settle().await;

    assert!(session.attachments().is_empty());
    assert!(session.transcript().is_empty());
    assert!(bus.pending().is_empty());
}

#[tokio::test]
async fn test_send_drops_attachments_still_loading() {
    let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
    let session = ChatSession::new(bus.clone(), Settings::default());

    session.attach("slow.rs", AttachmentOrigin::Manual);
    let fetch = outbound.recv().await.unwrap();

    let sender = session.clone();
    let send = tokio::spawn(async move { sender.send("hi").await });

    let envelope = outbound.recv().await.unwrap();
    let Request::SendMessage {
        message,
        attached_files,
    } = envelope.body
    else {
        panic!("expected sendMessage");
    };
    assert_eq!(message, "hi");
    assert!(attached_files.is_empty());
    assert!(session.attachments().is_empty());

    bus.dispatch(Envelope::request(
        envelope.id.unwrap(),
        Response::AiResponse {
            message: "hello".to_string(),
        },
    ));
    assert_eq!(send.await.unwrap(), Ok("hello".to_string()));

    // the abandoned fetch was retired locally
    assert!(bus
        .pending()
        .iter()
        .all(|pending| Some(pending.id) != fetch.id));
}

#[tokio::test]
async fn test_fetch_fan_out_is_bounded() {
    let mut settings = Settings::default();
    settings.attachments.max_concurrent_fetches = 2;
    let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
    let session = ChatSession::new(bus.clone(), settings);

    for name in ["a.rs", "b.rs", "c.rs"] {
        session.attach(name, AttachmentOrigin::Manual);
    }

    let first = outbound.recv().await.unwrap();
    let _second = outbound.recv().await.unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(outbound.try_recv().is_err());
    assert_eq!(bus.pending().len(), 2);

    let Request::GetFileContent { filename } = first.body else {
        panic!("expected getFileContent");
    };
    bus.dispatch(Envelope::request(
        first.id.unwrap(),
        Response::FileContent {
            filename,
            content: Some("x".to_string()),
        },
    ));

    let third = outbound.recv().await.unwrap();
    assert!(matches!(third.body, Request::GetFileContent { .. }));
    assert_eq!(bus.pending().len(), 2);
}

#[tokio::test]
async fn test_unanswered_send_times_out() {
    let (bus, _outbound) = MessageBus::channel(BusConfig {
        request_timeout: Some(Duration::from_millis(50)),
    });
    let session = ChatSession::new(bus.clone(), Settings::default());

    let err = session.send("anyone there?").await.unwrap_err();
    assert!(matches!(err, SessionError::Bus(BusError::Timeout { .. })));
    assert_eq!(
        session.transcript().last().unwrap().sender,
        MessageSender::Error
    );
    assert!(bus.pending().is_empty());
}

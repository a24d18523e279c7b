//! End-to-end pipeline scenarios against the in-process stack.

mod common;

use std::sync::Arc;

use common::{build_stack, test_settings};
use safetydesk::audit::AuditStore;
use safetydesk::fixtures::FixtureService;
use safetydesk::memory::MemoryStore;
use safetydesk::moderation::ModerationAction;
use safetydesk::orchestrator::PipelineError;
use safetydesk::types::{AskRequest, DraftRequest};

#[tokio::test]
async fn demo_ask_serves_ppe_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = Arc::new(FixtureService::load(dir.path(), dir.path()).await.unwrap());
    let mut settings = test_settings();
    settings.demo_mode = true;
    let stack = build_stack(settings, Some(fixtures)).await;

    let mut request = AskRequest::new("What PPE is required for construction work?");
    request.max_tokens = Some(500);
    let response = stack.orchestrator.process_ask(request).await.unwrap();

    for token in ["hard hats", "safety glasses", "steel-toed boots"] {
        assert!(response.answer.contains(token), "answer missing '{token}'");
    }
    assert!(!response.citations.is_empty());
    assert!(response.metadata.prompt_sha.starts_with("DEMO_"));
}

#[tokio::test]
async fn live_ask_grounds_answer_in_seeded_chunk() {
    let stack = build_stack(test_settings(), None).await;
    common::seed_chunk(
        &stack,
        "incident-1",
        "Report every workplace incident to your supervisor within 24 hours. \
         Complete Form WS-101 and submit it to the safety office.",
        "Incident Reporting Procedures",
    )
    .await;
    stack.llm.push_reply(
        "Report the incident to your supervisor within 24 hours [#1].\n\n\
         Complete Form WS-101 and submit it to the safety office [#1].",
    );

    let mut request = AskRequest::new("How do I report a workplace incident?");
    request.include_metadata = true;
    let response = stack.orchestrator.process_ask(request).await.unwrap();

    assert!(response.answer.contains("24 hours"));
    assert!(response.answer.contains("Form WS-101"));
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].title, "Incident Reporting Procedures");
    for paragraph in response.answer.split("\n\n").filter(|p| !p.trim().is_empty()) {
        assert!(paragraph.contains("[#"), "paragraph lacks marker: {paragraph}");
    }
    assert!(!response.metadata.prompt_sha.is_empty());
    assert_ne!(response.metadata.prompt_sha, "PENDING");
    // Router, retriever, drafter, cite checker all traced.
    assert_eq!(response.metadata.agent_traces.len(), 4);
}

#[tokio::test]
async fn demo_draft_serves_letter_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = Arc::new(FixtureService::load(dir.path(), dir.path()).await.unwrap());
    let mut settings = test_settings();
    settings.demo_mode = true;
    let stack = build_stack(settings, Some(fixtures)).await;

    let mut request = DraftRequest::new("incident notification");
    request.points = vec![
        "Investigation scheduled".to_string(),
        "Documentation required".to_string(),
    ];
    let response = stack.orchestrator.process_draft(request).await.unwrap();

    assert!(!response.subject.is_empty());
    assert!(response.body.contains("{{recipient_name}}"));
    assert!(
        response.body.contains("Investigation scheduled")
            || response.body.contains("Documentation required")
    );
    assert!(response
        .placeholders
        .contains(&"recipient_name".to_string()));
}

#[tokio::test]
async fn live_draft_parses_json_letter() {
    let stack = build_stack(test_settings(), None).await;
    stack.llm.push_reply(
        r#"{"subject":"Safety Follow-up","body":"Dear {{recipient_name}},\nPer Section 4.1, documentation is required.\n{{sender_name}}","placeholders":["recipient_name","sender_name"]}"#,
    );

    let response = stack
        .orchestrator
        .process_draft(DraftRequest::new("follow-up on inspection findings"))
        .await
        .unwrap();

    assert_eq!(response.subject, "Safety Follow-up");
    assert!(response.body.contains("{{recipient_name}}"));
    assert_eq!(response.placeholders.len(), 2);
}

#[tokio::test]
async fn multi_turn_memory_retains_both_turns_in_order() {
    let stack = build_stack(test_settings(), None).await;
    stack.llm.push_reply("First answer.");
    stack.llm.push_reply("Second answer.");

    for question in ["What are the lifting limits?", "And for repetitive lifts?"] {
        let mut request = AskRequest::new(question);
        request.conversation_id = Some("c1".to_string());
        stack.orchestrator.process_ask(request).await.unwrap();
    }

    let conversation = stack
        .memory
        .get_conversation("c1")
        .await
        .unwrap()
        .expect("conversation exists");
    assert_eq!(conversation.turns.len(), 2);
    assert_eq!(conversation.turns[0].user_message, "What are the lifting limits?");
    assert_eq!(conversation.turns[1].user_message, "And for repetitive lifts?");
}

#[tokio::test]
async fn moderation_block_aborts_before_agents_run() {
    let stack = build_stack(test_settings(), None).await;

    let mut request = AskRequest::new("How should I handle dangerous chemicals at home?");
    request.user_id = Some("u5".to_string());
    let err = stack.orchestrator.process_ask(request).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ModerationBlocked { stage: "input" }
    ));

    let entries = stack.audit.query_by_user("u5", None, None).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    let input_moderation = entry
        .moderation
        .get("input_moderation")
        .expect("input moderation recorded");
    assert_eq!(input_moderation.action, ModerationAction::Block);
    // No agent ran, so no drafter trace exists.
    assert!(entry.agent_traces.iter().all(|t| t.agent != "drafter"));
    // The blocked content never lands in outputs.
    let outputs = serde_json::to_string(&entry.outputs).unwrap();
    assert!(!outputs.contains("dangerous chemicals"));
}

#[tokio::test]
async fn redaction_scrubs_response_and_audit_outputs() {
    let stack = build_stack(test_settings(), None).await;
    stack
        .llm
        .push_reply("Noted: your email test@example.com and SSN 123-45-6789 were received.");

    let mut request =
        AskRequest::new("my email is test@example.com and SSN 123-45-6789, can you confirm?");
    request.user_id = Some("u6".to_string());
    let response = stack.orchestrator.process_ask(request).await.unwrap();

    assert!(!response.answer.contains("test@example.com"));
    assert!(!response.answer.contains("123-45-6789"));
    assert!(response.answer.contains("[EMAIL-REDACTED]"));
    assert!(response.answer.contains("[SSN-REDACTED]"));

    let entries = stack.audit.query_by_user("u6", None, None).await.unwrap();
    let recorded = entries[0]
        .outputs
        .get("response")
        .and_then(|r| r.get("answer"))
        .and_then(|a| a.as_str())
        .expect("audit recorded the answer");
    assert!(!recorded.contains("test@example.com"));
    assert!(!recorded.contains("123-45-6789"));
}

#[tokio::test]
async fn empty_question_is_rejected_up_front() {
    let stack = build_stack(test_settings(), None).await;
    let err = stack
        .orchestrator
        .process_ask(AskRequest::new("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(stack.audit.count().await.unwrap(), 0);
}

#[tokio::test]
async fn citation_markers_stay_in_range_after_repair() {
    let stack = build_stack(test_settings(), None).await;
    common::seed_chunk(
        &stack,
        "ppe-1",
        "Hard hats and safety glasses are required on construction sites.",
        "PPE Requirements",
    )
    .await;
    // The model "forgets" all markers; the cite checker must repair.
    stack
        .llm
        .push_reply("Hard hats are required. Safety glasses are also required.");

    let response = stack
        .orchestrator
        .process_ask(AskRequest::new("What hard hats and safety glasses are required?"))
        .await
        .unwrap();

    let marker_re = regex::Regex::new(r"\[#(\d+)\]").unwrap();
    let markers: Vec<usize> = marker_re
        .captures_iter(&response.answer)
        .map(|c| c[1].parse().unwrap())
        .collect();
    assert!(!markers.is_empty());
    for marker in markers {
        assert!(marker >= 1 && marker <= response.citations.len());
    }
}

#[tokio::test]
async fn maintenance_sweep_keeps_recent_state() {
    let stack = build_stack(test_settings(), None).await;
    stack.llm.push_reply("An answer.");
    let mut request = AskRequest::new("What is the eyewash station rule?");
    request.conversation_id = Some("keep-me".to_string());
    stack.orchestrator.process_ask(request).await.unwrap();

    let (audit_removed, conversations_removed) = stack.orchestrator.run_maintenance().await;
    assert_eq!(audit_removed, 0);
    assert_eq!(conversations_removed, 0);
    assert!(stack.memory.get_conversation("keep-me").await.unwrap().is_some());
    assert_eq!(stack.audit.count().await.unwrap(), 1);
}

#[tokio::test]
async fn audit_traces_grow_across_the_request() {
    let stack = build_stack(test_settings(), None).await;
    stack.llm.push_reply("Answer one.");
    let mut request = AskRequest::new("What are the rules for ladders?");
    request.user_id = Some("u7".to_string());
    stack.orchestrator.process_ask(request).await.unwrap();

    let entries = stack.audit.query_by_user("u7", None, None).await.unwrap();
    let entry = &entries[0];
    let agents: Vec<&str> = entry
        .agent_traces
        .iter()
        .map(|t| t.agent.as_str())
        .collect();
    assert_eq!(agents, vec!["router", "retriever", "drafter", "cite_checker"]);
    assert!(entry.duration_ms > 0 || entry.outputs.contains_key("response"));
}

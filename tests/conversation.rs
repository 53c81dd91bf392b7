//! Conversation integration tests
//!
//! Drives the orchestrator through full turns with mock ports

use std::sync::Arc;
use std::time::Duration;

use parley::config::ConversationConfig;
use parley::conversation::{ConversationEvent, DiagnosticKind, ReplyOutcome, TurnOutcome};
use parley::dialogue::{ReplyMessage, WELCOME_BANNER};
use parley::language::LanguageTag;
use parley::voice::{CancellationReason, DrainSink, PlaybackLimits, Utterance};
use parley::ConversationState::{Dispatching, Idle, Listening, Speaking};

mod common;
use common::{
    GatedSink, MockChannel, MockClassifier, MockRecognizer, MockSynthesizer, SPOKEN_SAMPLES,
    default_harness, drain_events, harness, transitions, wait_for_state,
};

fn diagnostics(events: &[ConversationEvent]) -> Vec<DiagnosticKind> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversationEvent::Diagnostic(d) => Some(d.kind),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_end_to_end_voice_turn() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::recognized("weather?")]));
    let mut events = h.orchestrator.subscribe();

    let outcome = h.orchestrator.begin_turn().await;
    assert_eq!(
        outcome,
        TurnOutcome::Dispatched {
            turn: 1,
            text: "weather?".to_string()
        }
    );
    assert_eq!(h.channel.sent().await, vec!["weather?"]);
    assert_eq!(h.orchestrator.state(), Dispatching);
    assert!(!h.orchestrator.input_enabled());

    assert!(h.channel.push_reply("It is sunny"));
    wait_for_state(&h.orchestrator, Idle).await;

    assert_eq!(
        h.synthesizer.calls().await,
        vec![("It is sunny".to_string(), LanguageTag::EnUs)]
    );
    assert!(h.orchestrator.input_enabled());
    assert_eq!(h.orchestrator.language(), LanguageTag::EnUs);

    let events = drain_events(&mut events);
    assert_eq!(
        transitions(&events),
        vec![
            (Idle, Listening),
            (Listening, Dispatching),
            (Dispatching, Speaking),
            (Speaking, Idle)
        ]
    );
    assert!(events.contains(&ConversationEvent::Recognized("weather?".to_string())));
    assert!(events.contains(&ConversationEvent::LanguageResolved(LanguageTag::EnUs)));
    assert!(events.contains(&ConversationEvent::PlaybackFinished {
        samples: SPOKEN_SAMPLES,
        truncated: false
    }));
    assert!(diagnostics(&events).is_empty());
}

#[tokio::test]
async fn test_begin_turn_while_busy_is_dropped() {
    let (recognizer, gate) = MockRecognizer::gated(vec![Utterance::recognized("first")]);
    let h = default_harness(recognizer);

    let orchestrator = Arc::clone(&h.orchestrator);
    let first = tokio::spawn(async move { orchestrator.begin_turn().await });
    wait_for_state(&h.orchestrator, Listening).await;

    let mut events = h.orchestrator.subscribe();
    assert_eq!(h.orchestrator.begin_turn().await, TurnOutcome::Busy(Listening));
    assert_eq!(
        h.orchestrator.submit_text("typed").await,
        TurnOutcome::Busy(Listening)
    );

    assert_eq!(h.orchestrator.state(), Listening);
    assert!(h.orchestrator.flags().recognizing);
    assert!(drain_events(&mut events).is_empty());
    assert_eq!(h.recognizer.calls().await, 1);
    assert!(h.channel.sent().await.is_empty());

    gate.notify_one();
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Dispatched { turn: 1, .. }));
    assert_eq!(h.channel.sent().await, vec!["first"]);
}

#[tokio::test]
async fn test_empty_transcript_returns_to_idle() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::recognized("   ")]));
    let mut events = h.orchestrator.subscribe();

    assert_eq!(h.orchestrator.begin_turn().await, TurnOutcome::NoMatch);

    let events = drain_events(&mut events);
    assert_eq!(transitions(&events), vec![(Idle, Listening), (Listening, Idle)]);
    assert!(h.channel.sent().await.is_empty());
    assert!(h.orchestrator.input_enabled());
}

#[tokio::test]
async fn test_no_match_returns_to_idle() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::no_match()]));
    let mut events = h.orchestrator.subscribe();

    assert_eq!(h.orchestrator.begin_turn().await, TurnOutcome::NoMatch);

    let events = drain_events(&mut events);
    assert_eq!(transitions(&events), vec![(Idle, Listening), (Listening, Idle)]);
    assert_eq!(diagnostics(&events), vec![DiagnosticKind::NoMatch]);
    assert!(h.channel.sent().await.is_empty());
}

#[tokio::test]
async fn test_canceled_recognition_surfaces_details() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::canceled(
        CancellationReason::Error,
        "websocket closed",
    )]));
    let mut events = h.orchestrator.subscribe();

    let outcome = h.orchestrator.begin_turn().await;
    assert!(matches!(outcome, TurnOutcome::Canceled(ref d) if d.error_details == "websocket closed"));
    assert_eq!(h.orchestrator.state(), Idle);
    assert!(h.channel.sent().await.is_empty());

    let events = drain_events(&mut events);
    let message = events
        .iter()
        .find_map(|event| match event {
            ConversationEvent::Diagnostic(d) if d.kind == DiagnosticKind::RecognitionCanceled => {
                Some(d.message.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(message, "CANCELED: Reason=Error ErrorDetails=websocket closed");
}

#[tokio::test]
async fn test_welcome_banner_is_never_spoken() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::recognized("hello")]));
    h.orchestrator.begin_turn().await;
    let mut events = h.orchestrator.subscribe();

    let outcome = h.orchestrator.on_reply(ReplyMessage::text(WELCOME_BANNER)).await;

    assert_eq!(outcome, ReplyOutcome::Suppressed);
    assert_eq!(h.orchestrator.state(), Dispatching);
    assert!(h.synthesizer.calls().await.is_empty());
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn test_typed_turn_skips_recognition() {
    let h = default_harness(MockRecognizer::default());
    let mut events = h.orchestrator.subscribe();

    assert_eq!(h.orchestrator.submit_text("  ").await, TurnOutcome::Empty);
    assert!(drain_events(&mut events).is_empty());

    let outcome = h.orchestrator.submit_text("  what time is it? ").await;
    assert_eq!(
        outcome,
        TurnOutcome::Dispatched {
            turn: 1,
            text: "what time is it?".to_string()
        }
    );
    assert_eq!(h.recognizer.calls().await, 0);
    assert_eq!(transitions(&drain_events(&mut events)), vec![(Idle, Dispatching)]);
}

#[tokio::test]
async fn test_dispatch_failure_ends_turn() {
    let h = harness(
        MockRecognizer::new(vec![Utterance::recognized("hello")]),
        MockChannel::failing(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        None,
        ConversationConfig::default(),
    );
    let mut events = h.orchestrator.subscribe();

    let outcome = h.orchestrator.begin_turn().await;

    assert!(matches!(outcome, TurnOutcome::DispatchFailed(ref e) if e.contains("bot unreachable")));
    assert!(h.orchestrator.input_enabled());
    let events = drain_events(&mut events);
    assert_eq!(
        transitions(&events),
        vec![(Idle, Listening), (Listening, Dispatching), (Dispatching, Idle)]
    );
    assert_eq!(diagnostics(&events), vec![DiagnosticKind::DispatchFailed]);
}

#[tokio::test]
async fn test_unanswered_turn_times_out() {
    let settings = ConversationConfig {
        dispatch_timeout: Some(Duration::from_millis(50)),
        ..ConversationConfig::default()
    };
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        None,
        settings,
    );
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.submit_text("anyone there?").await;
    wait_for_state(&h.orchestrator, Idle).await;

    assert_eq!(
        diagnostics(&drain_events(&mut events)),
        vec![DiagnosticKind::DispatchTimedOut]
    );
}

#[tokio::test]
async fn test_stale_watchdog_spares_later_turn() {
    let settings = ConversationConfig {
        dispatch_timeout: Some(Duration::from_millis(300)),
        ..ConversationConfig::default()
    };
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        None,
        settings,
    );

    h.orchestrator.submit_text("first").await;
    let outcome = h.orchestrator.on_reply(ReplyMessage::text("answer")).await;
    assert!(matches!(outcome, ReplyOutcome::Spoken { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = h.orchestrator.submit_text("second").await;
    assert!(matches!(second, TurnOutcome::Dispatched { turn: 2, .. }));

    // First turn's timer has fired by now
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.orchestrator.state(), Dispatching);

    wait_for_state(&h.orchestrator, Idle).await;
}

#[tokio::test]
async fn test_reply_while_listening_is_skipped() {
    let (recognizer, gate) = MockRecognizer::gated(vec![Utterance::no_match()]);
    let h = default_harness(recognizer);

    let orchestrator = Arc::clone(&h.orchestrator);
    let turn = tokio::spawn(async move { orchestrator.begin_turn().await });
    wait_for_state(&h.orchestrator, Listening).await;

    let outcome = h.orchestrator.on_reply(ReplyMessage::text("late answer")).await;
    assert_eq!(outcome, ReplyOutcome::Skipped(Listening));
    assert_eq!(h.orchestrator.state(), Listening);
    assert!(h.synthesizer.calls().await.is_empty());

    gate.notify_one();
    assert_eq!(turn.await.unwrap(), TurnOutcome::NoMatch);
}

#[tokio::test]
async fn test_unsolicited_reply_is_spoken() {
    let h = default_harness(MockRecognizer::default());
    let mut events = h.orchestrator.subscribe();

    let outcome = h
        .orchestrator
        .on_reply(ReplyMessage::text("Reminder: stand-up in 5 minutes"))
        .await;

    assert_eq!(
        outcome,
        ReplyOutcome::Spoken {
            language: LanguageTag::EnUs,
            samples: SPOKEN_SAMPLES,
            truncated: false
        }
    );
    assert_eq!(
        transitions(&drain_events(&mut events)),
        vec![(Idle, Speaking), (Speaking, Idle)]
    );
}

#[tokio::test]
async fn test_turn_rejected_while_speaking() {
    let (sink, gate) = GatedSink::new();
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(sink),
        Some(MockClassifier::returning("ja")),
        ConversationConfig::default(),
    );

    assert!(h.channel.push_reply("こんにちは"));
    wait_for_state(&h.orchestrator, Speaking).await;

    assert_eq!(h.orchestrator.begin_turn().await, TurnOutcome::Busy(Speaking));
    assert!(h.orchestrator.flags().speaking);
    assert_eq!(
        h.orchestrator.on_reply(ReplyMessage::text("second")).await,
        ReplyOutcome::Skipped(Speaking)
    );

    gate.notify_one();
    wait_for_state(&h.orchestrator, Idle).await;
    assert_eq!(
        h.synthesizer.calls().await,
        vec![("こんにちは".to_string(), LanguageTag::JaJp)]
    );
}

#[tokio::test]
async fn test_failed_detection_keeps_previous_language() {
    let settings = ConversationConfig {
        initial_language: LanguageTag::JaJp,
        ..ConversationConfig::default()
    };
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        Some(MockClassifier::failing()),
        settings,
    );
    let mut events = h.orchestrator.subscribe();

    let outcome = h.orchestrator.on_reply(ReplyMessage::text("hello")).await;

    assert!(matches!(
        outcome,
        ReplyOutcome::Spoken {
            language: LanguageTag::JaJp,
            ..
        }
    ));
    assert_eq!(
        diagnostics(&drain_events(&mut events)),
        vec![DiagnosticKind::LanguageDetectionFailed]
    );
    assert_eq!(h.orchestrator.language(), LanguageTag::JaJp);
}

#[tokio::test]
async fn test_slow_detection_is_bounded() {
    let settings = ConversationConfig {
        detection_timeout: Duration::from_millis(50),
        ..ConversationConfig::default()
    };
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        Some(MockClassifier::slow("en", Duration::from_secs(5))),
        settings,
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator.on_reply(ReplyMessage::text("hello")),
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        ReplyOutcome::Spoken {
            language: LanguageTag::ZhTw,
            ..
        }
    ));
    // The abandoned detection must not change the language later
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.orchestrator.language(), LanguageTag::ZhTw);
}

#[tokio::test]
async fn test_synthesis_failure_returns_to_idle() {
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::failing(),
        Arc::new(DrainSink::default()),
        None,
        ConversationConfig::default(),
    );
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.submit_text("tell me a story").await;
    let outcome = h.orchestrator.on_reply(ReplyMessage::text("Once upon a time")).await;

    assert!(matches!(outcome, ReplyOutcome::SynthesisFailed(_)));
    assert!(h.orchestrator.input_enabled());
    let events = drain_events(&mut events);
    assert_eq!(diagnostics(&events), vec![DiagnosticKind::SynthesisCanceled]);
    assert_eq!(
        transitions(&events),
        vec![(Idle, Dispatching), (Dispatching, Speaking), (Speaking, Idle)]
    );
}

#[tokio::test]
async fn test_consecutive_replies_are_spoken_in_order() {
    let h = default_harness(MockRecognizer::default());
    let mut events = h.orchestrator.subscribe();
    h.orchestrator.submit_text("tell me two things").await;

    // Both arrive before the first has finished playing
    assert!(h.channel.push_reply("First part of the answer."));
    assert!(h.channel.push_reply("Second part of the answer."));

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.synthesizer.calls().await.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second reply was never spoken");
    wait_for_state(&h.orchestrator, Idle).await;

    let spoken: Vec<String> = h
        .synthesizer
        .calls()
        .await
        .into_iter()
        .map(|(text, _)| text)
        .collect();
    assert_eq!(
        spoken,
        vec!["First part of the answer.", "Second part of the answer."]
    );

    let events = drain_events(&mut events);
    assert!(!diagnostics(&events).contains(&DiagnosticKind::ReplySkipped));
    assert_eq!(
        transitions(&events),
        vec![
            (Idle, Dispatching),
            (Dispatching, Speaking),
            (Speaking, Idle),
            (Idle, Speaking),
            (Speaking, Idle)
        ]
    );
}

#[tokio::test]
async fn test_begin_turn_while_dispatching_is_dropped() {
    let h = default_harness(MockRecognizer::new(vec![Utterance::recognized("unused")]));
    h.orchestrator.submit_text("what is the forecast?").await;
    assert_eq!(h.orchestrator.state(), Dispatching);

    assert_eq!(h.orchestrator.begin_turn().await, TurnOutcome::Busy(Dispatching));
    assert_eq!(h.recognizer.calls().await, 0);
    assert_eq!(h.channel.sent().await, vec!["what is the forecast?"]);
    assert_eq!(h.orchestrator.state(), Dispatching);
}

#[tokio::test]
async fn test_stalled_synthesis_returns_to_idle() {
    let sink = DrainSink::new(PlaybackLimits {
        stall_timeout: Duration::from_millis(100),
        ..PlaybackLimits::default()
    });
    let h = harness(
        MockRecognizer::default(),
        MockChannel::new(),
        MockSynthesizer::stalling(),
        Arc::new(sink),
        None,
        ConversationConfig::default(),
    );
    let mut events = h.orchestrator.subscribe();
    h.orchestrator.submit_text("read me the news").await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator.on_reply(ReplyMessage::text("Here are today's headlines")),
    )
    .await
    .expect("a silent synthesis stream must not wedge the conversation");

    assert!(matches!(outcome, ReplyOutcome::Spoken { .. }));
    assert_eq!(h.orchestrator.state(), Idle);
    assert!(h.orchestrator.input_enabled());
    let events = drain_events(&mut events);
    assert_eq!(diagnostics(&events), vec![DiagnosticKind::SynthesisCanceled]);
    assert_eq!(transitions(&events).last(), Some(&(Speaking, Idle)));
}

#[tokio::test]
async fn test_replies_ignored_after_orchestrator_dropped() {
    let h = default_harness(MockRecognizer::default());
    let channel = Arc::clone(&h.channel);
    let synthesizer = Arc::clone(&h.synthesizer);
    drop(h);

    // Handler is still registered but holds only a weak reference
    assert!(channel.push_reply("anyone?"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(synthesizer.calls().await.is_empty());
}

#[test]
fn test_builder_requires_every_port() {
    let result = parley::Orchestrator::builder()
        .recognizer(Arc::new(MockRecognizer::default()))
        .channel(Arc::new(MockChannel::new()))
        .sink(Arc::new(DrainSink::default()))
        .build();

    let Err(error) = result else {
        panic!("built without a synthesizer");
    };
    assert!(error.to_string().contains("speech synthesizer"));
}

//! End-to-end engine behavior against a scripted backend

mod common;
mod mocks;

use common::{configuration, dir_entries, small_engine, FakeClock, RecordingSink};
use ladder_dl::download::{
    AttemptOutcome, BackendFailure, DownloadConfiguration, DownloadContext, DownloadOutcome, EngineEvent, ErrorKind,
    Mode, PostprocessorStage, ProgressUpdate, RetryReason,
};
use mocks::{FakeBackend, Step};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const URL: &str = "https://www.youtube.com/watch?v=abc";

fn context(sink: &Arc<RecordingSink>) -> DownloadContext {
    DownloadContext::new(CancellationToken::new()).with_events(Arc::clone(sink) as _)
}

fn outcomes(outcome: &DownloadOutcome) -> Vec<AttemptOutcome> {
    outcome.history().iter().map(|r| r.outcome).collect()
}

#[tokio::test]
async fn test_second_strategy_rescues_first_layer() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::format_unavailable(), Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    let DownloadOutcome::Success(success) = &outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(success.attempt, 2);
    assert_eq!(success.layer, "L1");
    assert_eq!(success.strategy, "Android Bypass");
    assert_eq!(success.path, dir.path().join("Test Clip.mp4"));
    assert!(!success.degraded());

    assert_eq!(sink.attempt_failures(), 1);
    assert_eq!(sink.count(|e| matches!(e, EngineEvent::Success { index: 2, .. })), 1);
    assert_eq!(sink.terminal_failures(), 0);
    assert_eq!(sink.tags(), vec!["ATTEMPT", "FAILED", "STRATEGY", "ATTEMPT", "SUCCESS"]);
}

#[tokio::test]
async fn test_exhausts_plan_in_layer_major_order() {
    let backend = Arc::new(FakeBackend::always(Step::format_unavailable()));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    assert!(matches!(outcome, DownloadOutcome::Exhausted { .. }));
    assert_eq!(outcome.error_kind(), Some(ErrorKind::FormatUnavailable));
    let plan: Vec<_> = outcome
        .history()
        .iter()
        .map(|r| (r.index, r.layer.as_str(), r.strategy.as_str()))
        .collect();
    assert_eq!(
        plan,
        vec![
            (1, "L1", "Standard"),
            (2, "L1", "Android Bypass"),
            (3, "L2", "Standard"),
            (4, "L2", "Android Bypass"),
        ]
    );

    let selectors: Vec<_> = backend.calls().into_iter().map(|c| c.selector).collect();
    assert_eq!(selectors, vec!["bestvideo+bestaudio", "bestvideo+bestaudio", "best", "best"]);

    assert_eq!(sink.attempt_failures(), 4);
    assert_eq!(sink.terminal_failures(), 1);
    assert!(dir_entries(&dir).is_empty());
}

#[tokio::test]
async fn test_auth_failure_aborts_remaining_attempts() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::auth_required(), Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    let DownloadOutcome::Aborted { kind, detail, history } = &outcome else {
        panic!("expected abort, got {:?}", outcome);
    };
    assert_eq!(*kind, ErrorKind::AuthRequired);
    assert!(detail.contains("Sign in to confirm"));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, AttemptOutcome::Aborted(ErrorKind::AuthRequired));
    assert_eq!(backend.call_count(), 1);
    assert_eq!(sink.terminal_failures(), 1);
}

#[tokio::test]
async fn test_encoder_failure_drops_named_stage_and_retries() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::encoder_failure("[Metadata]"), Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    let DownloadOutcome::Success(success) = &outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    // Same attempt, second invocation
    assert_eq!(success.attempt, 1);
    assert_eq!(success.history.len(), 1);
    assert_eq!(success.history[0].invocations, 2);
    assert_eq!(success.removed_stages, vec![PostprocessorStage::MetadataEmbed]);
    assert!(success.degraded());

    let calls = backend.calls();
    assert!(calls[0].chain.contains(PostprocessorStage::MetadataEmbed));
    assert!(!calls[1].chain.contains(PostprocessorStage::MetadataEmbed));
    assert!(calls[1].chain.contains(PostprocessorStage::StreamMerge));

    assert_eq!(
        sink.count(|e| matches!(
            e,
            EngineEvent::PostprocessorWarning {
                stage: PostprocessorStage::MetadataEmbed,
                ..
            }
        )),
        1
    );
    assert_eq!(
        sink.count(|e| matches!(
            e,
            EngineEvent::Retry {
                reason: RetryReason::DegradedChain,
                ..
            }
        )),
        1
    );

    let content = std::fs::read_to_string(&success.path).unwrap();
    assert!(!content.contains("metadata-embed"));
}

#[tokio::test]
async fn test_degraded_chain_carries_to_later_attempts() {
    let backend = Arc::new(FakeBackend::scripted(vec![
        Step::encoder_failure("[Metadata]"),
        Step::format_unavailable(),
        Step::Succeed,
    ]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert!(outcome.is_success());
    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[2].chain.contains(PostprocessorStage::MetadataEmbed));
}

#[tokio::test]
async fn test_encoder_failure_with_nothing_left_to_drop_advances() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::encoder_failure("[Merger]"), Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let (_dir, cfg) = configuration();
    let cfg = DownloadConfiguration {
        embed_metadata: false,
        ..cfg
    };

    let outcome = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert_eq!(
        outcomes(&outcome),
        vec![AttemptOutcome::Failed(ErrorKind::FormatUnavailable), AttemptOutcome::Success]
    );
    assert_eq!(outcome.history()[1].index, 2);
}

#[tokio::test]
async fn test_rate_limit_cools_down_on_same_attempt() {
    let clock = FakeClock::new();
    let backend = Arc::new(FakeBackend::scripted(vec![Step::rate_limited(), Step::rate_limited(), Step::Succeed]));
    let engine = small_engine(backend.clone(), clock.clone());
    let sink = Arc::new(RecordingSink::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    let DownloadOutcome::Success(success) = &outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(success.attempt, 1);
    assert_eq!(success.history[0].invocations, 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(15), Duration::from_secs(30)]);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            EngineEvent::Retry {
                reason: RetryReason::Cooldown,
                ..
            }
        )),
        2
    );
}

#[tokio::test]
async fn test_cooldowns_are_capped_per_request() {
    let clock = FakeClock::new();
    let backend = Arc::new(FakeBackend::always(Step::rate_limited()));
    let engine = small_engine(backend.clone(), clock.clone());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert!(matches!(outcome, DownloadOutcome::Exhausted { .. }));
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RateLimited));
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(15), Duration::from_secs(30), Duration::from_secs(60)]
    );
    // 4 attempts plus 3 cooldown re-invocations
    assert_eq!(backend.call_count(), 7);
    let invocations: Vec<_> = outcome.history().iter().map(|r| r.invocations).collect();
    assert_eq!(invocations, vec![4, 1, 1, 1]);
}

#[tokio::test]
async fn test_attempt_indices_only_move_forward() {
    let backend = Arc::new(FakeBackend::scripted(vec![
        Step::unknown(),
        Step::rate_limited(),
        Step::encoder_failure("[Metadata]"),
        Step::format_unavailable(),
        Step::SucceedEmpty,
    ]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    let started = sink.started_indices();
    assert_eq!(started, vec![1, 2, 3, 4]);
    assert!(started.windows(2).all(|w| w[0] < w[1]));
    let recorded: Vec<_> = outcome.history().iter().map(|r| r.index).collect();
    assert_eq!(recorded, started);

    // Attempts + cooldown cap + droppable stages
    let bound = 4 + 3 + 1;
    assert!(backend.call_count() <= bound);
    assert_eq!(backend.call_count(), 6);
}

#[tokio::test]
async fn test_empty_output_advances() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::SucceedEmpty, Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert_eq!(
        outcomes(&outcome),
        vec![AttemptOutcome::Failed(ErrorKind::Unknown), AttemptOutcome::Success]
    );
    assert!(outcome.history()[0].diagnostic.contains("missing or empty"));
}

#[tokio::test]
async fn test_audio_sponsor_skip_overridden_once() {
    let backend = Arc::new(FakeBackend::scripted(vec![Step::format_unavailable(), Step::Succeed]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (dir, _) = configuration();
    let cfg = DownloadConfiguration {
        sponsor_skip: true,
        embed_subtitles: true,
        output_dir: dir.path().to_path_buf(),
        ..DownloadConfiguration::audio()
    };

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.path().unwrap(), dir.path().join("Test Clip.mp3"));
    assert_eq!(
        sink.count(|e| matches!(e, EngineEvent::ConfigOverride { setting: "sponsor_skip", .. })),
        1
    );
    for call in backend.calls() {
        assert_eq!(
            call.chain.stages(),
            &[PostprocessorStage::AudioExtraction, PostprocessorStage::MetadataEmbed]
        );
        assert_eq!(call.output_format, "mp3");
    }
    assert_eq!(cfg.mode, Mode::Audio);
}

#[tokio::test]
async fn test_cancel_stops_hung_backend() {
    let backend = Arc::new(FakeBackend::always(Step::Hang));
    let engine = Arc::new(small_engine(backend.clone(), FakeClock::new()));
    let sink = Arc::new(RecordingSink::new());
    let (dir, cfg) = configuration();
    let cancel = CancellationToken::new();
    let ctx = DownloadContext::new(cancel.clone()).with_events(sink.clone() as _);

    let handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.download(URL, &cfg, ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("engine ignored cancellation")
        .unwrap();

    assert!(matches!(outcome, DownloadOutcome::Cancelled { .. }));
    assert_eq!(outcomes(&outcome), vec![AttemptOutcome::Cancelled]);
    assert_eq!(backend.call_count(), 1);
    assert_eq!(sink.count(|e| matches!(e, EngineEvent::Success { .. })), 0);
    assert_eq!(sink.terminal_failures(), 0);
    assert!(dir_entries(&dir).is_empty());
}

#[tokio::test]
async fn test_cancel_reaches_backend_token() {
    let backend = Arc::new(FakeBackend::always(Step::WaitForCancel));
    let engine = Arc::new(small_engine(backend.clone(), FakeClock::new()));
    let (_dir, cfg) = configuration();
    let cancel = CancellationToken::new();
    let ctx = DownloadContext::new(cancel.clone()).with_events(Arc::new(RecordingSink::new()) as _);

    let handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.download(URL, &cfg, ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Cancelled { .. }));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_metadata_auth_failure_aborts_before_any_attempt() {
    let backend = Arc::new(FakeBackend::always(Step::Succeed).with_metadata(vec![Err(BackendFailure::new(
        Some(1),
        "ERROR: [youtube] abc: Private video. Sign in if you've been granted access",
    ))]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let sink = Arc::new(RecordingSink::new());
    let (_dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&sink)).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::AuthRequired));
    assert!(outcome.history().is_empty());
    assert_eq!(backend.call_count(), 0);
    assert_eq!(sink.terminal_failures(), 1);
}

#[tokio::test]
async fn test_metadata_failures_fall_back_to_reference_name() {
    let unknown = || Err(BackendFailure::new(Some(1), "ERROR: Unable to extract initial data"));
    let backend = Arc::new(FakeBackend::always(Step::Succeed).with_metadata(vec![unknown(), unknown()]));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let (dir, cfg) = configuration();

    let outcome = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert_eq!(backend.metadata_calls(), 2);
    assert_eq!(outcome.path().unwrap(), dir.path().join("abc.mp4"));
    assert_eq!(outcome.history().len(), 1);
}

#[tokio::test]
async fn test_name_collision_gets_suffix() {
    let backend = Arc::new(FakeBackend::always(Step::Succeed));
    let engine = small_engine(backend.clone(), FakeClock::new());
    let (dir, cfg) = configuration();

    let first = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;
    let second = engine.download(URL, &cfg, context(&Arc::new(RecordingSink::new()))).await;

    assert_eq!(first.path().unwrap(), dir.path().join("Test Clip.mp4"));
    assert_eq!(second.path().unwrap(), dir.path().join("Test Clip (1).mp4"));
    assert_eq!(dir_entries(&dir), vec!["Test Clip (1).mp4", "Test Clip.mp4"]);
}

#[tokio::test]
async fn test_progress_reaches_caller() {
    let backend = Arc::new(FakeBackend::always(Step::Succeed));
    let engine = small_engine(backend, FakeClock::new());
    let (_dir, cfg) = configuration();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let ctx = context(&Arc::new(RecordingSink::new())).with_progress(Arc::new(move |u: &ProgressUpdate| {
        seen_cb.lock().unwrap().push(u.percent);
    }));

    assert!(engine.download(URL, &cfg, ctx).await.is_success());
    assert_eq!(*seen.lock().unwrap(), vec![Some(100.0)]);
}

#[tokio::test]
async fn test_listing_falls_through_to_next_strategy() {
    let entries = vec!["https://a/1".to_string(), "https://a/2".to_string()];
    let backend = Arc::new(FakeBackend::always(Step::Succeed).with_listings(vec![
        Err(BackendFailure::new(Some(1), "HTTP Error 403: Forbidden")),
        Ok(entries.clone()),
    ]));
    let engine = small_engine(backend, FakeClock::new());

    assert_eq!(engine.expand_reference(URL, &CancellationToken::new()).await, entries);
}

#[tokio::test]
async fn test_listing_stops_at_auth_wall() {
    let backend = Arc::new(FakeBackend::always(Step::Succeed).with_listings(vec![
        Err(BackendFailure::new(Some(1), "ERROR: Sign in to confirm you're not a bot")),
        Ok(vec!["https://a/1".to_string(), "https://a/2".to_string()]),
    ]));
    let engine = small_engine(backend, FakeClock::new());

    assert_eq!(engine.expand_reference(URL, &CancellationToken::new()).await, vec![URL.to_string()]);
}

#[tokio::test]
async fn test_cancelled_listing_is_empty() {
    let engine = small_engine(Arc::new(FakeBackend::always(Step::Succeed)), FakeClock::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(engine.expand_reference(URL, &cancel).await.is_empty());
}

//! End-to-end scenarios: a callback-driven token client running on named
//! contexts, observed through the harness.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use auth_harness::fixtures::{TEST_ACCESS_TOKEN, TEST_CORRELATION_ID, TEST_RESOURCE};
use auth_harness::{
    assert_logs_contain, assert_logs_do_not_contain, call_and_wait, AsyncBridge, BridgeOutcome,
    Completion, CompletionSignal, ExecutionContext, HarnessConfig, HarnessError, LogLevel,
    LogPartition, TestLifecycle, TestScope,
};

/// Minimal stand-in for the client: does its network work on a background
/// context and delivers the result on the main context.
struct FakeTokenClient {
    main: ExecutionContext,
    network: ExecutionContext,
    latency: Duration,
    fail_with: Option<&'static str>,
}

impl FakeTokenClient {
    fn acquire_token(
        &self,
        resource: &str,
        callback: impl FnOnce(Result<String, String>) + Send + 'static,
    ) {
        let resource = resource.to_string();
        let main = self.main.clone();
        let latency = self.latency;
        let fail_with = self.fail_with;

        tracing::info!(
            target: "adal::context",
            correlation_id = %TEST_CORRELATION_ID,
            "acquireToken start"
        );
        self.network
            .schedule(move || {
                thread::sleep(latency);
                let result = match fail_with {
                    Some(reason) => {
                        tracing::error!(target: "adal::network", code = "AD_ERROR_NETWORK", "{}", reason);
                        Err(reason.to_string())
                    }
                    None => {
                        tracing::info!(target: "adal::network", info = %resource, "acquireToken success");
                        Ok(TEST_ACCESS_TOKEN.to_string())
                    }
                };
                main.schedule(move || callback(result)).unwrap();
            })
            .unwrap();
    }
}

fn scope_config() -> HarnessConfig {
    HarnessConfig {
        default_timeout_ms: 5_000,
        ..HarnessConfig::default()
    }
}

#[test]
fn e2e_teardown_fails_citing_the_error_record() {
    let mut lifecycle = TestLifecycle::from_config(&scope_config());
    lifecycle.begin(Some(LogLevel::Warning)).unwrap();
    lifecycle
        .sink()
        .log(LogLevel::Info, "token refreshed", None, None, None);
    lifecycle
        .sink()
        .log(LogLevel::Error, "network unreachable", None, None, None);

    match lifecycle.end() {
        Err(HarnessError::ToleranceExceeded { message, .. }) => {
            assert_eq!(message, "network unreachable")
        }
        other => panic!("expected ToleranceExceeded, got {other:?}"),
    }
}

#[test]
fn e2e_message_partition_counts_both_records() {
    let scope = TestScope::begin(&scope_config()).unwrap();
    tracing::info!(target: "adal", "acquireToken start");
    tracing::info!(target: "adal", "acquireToken success");

    assert_eq!(scope.sink().query(LogPartition::Message, "acquireToken"), 2);
    assert_logs_contain!(scope.sink(), LogPartition::Level, "Info");
    assert_logs_do_not_contain!(scope.sink(), LogPartition::Level, "Warning");
    scope.finish().unwrap();
}

#[test]
fn e2e_bridged_callback_from_background_context_resumes_after_delay() {
    let bridge = AsyncBridge::new(Duration::from_secs(5));
    let background = ExecutionContext::spawn("background").unwrap();
    let delay = Duration::from_millis(100);

    let bg = background.clone();
    let start = Instant::now();
    let completed = bridge.run_and_wait(
        &background,
        move |signal: CompletionSignal| {
            bg.schedule(move || {
                thread::sleep(delay);
                signal.fire();
            })
            .unwrap();
        },
        Duration::from_secs(5),
    );

    let elapsed = start.elapsed();
    assert!(completed);
    assert!(elapsed >= delay, "resumed after {elapsed:?}, before the callback fired");
    assert!(elapsed < Duration::from_secs(4));
    background.shutdown();
}

#[test]
fn e2e_token_acquired_through_main_context_is_captured_end_to_end() {
    let scope = TestScope::begin(&scope_config()).unwrap();
    let main = ExecutionContext::attach_current("main");
    let network = ExecutionContext::spawn("network").unwrap();
    let client = Arc::new(FakeTokenClient {
        main: main.clone(),
        network: network.clone(),
        latency: Duration::from_millis(20),
        fail_with: None,
    });

    let result: Arc<Mutex<Option<Result<String, String>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);
    let caller = Arc::clone(&client);
    call_and_wait!(scope.bridge(), &main, move |signal: CompletionSignal| {
        caller.acquire_token(TEST_RESOURCE, move |outcome| {
            *slot.lock().unwrap() = Some(outcome);
            signal.fire();
        });
    });

    assert_eq!(
        result.lock().unwrap().clone(),
        Some(Ok(TEST_ACCESS_TOKEN.to_string()))
    );
    // Records from both the main and the network context reached the sink.
    assert_eq!(scope.sink().query(LogPartition::Message, "acquireToken"), 2);
    assert_logs_contain!(scope.sink(), LogPartition::Info, TEST_RESOURCE);
    let records = scope.sink().snapshot();
    assert_eq!(records[0].correlation_id, Some(TEST_CORRELATION_ID));

    network.shutdown();
    scope.finish().unwrap();
}

#[test]
fn e2e_failed_acquisition_is_visible_to_caller_and_tolerance() {
    let mut scope = TestScope::begin(&scope_config()).unwrap();
    scope.set_log_tolerance(LogLevel::Error);
    let main = ExecutionContext::attach_current("main");
    let network = ExecutionContext::spawn("network").unwrap();
    let client = FakeTokenClient {
        main: main.clone(),
        network: network.clone(),
        latency: Duration::from_millis(10),
        fail_with: Some("network unreachable"),
    };

    let outcome = scope.bridge().call_and_wait(
        &main,
        move |completion: Completion<String>| {
            client.acquire_token(TEST_RESOURCE, move |result| match result {
                Ok(token) => completion.complete(token),
                Err(reason) => completion.fail(anyhow::anyhow!(reason)),
            });
            Ok(())
        },
        Duration::from_secs(5),
    );

    match outcome {
        BridgeOutcome::Failed(error) => assert_eq!(error.to_string(), "network unreachable"),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_logs_contain!(scope.sink(), LogPartition::Code, "AD_ERROR_NETWORK");

    network.shutdown();
    // Error is within the relaxed ceiling.
    scope.finish().unwrap();
}

#[test]
fn e2e_timed_out_bridge_returns_control() {
    let scope = TestScope::begin(&scope_config()).unwrap();
    let bridge = AsyncBridge::new(Duration::from_secs(5));
    let main = ExecutionContext::attach_current("main");
    let network = ExecutionContext::spawn("network").unwrap();
    let client = FakeTokenClient {
        main: main.clone(),
        network: network.clone(),
        latency: Duration::from_millis(500),
        fail_with: None,
    };

    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    let completed = bridge.run_and_wait(
        &main,
        move |signal: CompletionSignal| {
            client.acquire_token(TEST_RESOURCE, move |_| signal.fire());
        },
        timeout,
    );

    assert!(!completed);
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_millis(450));
    network.shutdown();
    assert_eq!(scope.sink().query(LogPartition::Message, "acquireToken"), 2);
    scope.finish().unwrap();
}

#[test]
fn e2e_clear_between_sub_scenarios_keeps_capture_running() {
    let scope = TestScope::begin(&scope_config()).unwrap();
    tracing::info!(target: "adal", "acquireToken start");
    scope.sink().clear();
    assert_eq!(scope.sink().query(LogPartition::Message, "acquireToken"), 0);

    tracing::info!(target: "adal", "acquireToken start");
    assert_eq!(scope.sink().query(LogPartition::Message, "acquireToken"), 1);
    scope.finish().unwrap();
}

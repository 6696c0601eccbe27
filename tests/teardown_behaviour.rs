// tests/teardown_behaviour.rs

mod common;
use crate::common::{init_tracing, with_timeout, CallbackProbe, TestResult};

use std::sync::Arc;
use std::time::Duration;

use sauceci::runner::{run_job, TestRunner};
use sauceci::types::{ProcessExit, ProcessRole, StopSignal};
use sauceci_test_utils::{manifest_fs, FakeProbe, FakeSupervisor, JobContextBuilder, Script};

const MARKER: &str = "Connected! You may start your tests.";

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn ready_tunnel() -> Script {
    Script::long_lived().with_line(ms(100), MARKER)
}

#[tokio::test(start_paused = true)]
async fn stubborn_children_are_killed_after_grace_period() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Server, Script::long_lived().ignoring_graceful())
        .script(ProcessRole::Connector, ready_tunnel().ignoring_graceful())
        .script(ProcessRole::CloudTests, Script::exits_after(ms(300), 0));
    let (ctx, _sink) = JobContextBuilder::new().build();
    let done = CallbackProbe::new();

    let code = with_timeout(run_job(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
        done.callback(),
    ))
    .await;

    // The cloud tests decided the outcome; force-killing does not change it.
    assert_eq!(code, 0);
    assert_eq!(done.codes(), vec![0]);

    let signals = sup.signals();
    let kinds: Vec<_> = signals.iter().map(|s| (s.role, s.signal)).collect();
    assert_eq!(
        kinds,
        vec![
            (ProcessRole::Connector, StopSignal::Interrupt),
            (ProcessRole::Server, StopSignal::Terminate),
            (ProcessRole::Connector, StopSignal::Kill),
            (ProcessRole::Server, StopSignal::Kill),
        ]
    );

    let graceful_at = signals[0].at;
    assert_eq!(signals[1].at, graceful_at);
    assert!(signals[2].at - graceful_at >= Duration::from_millis(5000));
    assert_eq!(signals[3].at, signals[2].at);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn no_kill_when_children_stop_within_grace() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Server, Script::long_lived().stopping_after(ms(1500)))
        .script(ProcessRole::Connector, ready_tunnel().stopping_after(ms(4000)))
        .script(ProcessRole::CloudTests, Script::exits_after(ms(300), 0));
    let (ctx, _sink) = JobContextBuilder::new().build();
    let start = tokio::time::Instant::now();

    let code = with_timeout(run_job(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
        |_| {},
    ))
    .await;

    assert_eq!(code, 0);
    assert!(sup.signals().iter().all(|s| !s.signal.is_forced()));
    assert!(sup.alive().is_empty());

    // Finished once the slower child confirmed, not at the grace deadline.
    let graceful_at = sup.signals()[0].at;
    let elapsed = tokio::time::Instant::now() - graceful_at;
    assert!(elapsed >= ms(4000) && elapsed < ms(5000), "{elapsed:?}");
    assert!(tokio::time::Instant::now() > start);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn only_the_stubborn_child_is_killed() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Server, Script::long_lived().ignoring_graceful())
        .script(ProcessRole::Connector, ready_tunnel())
        .script(ProcessRole::CloudTests, Script::exits_after(ms(300), 5));
    let (ctx, _sink) = JobContextBuilder::new().build();

    let code = with_timeout(run_job(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
        |_| {},
    ))
    .await;

    assert_eq!(code, 5);
    let kills: Vec<_> = sup
        .signals()
        .iter()
        .filter(|s| s.signal.is_forced())
        .map(|s| s.role)
        .collect();
    assert_eq!(kills, vec![ProcessRole::Server]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_cancel_during_teardown_kills_immediately() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Server, Script::long_lived().ignoring_graceful())
        .script(ProcessRole::Connector, Script::long_lived().ignoring_graceful());
    let (ctx, sink) = JobContextBuilder::new().build();
    let runner = TestRunner::new(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
    );
    let cancel = runner.cancel_handle();
    let done = CallbackProbe::new();
    let job = tokio::spawn(runner.run(done.callback()));

    // Server ready at 1 s; tunnel never prints the marker.
    tokio::time::sleep(ms(2000)).await;
    assert!(cancel.cancel().await);
    tokio::time::sleep(ms(100)).await;
    assert!(cancel.cancel().await);

    let code = with_timeout(job).await?;
    assert_eq!(code, 1);
    assert_eq!(done.calls(), 1);

    let signals = sup.signals();
    let kinds: Vec<_> = signals.iter().map(|s| (s.role, s.signal)).collect();
    assert_eq!(
        kinds,
        vec![
            (ProcessRole::Connector, StopSignal::Interrupt),
            (ProcessRole::Server, StopSignal::Terminate),
            (ProcessRole::Connector, StopSignal::Kill),
            (ProcessRole::Server, StopSignal::Kill),
        ]
    );
    assert!(signals[2].at - signals[0].at < ms(5000));
    assert_eq!(
        sink.messages()
            .iter()
            .filter(|m| m.as_str() == "job cancelled")
            .count(),
        1
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn server_lost_during_cloud_tests_fails_once() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Connector, ready_tunnel())
        .script(ProcessRole::CloudTests, Script::exits_after(ms(10_000), 0));
    let (ctx, sink) = JobContextBuilder::new().build();
    let runner = TestRunner::new(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
    );
    let done = CallbackProbe::new();
    let job = tokio::spawn(runner.run(done.callback()));

    // Ready at 1 s, marker at ~1.1 s; cloud tests now running.
    tokio::time::sleep(ms(3000)).await;
    sup.exit_now(ProcessRole::Server, ProcessExit::Signal(11));

    let code = with_timeout(job).await?;
    assert_eq!(code, 128 + 11);
    assert_eq!(done.codes(), vec![139]);

    let kinds: Vec<_> = sup.signals().iter().map(|s| (s.role, s.signal)).collect();
    assert_eq!(
        kinds,
        vec![
            (ProcessRole::CloudTests, StopSignal::Terminate),
            (ProcessRole::Connector, StopSignal::Interrupt),
        ]
    );
    assert!(sup.alive().is_empty());

    let messages = sink.messages();
    assert!(messages.contains(
        &"application server exited unexpectedly (signal 11) - failing test".to_string()
    ));
    assert!(!messages.iter().any(|m| m.starts_with("cloud test command exited")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_during_cloud_tests_stops_every_child() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new()
        .script(ProcessRole::Connector, ready_tunnel())
        .script(
            ProcessRole::CloudTests,
            Script::exits_after(ms(50_000), 0).ignoring_graceful(),
        );
    let (ctx, _sink) = JobContextBuilder::new().build();
    let runner = TestRunner::new(
        ctx,
        sup.clone(),
        Arc::new(FakeProbe::ready_on(1)),
        Arc::new(manifest_fs("node server.js")),
    );
    let cancel = runner.cancel_handle();
    let done = CallbackProbe::new();
    let job = tokio::spawn(runner.run(done.callback()));

    tokio::time::sleep(ms(3000)).await;
    assert!(cancel.cancel().await);

    let code = with_timeout(job).await?;
    assert_eq!(code, 1);
    assert_eq!(done.codes(), vec![1]);

    let signals = sup.signals();
    let kinds: Vec<_> = signals.iter().map(|s| (s.role, s.signal)).collect();
    assert_eq!(
        kinds,
        vec![
            (ProcessRole::CloudTests, StopSignal::Terminate),
            (ProcessRole::Connector, StopSignal::Interrupt),
            (ProcessRole::Server, StopSignal::Terminate),
            (ProcessRole::CloudTests, StopSignal::Kill),
        ]
    );
    assert!(signals[3].at - signals[0].at >= ms(5000));
    assert!(sup.alive().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn racing_completions_fire_callback_once() -> TestResult {
    init_tracing();

    // The server dies at the same instant the tenth probe fails.
    let sup =
        FakeSupervisor::new().script(ProcessRole::Server, Script::exits_after(ms(10_000), 6));
    let probe = FakeProbe::never_ready();
    let (ctx, sink) = JobContextBuilder::new().build();
    let done = CallbackProbe::new();

    let code = with_timeout(run_job(
        ctx,
        sup.clone(),
        Arc::new(probe.clone()),
        Arc::new(manifest_fs("node server.js")),
        done.callback(),
    ))
    .await;

    assert_eq!(done.calls(), 1);
    assert_eq!(done.codes(), vec![code]);
    assert!(code == 6 || code == 1, "unexpected code {code}");

    // Exactly one failure was reported, whichever came first.
    let failures = sink
        .messages()
        .iter()
        .filter(|m| m.ends_with("failing test"))
        .count();
    assert_eq!(failures, 1);
    assert!(probe.calls() <= 10);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn polling_stops_once_job_is_decided() -> TestResult {
    init_tracing();

    let sup = FakeSupervisor::new().script(ProcessRole::Server, Script::exits_after(ms(3500), 0));
    let probe = FakeProbe::never_ready();
    let (ctx, _sink) = JobContextBuilder::new().build();

    let code = with_timeout(run_job(
        ctx,
        sup.clone(),
        Arc::new(probe.clone()),
        Arc::new(manifest_fs("node server.js")),
        |_| {},
    ))
    .await;
    // A clean exit from a server that should keep running is still a failure.
    assert_eq!(code, 1);

    let calls = probe.calls();
    assert_eq!(calls, 3);
    tokio::time::sleep(ms(20_000)).await;
    assert_eq!(probe.calls(), calls);
    Ok(())
}

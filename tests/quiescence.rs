//! Cross-crate scenarios for the settle oracle: bus, idle tracker and
//! navigation waiter working together, no live browser required.

use std::time::Duration;

use anyhow::Result;
use pagehand_bus::{PageSignal, SignalBus};
use pagehand_core::RequestId;
use pagehand_wait::{
    Expectation, IdleTracker, NavigationWaiter, Settled, WaitError, WaitOptions,
    DEFAULT_QUIET_WINDOW,
};

fn wait_options(timeout_ms: u64) -> WaitOptions {
    WaitOptions {
        await_navigation: true,
        wait_for_start: Duration::from_millis(500),
        timeout: Duration::from_millis(timeout_ms),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pagehand=debug")
        .try_init();
}

/// A page that fires an XHR right after load: the wait must gate on both
/// the load event and network idle.
#[tokio::test(start_paused = true)]
async fn navigation_gates_on_load_and_network_idle() -> Result<()> {
    init_tracing();
    let bus = SignalBus::new(64);
    let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
    tokio::task::yield_now().await;

    let mut waiter = NavigationWaiter::arm(&bus);
    waiter.expect(Expectation::Load);
    waiter.expect(Expectation::DomContent);

    bus.publish(PageSignal::DomContentEventFired);
    bus.publish(PageSignal::LoadEventFired);
    // 200ms after load an XHR starts; idle may only fire once it settles
    // and the quiet window passes.
    tokio::time::advance(Duration::from_millis(200)).await;
    bus.publish(PageSignal::RequestStarted {
        request: RequestId("xhr-1".into()),
    });
    tokio::task::yield_now().await;
    bus.publish(PageSignal::RequestSettled {
        request: RequestId("xhr-1".into()),
    });
    tokio::task::yield_now().await;
    tokio::time::advance(DEFAULT_QUIET_WINDOW + Duration::from_millis(10)).await;
    tokio::task::yield_now().await;

    let outcome = waiter.settle(&wait_options(15_000), || async { true }).await?;
    assert_eq!(outcome, Settled::Navigated);
    Ok(())
}

/// A request that never completes starves network idle and the wait times
/// out with the configured budget in the error.
#[tokio::test(start_paused = true)]
async fn hanging_request_times_out_with_the_budget() {
    let bus = SignalBus::new(64);
    let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
    tokio::task::yield_now().await;

    let mut waiter = NavigationWaiter::arm(&bus);
    waiter.expect(Expectation::Load);

    bus.publish(PageSignal::FrameStartedLoading { frame: "f1".into() });
    bus.publish(PageSignal::LoadEventFired);
    bus.publish(PageSignal::FrameStoppedLoading { frame: "f1".into() });
    bus.publish(PageSignal::RequestStarted {
        request: RequestId("stuck".into()),
    });

    let err = waiter
        .settle(&wait_options(2_000), || async { true })
        .await
        .unwrap_err();
    match err {
        WaitError::Timeout { timeout_ms } => assert_eq!(timeout_ms, 2_000),
        other => panic!("expected a timeout, got {other}"),
    }
}

/// An action that triggers nothing returns right after the start window,
/// and leaves no listener behind either way.
#[tokio::test(start_paused = true)]
async fn silent_actions_return_after_the_start_window() {
    let bus = SignalBus::new(64);

    let waiter = NavigationWaiter::arm(&bus);
    assert_eq!(bus.listener_count(), 1);

    let outcome = waiter
        .settle(&wait_options(15_000), || async { true })
        .await
        .unwrap();
    assert_eq!(outcome, Settled::NoNavigation);
    assert_eq!(bus.listener_count(), 0);
}

/// Idle re-arms when a second request starts inside the quiet window; the
/// waiter still settles once the page is really quiet.
#[tokio::test(start_paused = true)]
async fn burst_of_requests_extends_the_quiet_window() {
    let bus = SignalBus::new(64);
    let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
    tokio::task::yield_now().await;

    let mut waiter = NavigationWaiter::arm(&bus);
    waiter.expect(Expectation::Load);
    bus.publish(PageSignal::LoadEventFired);

    for id in ["a", "b"] {
        bus.publish(PageSignal::RequestStarted {
            request: RequestId(id.into()),
        });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        bus.publish(PageSignal::RequestSettled {
            request: RequestId(id.into()),
        });
        tokio::task::yield_now().await;
    }

    tokio::time::advance(DEFAULT_QUIET_WINDOW + Duration::from_millis(10)).await;
    tokio::task::yield_now().await;

    let outcome = waiter
        .settle(&wait_options(15_000), || async { true })
        .await
        .unwrap();
    assert_eq!(outcome, Settled::Navigated);
}

//! Adaptive poller tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use vercelwp::models::deployment::DeploymentState;
use vercelwp::utils::BackoffOptions;
use vercelwp::workers::poller::{AdaptivePoller, PollSample, PollerStatus, PollingPolicy, TickFn};

fn counting_tick(count: Arc<AtomicUsize>, consecutive_errors: u32) -> TickFn {
    Arc::new(move || {
        let count = count.clone();
        Box::pin(async move {
            count.fetch_add(1, Ordering::SeqCst);
            PollSample {
                display_state: DeploymentState::Building,
                consecutive_errors,
            }
        })
    })
}

#[tokio::test(start_paused = true)]
async fn test_ticks_after_initial_delay_then_interval() {
    let poller = AdaptivePoller::new(PollingPolicy::default());
    let count = Arc::new(AtomicUsize::new(0));

    poller.start(counting_tick(count.clone(), 0));
    assert_eq!(poller.status(), PollerStatus::Scheduled);

    sleep(Duration::from_millis(900)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Building interval is 2s
    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(poller.is_running());

    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn test_no_tick_fires_after_stop() {
    let poller = AdaptivePoller::new(PollingPolicy::default());
    let count = Arc::new(AtomicUsize::new(0));

    poller.start(counting_tick(count.clone(), 0));
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    poller.stop();
    assert_eq!(poller.status(), PollerStatus::Stopped);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Stopping twice is harmless
    poller.stop();
    assert_eq!(poller.status(), PollerStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_restart_cancels_previous_schedule() {
    let poller = AdaptivePoller::new(PollingPolicy::default());
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    poller.start(counting_tick(first.clone(), 0));
    sleep(Duration::from_millis(500)).await;
    poller.start(counting_tick(second.clone(), 0));

    sleep(Duration::from_millis(900)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);

    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn test_max_polling_time_stops_polling() {
    let policy = PollingPolicy {
        max_polling_time: Duration::from_millis(5_500),
        ..PollingPolicy::default()
    };
    let poller = AdaptivePoller::new(policy);
    let count = Arc::new(AtomicUsize::new(0));

    poller.start(counting_tick(count.clone(), 0));
    sleep(Duration::from_secs(10)).await;

    // Ticks at 1s, 3s and 5s
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(poller.status(), PollerStatus::Stopped);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_errors_stretch_the_interval() {
    let poller = AdaptivePoller::new(PollingPolicy::default());
    let count = Arc::new(AtomicUsize::new(0));

    // One consecutive error: 2s * 1.5 = 3s between ticks
    poller.start(counting_tick(count.clone(), 1));

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);

    poller.stop();
}

#[test]
fn test_backoff_is_monotonic_up_to_cap() {
    let policy = PollingPolicy {
        backoff: BackoffOptions {
            multiplier: 2.0,
            max_delay: Duration::from_secs(20),
        },
        ..PollingPolicy::default()
    };

    for state in [
        DeploymentState::Building,
        DeploymentState::Ready,
        DeploymentState::Error,
    ] {
        let mut previous = Duration::ZERO;
        for errors in 0..32 {
            let next = policy.next_interval(&state, errors);
            assert!(next >= previous, "{} errors in {}", errors, state);
            assert!(next <= Duration::from_secs(20));
            previous = next;
        }
        assert_eq!(previous, Duration::from_secs(20));
    }
}

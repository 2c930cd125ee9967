use super::*;
use crate::error::WorkerError;
use crate::messaging::{
    exit_notice_channel, notification_channel, ErrorChannel, Inbox, Notifier, WorkerExit,
};
use crate::strategy::{Classification, CommonErrorStrategy, ErrorAction};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the scripted worker does on its next `execute`.
#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Backend(&'static str),
    Destroyed,
    Unexpected,
    Panic,
}

struct ScriptedWorker {
    inbox: Inbox,
    script: VecDeque<Step>,
    events: mpsc::UnboundedSender<&'static str>,
    fail_set_up: bool,
    fail_tear_down: bool,
}

#[async_trait]
impl Worker for ScriptedWorker {
    type Output = ();

    async fn reset(&mut self) {
        let _ = self.events.send("reset");
    }

    async fn set_up(&mut self) -> Result<(), WorkerError> {
        let _ = self.events.send("set_up");
        if self.fail_set_up {
            return Err(WorkerError::interface_destroyed("no connection"));
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), WorkerError> {
        self.inbox.recv().await.map(|_| ())
    }

    async fn pre_execute(&mut self) -> Result<(), WorkerError> {
        let _ = self.events.send("pre_execute");
        Ok(())
    }

    async fn execute(&mut self) -> Result<(), WorkerError> {
        let _ = self.events.send("execute");
        match self.script.pop_front().unwrap_or(Step::Succeed) {
            Step::Succeed => Ok(()),
            Step::Backend(message) => Err(WorkerError::backend(message)),
            Step::Destroyed => Err(WorkerError::interface_destroyed("socket closed")),
            Step::Unexpected => Err(WorkerError::Other(anyhow::anyhow!("boom"))),
            Step::Panic => panic!("worker crashed"),
        }
    }

    async fn post_execute(&mut self, _output: ()) -> Result<(), WorkerError> {
        let _ = self.events.send("post_execute");
        Ok(())
    }

    async fn tear_down(&mut self) -> Result<(), WorkerError> {
        let _ = self.events.send("tear_down");
        if self.fail_tear_down {
            return Err(WorkerError::backend("close failed"));
        }
        Ok(())
    }
}

/// Worker relying on the default `execute`.
struct BareWorker {
    inbox: Inbox,
}

#[async_trait]
impl Worker for BareWorker {
    type Output = ();

    async fn wait(&mut self) -> Result<(), WorkerError> {
        self.inbox.recv().await.map(|_| ())
    }
}

struct Harness {
    component: Component<ScriptedWorker>,
    notifier: Notifier,
    events: mpsc::UnboundedReceiver<&'static str>,
    exits: mpsc::Receiver<WorkerExit>,
    errors: ErrorChannel,
}

fn harness_with(
    script: Vec<Step>,
    strategy: Arc<dyn ErrorStrategy>,
    configure: impl FnOnce(&mut ScriptedWorker),
) -> Harness {
    let (notifier, inbox) = notification_channel(1);
    let (events_tx, events) = mpsc::unbounded_channel();
    let errors = ErrorChannel::default();
    let (exit_notifier, exits) = exit_notice_channel();

    let mut worker = ScriptedWorker {
        inbox,
        script: script.into(),
        events: events_tx,
        fail_set_up: false,
        fail_tear_down: false,
    };
    configure(&mut worker);

    let mut component =
        Component::new("processor", worker, strategy, errors.clone()).with_backoff_ceiling(3);
    component.set_exit_notifier(exit_notifier);

    Harness {
        component,
        notifier,
        events,
        exits,
        errors,
    }
}

fn harness(script: Vec<Step>) -> Harness {
    harness_with(script, Arc::new(CommonErrorStrategy::new()), |_| {})
}

async fn expect_events(events: &mut mpsc::UnboundedReceiver<&'static str>, expected: &[&str]) {
    for name in expected {
        assert_eq!(events.recv().await, Some(*name));
    }
}

#[tokio::test]
async fn test_queries_are_inert_before_start() {
    let mut h = harness(vec![]);

    assert!(!h.component.is_alive());
    assert_eq!(h.component.id(), None);
    assert_eq!(h.component.status(), ComponentStatus::default());

    h.component.join().await;
    h.component.terminate().await;
    assert!(!h.component.is_alive());
}

#[tokio::test]
async fn test_notification_runs_hooks_in_order() {
    let mut h = harness(vec![Step::Succeed]);
    h.component.start().await;
    assert!(h.component.is_alive());
    assert!(h.component.id().is_some());

    expect_events(&mut h.events, &["reset", "set_up"]).await;
    h.notifier.notify();
    expect_events(&mut h.events, &["pre_execute", "execute", "post_execute"]).await;

    assert!(h.component.is_alive());
    assert_eq!(h.component.status().backoff, Duration::ZERO);

    h.component.terminate().await;
    expect_events(&mut h.events, &["tear_down"]).await;
}

#[tokio::test]
async fn test_requested_stop_reports_nothing() {
    let mut h = harness(vec![]);
    h.component.start().await;
    expect_events(&mut h.events, &["reset", "set_up"]).await;

    h.component.terminate().await;

    assert!(!h.component.is_alive());
    assert_eq!(h.component.id(), None);
    assert_eq!(h.component.status().state, ComponentState::Idle);
    assert!(h.errors.try_take().is_none());
    assert!(h.exits.try_recv().is_err());
}

#[tokio::test]
async fn test_expected_terminate_reports_and_exits() {
    let mut h = harness(vec![Step::Destroyed]);
    h.component.start().await;
    h.notifier.notify();

    let exit = h.exits.recv().await.unwrap();
    assert_eq!(exit.component, "processor");
    assert_eq!(Some(exit.run_id), h.component.id());
    assert!(!h.component.is_alive());

    let report = h.errors.try_take().unwrap();
    assert_eq!(report.component, "processor");
    assert_eq!(
        report.classification,
        Classification::new(true, ErrorAction::Terminate)
    );

    expect_events(
        &mut h.events,
        &["reset", "set_up", "pre_execute", "execute", "tear_down"],
    )
    .await;

    h.component.join().await;
    assert_eq!(h.component.id(), None);
}

#[tokio::test]
async fn test_unexpected_terminate_reports_unexpected() {
    let mut h = harness(vec![Step::Unexpected]);
    h.component.start().await;
    h.notifier.notify();

    h.exits.recv().await.unwrap();
    let report = h.errors.try_take().unwrap();
    assert_eq!(report.classification, Classification::unexpected());
}

#[tokio::test]
async fn test_default_execute_is_not_implemented() {
    let (notifier, inbox) = notification_channel(1);
    let errors = ErrorChannel::default();
    let (exit_notifier, mut exits) = exit_notice_channel();
    let mut component = Component::new(
        "bare",
        BareWorker { inbox },
        Arc::new(CommonErrorStrategy::new()),
        errors.clone(),
    );
    component.set_exit_notifier(exit_notifier);

    component.start().await;
    notifier.notify();

    exits.recv().await.unwrap();
    assert_eq!(
        errors.try_take().unwrap().classification,
        Classification::new(false, ErrorAction::Terminate)
    );
}

#[tokio::test]
async fn test_continue_keeps_running() {
    let strategy: Arc<dyn ErrorStrategy> =
        Arc::new(|_: &WorkerError| Classification::expected(ErrorAction::Continue));
    let mut h = harness_with(vec![Step::Unexpected, Step::Succeed], strategy, |_| {});
    h.component.start().await;
    expect_events(&mut h.events, &["reset", "set_up"]).await;

    h.notifier.notify();
    expect_events(&mut h.events, &["pre_execute", "execute"]).await;
    h.notifier.notify();
    expect_events(&mut h.events, &["pre_execute", "execute", "post_execute"]).await;

    assert!(h.component.is_alive());
    assert!(h.errors.try_take().is_none());
    h.component.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sequence_wraps_at_ceiling() {
    let mut h = harness(vec![
        Step::Backend("deadlock detected"),
        Step::Backend("deadlock detected"),
        Step::Backend("deadlock detected"),
        Step::Backend("deadlock detected"),
        Step::Succeed,
    ]);
    let mut status = h.component.subscribe();
    h.component.start().await;

    let mut observed = Vec::new();
    for _ in 0..4 {
        h.notifier.notify();
        let backing_off = *status
            .wait_for(|s| s.state == ComponentState::Backoff)
            .await
            .unwrap();
        observed.push(backing_off.backoff.as_secs());
        status
            .wait_for(|s| s.state == ComponentState::Running)
            .await
            .unwrap();
    }
    assert_eq!(observed, vec![1, 2, 1, 2]);

    h.notifier.notify();
    status
        .wait_for(|s| s.state == ComponentState::Running && s.backoff == Duration::ZERO)
        .await
        .unwrap();
    assert!(h.component.is_alive());
    assert!(h.errors.try_take().is_none());

    h.component.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminate_interrupts_backoff_sleep() {
    let mut h = harness(vec![Step::Backend("too many connections")]);
    let mut status = h.component.subscribe();
    h.component.start().await;
    h.notifier.notify();

    status
        .wait_for(|s| s.state == ComponentState::Backoff)
        .await
        .unwrap();
    h.component.terminate().await;

    assert!(!h.component.is_alive());
    assert!(h.exits.try_recv().is_err());
    assert!(h.errors.try_take().is_none());
}

#[tokio::test]
async fn test_restart_round_trip_resets_state() {
    let mut h = harness(vec![]);

    h.component.start().await;
    let first = h.component.id();
    h.component.terminate().await;
    h.component.start().await;

    assert!(h.component.is_alive());
    assert_ne!(h.component.id(), first);
    assert_eq!(h.component.status().backoff, Duration::ZERO);
    assert_eq!(h.component.status().state, ComponentState::Running);

    expect_events(
        &mut h.events,
        &["reset", "set_up", "tear_down", "reset", "set_up"],
    )
    .await;
    h.component.terminate().await;
}

#[tokio::test]
async fn test_start_is_noop_while_alive() {
    let mut h = harness(vec![]);
    h.component.start().await;
    let id = h.component.id();

    h.component.start().await;
    assert_eq!(h.component.id(), id);
    h.component.terminate().await;
}

#[tokio::test]
async fn test_panic_reports_exit_without_error() {
    let mut h = harness(vec![Step::Panic]);
    h.component.start().await;
    h.notifier.notify();

    h.exits.recv().await.unwrap();
    assert!(h.errors.try_take().is_none());
    assert!(!h.component.is_alive());

    // The worker stays usable after a crashed run.
    h.component.start().await;
    assert!(h.component.is_alive());
    h.component.terminate().await;
}

#[tokio::test]
async fn test_set_up_failure_is_classified() {
    let mut h = harness_with(vec![], Arc::new(CommonErrorStrategy::new()), |worker| {
        worker.fail_set_up = true;
    });
    h.component.start().await;

    h.exits.recv().await.unwrap();
    assert_eq!(
        h.errors.try_take().unwrap().classification,
        Classification::expected(ErrorAction::Terminate)
    );
    expect_events(&mut h.events, &["reset", "set_up", "tear_down"]).await;
}

#[tokio::test]
async fn test_tear_down_failure_still_exits() {
    let mut h = harness_with(
        vec![Step::Destroyed],
        Arc::new(CommonErrorStrategy::new()),
        |worker| worker.fail_tear_down = true,
    );
    h.component.start().await;
    h.notifier.notify();

    h.exits.recv().await.unwrap();
    assert!(!h.component.is_alive());
    assert!(h.errors.try_take().is_some());
}

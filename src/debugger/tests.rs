use super::*;
use crate::config::Config;
use crate::interpreter::host::{HostInterop, StdHost};
use crate::interpreter::observer::{ExecutionObserver, SilentObserver, StatementEvent};
use crate::interpreter::tracker::Tracker;
use crate::interpreter::value::Val;
use crate::program::builder::*;
use crate::program::{Program, Stmt};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

/* ===================== Helpers ===================== */

fn console(text: &str) -> Stmt {
    expr(call_static("Console", "WriteLine", vec![string(text)]))
}

fn quiet_config() -> Config {
    let mut config = Config::default();
    config.session.trace_statements = false;
    config
}

fn session(program: Program) -> (Arc<Session>, Arc<StdHost>) {
    session_with(program, SessionOptions::new(quiet_config()))
}

fn session_with(program: Program, options: SessionOptions) -> (Arc<Session>, Arc<StdHost>) {
    let host = Arc::new(StdHost::new());
    let session = Session::with_options(program, Arc::clone(&host) as Arc<dyn HostInterop>, options);
    (Arc::new(session), host)
}

fn main_with(body: Vec<Stmt>) -> Program {
    ProgramBuilder::new()
        .method(MethodBuilder::new("Main").entry_point().body(body))
        .build()
}

/// Wait for the next transition into `state`
async fn wait_for(events: &mut broadcast::Receiver<StateChange>, state: SessionState) -> StateChange {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(change) if change.state == state => return change,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended before {}: {}", state, err),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
}

fn no_pause() -> DebugInfo {
    panic!("checkpoint must not pause here")
}

/// Counts statements that actually ran
#[derive(Default)]
struct CountingObserver {
    executed: AtomicUsize,
}

impl ExecutionObserver for CountingObserver {
    fn before_statement(&self, _event: &StatementEvent<'_>) {
        self.executed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records statement completions in `Work` and state changes in one order
#[derive(Default)]
struct LogObserver {
    log: parking_lot::Mutex<Vec<String>>,
}

impl ExecutionObserver for LogObserver {
    fn after_statement(&self, event: &StatementEvent<'_>) {
        if event.method == "Work" {
            self.log.lock().push("work".to_string());
        }
    }

    fn state_changed(&self, change: &StateChange) {
        self.log.lock().push(format!("state:{}", change.state));
    }
}

/* ===================== State machine ===================== */

#[test]
fn test_transition_table() {
    use SessionState::*;

    assert!(Ready.can_transition_to(Preparing));
    assert!(Preparing.can_transition_to(Running));
    assert!(Running.can_transition_to(Idle));
    assert!(Idle.can_transition_to(Running));
    assert!(Running.can_transition_to(Paused));
    assert!(Idle.can_transition_to(Paused));
    assert!(Paused.can_transition_to(Idle));
    assert!(Ready.can_transition_to(StoppedWithError));

    assert!(!Ready.can_transition_to(Running));
    assert!(!Preparing.can_transition_to(Idle));
    assert!(!Running.can_transition_to(Running));
    assert!(!Stopped.can_transition_to(Running));
    assert!(!StoppedWithError.can_transition_to(Stopped));
    assert_eq!(StoppedWithError.to_string(), "StoppedWithError");
}

#[test]
fn test_machine_refuses_invalid_transitions() {
    let machine = StateMachine::new(Arc::new(SilentObserver));
    let mut events = machine.subscribe();

    assert!(!machine.transition(SessionState::Running));
    assert!(machine.transition(SessionState::Preparing));
    assert!(machine.transition(SessionState::Running));
    assert!(!machine.activate());

    let tracker = Tracker::new();
    assert!(machine.refresh_idle(&tracker));
    assert_eq!(machine.current(), SessionState::Idle);

    assert!(machine.transition(SessionState::Stopped));
    assert!(!machine.transition(SessionState::Running));

    let seen: Vec<SessionState> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|change| change.state)
        .collect();
    assert_eq!(
        seen,
        vec![
            SessionState::Preparing,
            SessionState::Running,
            SessionState::Idle,
            SessionState::Stopped
        ]
    );
}

#[test]
fn test_only_first_failure_is_recorded() {
    let machine = StateMachine::new(Arc::new(SilentObserver));
    let first = RuntimeError::bad_type("first");
    let second = RuntimeError::bad_type("second");

    assert!(machine.fail(ErrorSnapshot::from(&first)));
    assert!(!machine.fail(ErrorSnapshot::from(&second)));
    assert_eq!(machine.current(), SessionState::StoppedWithError);
}

#[test]
fn test_gate_breakpoints_need_debug_mode_and_real_lines() {
    let gate = Gate::new();
    let machine = StateMachine::new(Arc::new(SilentObserver));
    gate.set_breakpoint(3);
    assert_eq!(gate.breakpoints(), vec![3]);

    // Release mode: the breakpoint line runs straight through
    let stmt = at_line(3, console("x"));
    assert!(gate.checkpoint(&stmt, &machine, no_pause).is_ok());

    // Plumbing statements never break, even on a breakpoint line
    gate.set_debug_mode(true);
    let label = Stmt::Label {
        name: "A".to_string(),
        span: crate::program::Span::line(3),
    };
    assert!(gate.checkpoint(&label, &machine, no_pause).is_ok());

    assert!(gate.clear_breakpoint(3));
    assert!(!gate.clear_breakpoint(3));
}

#[test]
fn test_gate_cancel_unwinds() {
    let gate = Gate::new();
    let machine = StateMachine::new(Arc::new(SilentObserver));
    gate.cancel();

    let result = gate.checkpoint(&console("x"), &machine, no_pause);
    assert!(matches!(result, Err(crate::interpreter::errors::Unwind::Cancelled)));
    assert!(gate.is_cancelled());
}

/* ===================== Sessions ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_hello_world() {
    let program = ProgramBuilder::new()
        .method(
            MethodBuilder::new("Main")
                .entry_point()
                .array_param("args")
                .body(vec![ret(index(var("args"), int(0)))]),
        )
        .build();
    let (session, _host) = session(program);

    let result = session
        .start_release(vec!["Hello World".to_string()])
        .await
        .expect("Main runs");

    assert_eq!(result, Val::Str("Hello World".into()));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_entry_point() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Helper").body(vec![ret(int(1))]))
        .build();
    let (session, _host) = session(program);

    let err = session.start_release(vec![]).await.expect_err("no entry point");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::MissingEntryPoint, .. })
    ));
    assert_eq!(session.state(), SessionState::StoppedWithError);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_several_entry_points() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("A").entry_point())
        .method(MethodBuilder::new("B").entry_point())
        .build();
    let (session, _host) = session(program);
    let mut events = session.subscribe();

    let err = session.start_release(vec![]).await.expect_err("two entry points");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::SeveralEntryPoint, .. })
    ));

    let failed = wait_for(&mut events, SessionState::StoppedWithError).await;
    let snapshot = failed.error.expect("failure carries a snapshot");
    assert_eq!(snapshot.kind, ErrorKind::SeveralEntryPoint);
    assert!(snapshot.message.contains("A, B"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_preparation_diagnostic_ends_session() {
    let program = main_with(vec![expr(call("Nowhere", vec![]))]);
    let (session, host) = session(program);

    let err = session.start_release(vec![]).await.expect_err("unresolved call");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::MethodNotFound, .. })
    ));
    assert_eq!(session.state(), SessionState::StoppedWithError);
    assert!(host.console_output().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_assembly_fails_preparation() {
    let mut program = main_with(vec![ret(int(0))]);
    program.assemblies.push("Missing.Assembly".to_string());
    let (session, _host) = session(program);

    let err = session.start_release(vec![]).await.expect_err("assembly missing");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::AssemblyLoad, .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runtime_failure_stops_with_error() {
    let program = main_with(vec![console("before"), at_line(1, ret(div(int(1), int(0))))]);
    let (session, host) = session(program);
    let mut events = session.subscribe();

    let err = session.start_release(vec![]).await.expect_err("divides by zero");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::DivideByZero, .. })
    ));

    let failed = wait_for(&mut events, SessionState::StoppedWithError).await;
    let snapshot = failed.error.expect("snapshot");
    assert_eq!(snapshot.span.map(|s| s.start_line), Some(1));
    assert_eq!(snapshot.node.as_deref(), Some("return"));
    assert!(snapshot.debug_info.is_some());
    assert_eq!(host.console_output(), vec!["before".to_string()]);
    assert_eq!(session.state(), SessionState::StoppedWithError);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cannot_start_twice() {
    let (session, _host) = session(main_with(vec![ret(int(0))]));
    session.start_release(vec![]).await.expect("first run");

    let err = session.start_release(vec![]).await.expect_err("second run");
    assert!(matches!(err, SessionError::InvalidState { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recursion_past_inlining_limit() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").entry_point().body(vec![ret(call(
            "Fact",
            vec![int(6)],
        ))]))
        .method(MethodBuilder::new("Fact").param("n").body(vec![
            if_then(le(var("n"), int(1)), vec![ret(int(1))]),
            ret(mul(var("n"), call("Fact", vec![sub(var("n"), int(1))]))),
        ]))
        .build();
    let (session, _host) = session(program);

    let result = session.start_release(vec![]).await.expect("Fact runs");
    assert_eq!(result, Val::Int(720));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_only_after_async_work_completes() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").entry_point().body(vec![
            expr(call("Work", vec![int(30)])),
            expr(call("Work", vec![int(60)])),
        ]))
        .method(MethodBuilder::new("Work").asynchronous().param("ms").body(vec![
            expr(call_static("Thread", "Sleep", vec![var("ms")])),
            expr(call_static("Console", "WriteLine", vec![var("ms")])),
        ]))
        .build();
    let observer = Arc::new(LogObserver::default());
    let options = SessionOptions::new(quiet_config()).observer(observer.clone());
    let (session, host) = session_with(program, options);

    session.start_release(vec![]).await.expect("Main runs");

    let log = observer.log.lock().clone();
    let idle = log
        .iter()
        .position(|entry| entry == "state:Idle")
        .expect("session went idle");
    let last_work = log
        .iter()
        .rposition(|entry| entry == "work")
        .expect("work ran");
    assert!(last_work < idle, "idle before work finished: {:?}", log);
    assert_eq!(log.iter().filter(|entry| *entry == "work").count(), 4);
    assert_eq!(host.console_output().len(), 2);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_next_step_runs_exactly_one_statement() {
    let body = (0..6).map(|i| console(&format!("line {}", i))).collect();
    let observer = Arc::new(CountingObserver::default());
    let options = SessionOptions::new(quiet_config()).observer(observer.clone());
    let (session, host) = session_with(main_with(body), options);
    let mut events = session.subscribe();

    // Armed before start: the entry point blocks at its first statement
    assert_ok!(session.pause());
    let run = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start_debug(vec![]).await }
    });

    let paused = wait_for(&mut events, SessionState::Paused).await;
    let info = paused.debug_info.expect("paused with a call stack");
    assert_eq!(info.frames[0].method, "Main");
    assert_eq!(observer.executed.load(Ordering::SeqCst), 0);

    for n in 1..=3 {
        assert_ok!(session.next_step());
        wait_for(&mut events, SessionState::Paused).await;
        assert_eq!(observer.executed.load(Ordering::SeqCst), n);
    }
    assert_eq!(host.console_output().len(), 3);

    assert_ok!(session.resume());
    run.await.expect("join").expect("Main finishes");
    assert_eq!(host.console_output().len(), 6);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_step_requires_pause() {
    let (session, _host) = session(main_with(vec![ret(int(0))]));
    assert!(matches!(
        session.next_step(),
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breakpoint_pauses_debug_session() {
    let program = main_with(vec![
        at_line(0, console("a")),
        at_line(1, console("b")),
        at_line(2, console("c")),
    ]);
    let (session, host) = session(program);
    let mut events = session.subscribe();
    assert!(session.set_breakpoint(1));

    let run = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start_debug(vec![]).await }
    });

    let paused = wait_for(&mut events, SessionState::Paused).await;
    let info = paused.debug_info.expect("call stack");
    assert_eq!(info.frames[0].span.start_line, 1);
    assert_eq!(host.console_output(), vec!["a".to_string()]);

    session.resume().expect("resume");
    run.await.expect("join").expect("Main finishes");
    assert_eq!(host.console_output(), vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_release_session_ignores_breakpoints() {
    let program = main_with(vec![at_line(0, console("a")), at_line(1, console("b"))]);
    let (session, host) = session(program);
    session.set_breakpoint(1);

    tokio::time::timeout(Duration::from_secs(10), session.start_release(vec![]))
        .await
        .expect("release run does not pause")
        .expect("Main finishes");
    assert_eq!(host.console_output().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_cancels_running_program() {
    let program = main_with(vec![
        declare("n", Some(int(0))),
        while_loop(boolean(true), vec![assign(var("n"), add(var("n"), int(1)))]),
    ]);
    let (session, _host) = session(program);
    let mut events = session.subscribe();

    let run = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start_release(vec![]).await }
    });
    wait_for(&mut events, SessionState::Running).await;

    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);

    let result = run.await.expect("join");
    assert!(matches!(result, Err(SessionError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_while_paused() {
    let (session, _host) = session(main_with(vec![console("a"), console("b")]));
    let mut events = session.subscribe();
    session.pause().expect("pause");

    let run = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start_debug(vec![]).await }
    });
    wait_for(&mut events, SessionState::Paused).await;

    session.stop().await;
    assert!(matches!(run.await.expect("join"), Err(SessionError::Cancelled)));
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(session.pause(), Err(SessionError::Terminated)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_host_invocations_on_kept_alive_session() {
    let program = ProgramBuilder::new()
        .method(MethodBuilder::new("Main").entry_point().body(vec![ret(int(0))]))
        .method(MethodBuilder::new("Double").param("x").body(vec![ret(mul(var("x"), int(2)))]))
        .method(MethodBuilder::new("Later").asynchronous().param("x").body(vec![
            expr(call_static("Thread", "Sleep", vec![int(20)])),
            ret(add(var("x"), int(1))),
        ]))
        .build();
    let mut config = quiet_config();
    config.session.keep_alive = true;
    let (session, _host) = session_with(program, SessionOptions::new(config));

    assert!(matches!(
        session.invoke_method(true, "Double", vec![Val::Int(1)]).await,
        Err(SessionError::NotStarted)
    ));

    session.start_release(vec![]).await.expect("Main runs");
    assert_eq!(session.state(), SessionState::Idle);

    let doubled = session
        .invoke_method(true, "Double", vec![Val::Int(21)])
        .await
        .expect("Double runs");
    assert!(matches!(doubled, Invocation::Value(Val::Int(42))));
    assert_eq!(session.state(), SessionState::Idle);

    let later = session
        .invoke_method(true, "Later", vec![Val::Int(1)])
        .await
        .expect("Later starts");
    assert!(matches!(later, Invocation::Task(_)));
    assert_eq!(later.into_value().await.expect("Later finishes"), Val::Int(2));

    let err = session
        .invoke_method(true, "Missing", vec![])
        .await
        .expect_err("unknown method");
    assert!(matches!(
        err,
        SessionError::Runtime(RuntimeError { kind: ErrorKind::MethodNotFound, .. })
    ));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(
        session.invoke_method(true, "Double", vec![Val::Int(1)]).await,
        Err(SessionError::Terminated)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_and_resume_while_idle() {
    let mut config = quiet_config();
    config.session.keep_alive = true;
    let (session, _host) = session_with(main_with(vec![ret(int(0))]), SessionOptions::new(config));

    session.start_release(vec![]).await.expect("Main runs");
    assert_eq!(session.state(), SessionState::Idle);

    assert_ok!(session.pause());
    assert_eq!(session.state(), SessionState::Paused);
    // Nothing runs, so there is nothing to step
    assert_err!(session.next_step());

    assert_ok!(session.resume());
    assert_eq!(session.state(), SessionState::Idle);

    session.stop().await;
}

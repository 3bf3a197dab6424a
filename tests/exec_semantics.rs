//! End-to-end execution semantics, driven through a locally ticked instance
//! on the simulated clock.

use sprig::runtime::renderer::RejectingRenderer;
use sprig::runtime::{Clock, CreateCoroutinePayload, CoroutineId, Instance, RuntimeConfig};
use sprig::{Value, VDom, VDomBuilder};
use std::sync::Arc;
use std::time::Duration;

fn instance() -> Instance {
    instance_with(RuntimeConfig::default()).0
}

fn instance_with(config: RuntimeConfig) -> (Instance, Clock) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let clock = Clock::simulated();
    let (inst, _handle) = Instance::with_clock("edpt://localhost/test/exec", config, clock.clone());
    (inst, clock)
}

fn schedule(inst: &mut Instance, dom: VDom) -> CoroutineId {
    inst.create_coroutine(CreateCoroutinePayload::new(Arc::new(dom)))
}

fn run_to_outcome(inst: &mut Instance, cid: CoroutineId) -> sprig::runtime::Outcome {
    for _ in 0..256 {
        if let Some(outcome) = inst.outcome(cid) {
            return outcome.clone();
        }
        inst.tick();
    }
    panic!("coroutine did not finish within 256 ticks");
}

#[test]
fn matching_clause_inherits_the_question() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("test")
        .attr("on", "1")
        .open("match")
        .attr("for", "1")
        .attr("exclusively", "")
        .leaf("exit", &[("with", "$?")])
        .close()
        .leaf("match", &[("for", "2")])
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::integer(1)));
    assert!(outcome.error.is_none());
}

#[test]
fn later_clause_runs_when_earlier_ones_miss() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("test")
        .attr("on", "2")
        .open("match")
        .attr("for", "1")
        .leaf("exit", &[("with", "first")])
        .close()
        .open("match")
        .attr("for", "2")
        .leaf("exit", &[("with", "second")])
        .close()
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("second")));
}

#[test]
fn exclusive_hit_stops_remaining_clauses() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("test")
        .attr("on", "1")
        .open("match")
        .attr("for", "*")
        .attr("exclusively", "")
        .close()
        .open("match")
        .attr("for", "*")
        .leaf("exit", &[("with", "reached")])
        .close()
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_ne!(outcome.result, Some(Value::string("reached")));
    assert!(outcome.error.is_none());
}

#[test]
fn true_question_does_not_stop_later_clauses() {
    // Only exclusively suppresses siblings; a non-exclusive hit whose
    // question happens to be boolean true must not.
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("test")
        .attr("on", "true")
        .leaf("match", &[("for", "*")])
        .open("match")
        .attr("for", "*")
        .leaf("exit", &[("with", "reached")])
        .close()
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("reached")));
    assert!(outcome.error.is_none());
}

#[test]
fn catch_consumes_a_matching_category() {
    // The attribute-less test raises invalidValue; the first catch does not
    // name it, the second does and runs with the category as its question.
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("test", &[])
        .leaf("catch", &[("for", "badValue noData")])
        .open("catch")
        .attr("for", "invalidValue")
        .leaf("exit", &[("with", "$?")])
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("invalidValue")));
    assert!(outcome.error.is_none());
}

#[test]
fn unhandled_exception_becomes_the_terminal_status() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("test", &[])
        .leaf("catch", &[("for", "badValue")])
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.error.map(|a| a.as_str()), Some("invalidValue"));
}

#[test]
fn wildcard_catch_handles_anything() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("test", &[])
        .open("catch")
        .leaf("exit", &[("with", "handled")])
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("handled")));
    assert!(outcome.error.is_none());
}

#[test]
fn exit_latches_before_its_attributes_are_validated() {
    // No `with`: the exception is raised, but nothing after the exit runs.
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("exit", &[])
        .leaf("test", &[("on", "1")])
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.error.map(|a| a.as_str()), Some("badValue"));
    assert!(outcome.result.is_none());
}

#[test]
fn elements_after_exit_never_run() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("exit", &[("with", "early")])
        .leaf("exit", &[("with", "late")])
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("early")));
}

#[test]
fn sleep_suspends_until_the_timer_fires() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .leaf("sleep", &[("with", "2")])
        .leaf("exit", &[("with", "done")])
        .close();

    let (mut inst, clock) = instance_with(RuntimeConfig::default());
    let cid = schedule(&mut inst, b.build());

    for _ in 0..16 {
        inst.tick();
    }
    assert!(inst.outcome(cid).is_none(), "finished without sleeping");
    assert_eq!(inst.coroutine_count(), 1);

    clock.advance(Duration::from_secs(1));
    for _ in 0..16 {
        inst.tick();
    }
    assert!(inst.outcome(cid).is_none(), "woke a second early");

    clock.advance(Duration::from_secs(1));
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("done")));
}

#[test]
fn sleep_rejects_non_positive_intervals() {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("sleep", &[("with", "0")]).close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.error.map(|a| a.as_str()), Some("invalidValue"));
}

#[test]
fn iterate_reruns_its_body_per_item() {
    // The exit only fires on the pass whose item is 3, so reaching it
    // proves every pass ran with its own question variable.
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("iterate")
        .attr("on", "[1, 2, 3]")
        .open("test")
        .attr("on", "$?")
        .open("match")
        .attr("for", "3")
        .attr("exclusively", "")
        .leaf("exit", &[("with", "$?")])
        .close()
        .close()
        .close()
        .close();

    let mut inst = instance();
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::integer(3)));
}

#[test]
fn request_data_is_the_root_question() {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("exit", &[("with", "$?")]).close();

    let mut inst = instance();
    let mut payload = CreateCoroutinePayload::new(Arc::new(b.build()));
    payload.request = Some(Value::integer(7));
    let cid = inst.create_coroutine(payload);
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::integer(7)));
}

#[test]
fn empty_document_finishes_with_no_data() {
    let mut inst = instance();
    let cid = schedule(&mut inst, VDomBuilder::new().build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.error.map(|a| a.as_str()), Some("noData"));
}

#[test]
fn stack_depth_overflow_is_a_catchable_exception() {
    // Four levels of nesting against a three-frame limit; the handler and
    // its exit stay within it.
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("div")
        .open("div")
        .leaf("span", &[])
        .close()
        .close()
        .open("catch")
        .attr("for", "memoryFailure")
        .leaf("exit", &[("with", "caught")])
        .close()
        .close();

    let config = RuntimeConfig {
        max_stack_depth: 3,
        ..RuntimeConfig::default()
    };
    let (mut inst, _clock) = instance_with(config);
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("caught")));
    assert!(outcome.error.is_none());
}

#[test]
fn body_id_selects_the_entry_element() {
    let mut b = VDomBuilder::new();
    b.open("hvml")
        .open("div")
        .attr("id", "alpha")
        .leaf("exit", &[("with", "alpha")])
        .close()
        .open("div")
        .attr("id", "beta")
        .leaf("exit", &[("with", "beta")])
        .close()
        .close();
    let dom = Arc::new(b.build());

    let mut inst = instance();
    let mut payload = CreateCoroutinePayload::new(dom);
    payload.body_id = Some("beta".to_string());
    let cid = inst.create_coroutine(payload);
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("beta")));
}

#[test]
fn renderer_rejection_does_not_affect_the_outcome() {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("exit", &[("with", "fine")]).close();

    let mut inst = instance();
    inst.set_renderer(Arc::new(RejectingRenderer));
    let cid = schedule(&mut inst, b.build());
    let outcome = run_to_outcome(&mut inst, cid);
    assert_eq!(outcome.result, Some(Value::string("fine")));
    assert!(outcome.error.is_none());
}

#[test]
fn idle_is_broadcast_to_observers_after_the_quiet_period() {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("sleep", &[("with", "600")]).close();

    let (mut inst, clock) = instance_with(RuntimeConfig::default());
    let mut payload = CreateCoroutinePayload::new(Arc::new(b.build()));
    payload.observe_idle = true;
    let cid = inst.create_coroutine(payload);

    for _ in 0..4 {
        inst.tick();
    }
    assert!(inst.pending_event_kinds(cid).is_empty());

    clock.advance(Duration::from_millis(200));
    inst.tick();
    let kinds: Vec<&str> = inst
        .pending_event_kinds(cid)
        .iter()
        .map(|a| a.as_str())
        .collect();
    assert!(kinds.contains(&"idle"), "kinds: {kinds:?}");

    // Further quiet periods do not stack idle events behind the first.
    for _ in 0..3 {
        clock.advance(Duration::from_millis(200));
        inst.tick();
    }
    let idles = inst
        .pending_event_kinds(cid)
        .iter()
        .filter(|a| a.as_str() == "idle")
        .count();
    assert_eq!(idles, 1);
}

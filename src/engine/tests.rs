// Scenario tests for circuits: batch runs, nesting, online extension, capabilities
use crate::{
    engine::{
        CapabilityRequest, Circuit, Environment, Gadget, GadgetContext, GadgetState,
        LostMessage, LostReceiver, MemorySettings, Provision, SettingsApi, SETTINGS_API,
    },
    gadgets::{register_standard, Transformer, DISPATCH},
    CircuitDescription, FlowConfig, FlowError, Message, PinSpec, Result, Tag,
};

use async_trait::async_trait;
use serde_json::json;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

// Test helpers
fn test_environment() -> Environment {
    let env = Environment::isolated(FlowConfig::quiet());
    register_standard(&env.registry).unwrap();
    env
}

async fn run_to_end(circuit: &Circuit) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(10), circuit.run())
        .await
        .expect("circuit did not finish")
}

/// Everything reported so far; the run has finished, so nothing is in flight
fn reports(lost: &mut LostReceiver) -> Vec<LostMessage> {
    let mut out = Vec::new();
    while let Ok(message) = lost.try_recv() {
        out.push(message);
    }
    out
}

fn texts(reports: &[LostMessage]) -> Vec<String> {
    reports.iter().map(|r| r.to_string()).collect()
}

fn pipe_pair(name: &str, env: &Environment) -> Result<Circuit> {
    let circuit = Circuit::with_environment(name, env.clone());
    circuit.add("p1", "Pipe")?;
    circuit.add("p2", "Pipe")?;
    circuit.connect("p1.Out", "p2.In", 0)?;
    circuit.label("In", "p1.In")?;
    circuit.label("Out", "p2.Out")?;
    Ok(circuit)
}

type InspectFn = Box<dyn FnOnce(&GadgetContext) -> Result<()> + Send>;

/// Runs one closure against its context, no pins
struct Inspector {
    inspect: InspectFn,
}

impl Inspector {
    fn new<F>(inspect: F) -> Self
    where
        F: FnOnce(&GadgetContext) -> Result<()> + Send + 'static,
    {
        Self {
            inspect: Box::new(inspect),
        }
    }
}

#[async_trait]
impl Gadget for Inspector {
    fn pins(&self) -> Vec<PinSpec> {
        Vec::new()
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let this = *self;
        (this.inspect)(&ctx)
    }
}

/// Panics as soon as it runs
struct Bomb;

#[async_trait]
impl Gadget for Bomb {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, _ctx: GadgetContext) -> Result<()> {
        panic!("bomb went off");
    }
}

#[tokio::test]
async fn test_uppercase_transformer_reports_lost_output() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add_circuitry("u", Transformer::uppercase()).unwrap();
    circuit.feed("u.In", "abc").unwrap();
    circuit.feed("u.In", "def").unwrap();
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    let reports = reports(&mut lost);
    assert_eq!(texts(&reports), vec!["Lost String: ABC", "Lost String: DEF"]);
    assert!(reports.iter().all(|r| r.pin == "top.u.Out" && r.circuit == "top"));
    assert_eq!(circuit.state_of("u"), Some(GadgetState::Finished));
}

#[tokio::test]
async fn test_empty_circuit_returns_immediately() {
    let circuit = Circuit::with_environment("empty", test_environment());
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    assert!(reports(&mut lost).is_empty());
    assert!(circuit.run_id().is_some());
    assert!(!circuit.is_running());
}

#[tokio::test]
async fn test_labeled_repeater_inside_parent() {
    let env = test_environment();

    let inner = Circuit::with_environment("rep", env.clone());
    inner.add("r", "Repeater").unwrap();
    inner.feed("r.Num", Message::new(3usize)).unwrap();
    inner.label("MyIn", "r.In").unwrap();
    inner.label("MyOut", "r.Out").unwrap();

    let top = Circuit::with_environment("top", env);
    top.add_circuitry("c", inner.clone()).unwrap();
    top.feed("c.MyIn", "abc").unwrap();
    top.feed("c.MyIn", "def").unwrap();
    let mut lost = top.tap_lost();

    run_to_end(&top).await.unwrap();

    let reports = reports(&mut lost);
    assert_eq!(
        texts(&reports),
        vec![
            "Lost String: abc",
            "Lost String: abc",
            "Lost String: abc",
            "Lost String: def",
            "Lost String: def",
            "Lost String: def",
        ]
    );
    assert!(reports.iter().all(|r| r.pin == "top.c.MyOut"));
    assert_eq!(inner.path(), "top.c");
}

#[tokio::test]
async fn test_nested_pass_through_stages_preserve_order() {
    let env = test_environment();

    let middle = Circuit::with_environment("middle", env.clone());
    middle.add_circuitry("g1", pipe_pair("g1", &env).unwrap()).unwrap();
    middle.add_circuitry("g2", pipe_pair("g2", &env).unwrap()).unwrap();
    middle.connect("g1.Out", "g2.In", 0).unwrap();
    middle.label("In", "g1.In").unwrap();
    middle.label("Out", "g2.Out").unwrap();

    let top = Circuit::with_environment("top", env);
    top.add("a", "Pipe").unwrap();
    top.add_circuitry("m", middle).unwrap();
    top.add("b", "Pipe").unwrap();
    top.connect("a.Out", "m.In", 0).unwrap();
    top.connect("m.Out", "b.In", 0).unwrap();
    for data in ["abc", "def", "ghi"] {
        top.feed("a.In", data).unwrap();
    }
    let mut lost = top.tap_lost();

    run_to_end(&top).await.unwrap();

    assert_eq!(
        texts(&reports(&mut lost)),
        vec!["Lost String: abc", "Lost String: def", "Lost String: ghi"]
    );
}

#[tokio::test]
async fn test_dispatcher_attaches_and_detaches_sub_worker() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add("d", "Dispatcher").unwrap();
    circuit.feed("d.In", "abc").unwrap();
    circuit.feed("d.In", Tag::new(DISPATCH, "Counter")).unwrap();
    circuit.feed("d.In", "def").unwrap();
    circuit.feed("d.In", "ghi").unwrap();
    circuit.feed("d.In", Tag::new(DISPATCH, "")).unwrap();
    circuit.feed("d.In", "jkl").unwrap();
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    let reports = reports(&mut lost);
    let from_dispatcher: Vec<String> = reports
        .iter()
        .filter(|r| r.pin == "top.d.Out")
        .map(|r| r.to_string())
        .collect();
    assert_eq!(
        from_dispatcher,
        vec![
            "Lost String: abc",
            "Lost Tag: {<dispatched> Counter}",
            "Lost Tag: {<dispatched> }",
            "Lost String: jkl",
        ]
    );

    let counts: Vec<String> = reports
        .iter()
        .filter(|r| r.pin == "top.d-Counter.Out")
        .map(|r| r.to_string())
        .collect();
    assert_eq!(counts, vec!["Lost usize: 2"]);

    // the spliced-in worker shows up in the declarations
    let description = circuit.describe();
    assert!(description
        .gadgets
        .iter()
        .any(|g| g.name == "d-Counter" && g.type_name == "Counter"));
    assert!(description
        .wires
        .iter()
        .any(|w| w.from == "d.Feed" && w.to == "d-Counter.In"));
    assert_eq!(circuit.state_of("d-Counter"), Some(GadgetState::Finished));
}

#[tokio::test]
async fn test_fan_in_waits_for_every_producer() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add("a", "Pipe").unwrap();
    circuit.add("b", "Pipe").unwrap();
    circuit.add("c", "Counter").unwrap();
    circuit.connect("a.Out", "c.In", 0).unwrap();
    circuit.connect("b.Out", "c.In", 0).unwrap();
    for i in 0..2 {
        circuit.feed("a.In", Message::new(i as i64)).unwrap();
    }
    for i in 0..3 {
        circuit.feed("b.In", Message::new(i as i64)).unwrap();
    }
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    assert_eq!(texts(&reports(&mut lost)), vec!["Lost usize: 5"]);
}

#[tokio::test]
async fn test_dangling_input_is_end_of_stream() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add("c", "Counter").unwrap();
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    assert_eq!(texts(&reports(&mut lost)), vec!["Lost usize: 0"]);
}

/// Splices a `Pipe` behind itself while running, then forwards `In` to `Out`
struct Extender {
    capacity: Arc<Mutex<Option<usize>>>,
}

#[async_trait]
impl Gadget for Extender {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let circuit = ctx.circuit().clone();
        circuit.add("late", "Pipe")?;
        circuit.feed("late.In", "pre")?;
        circuit.connect(&format!("{}.Out", ctx.name()), "late.In", 3)?;
        *self.capacity.lock().unwrap() = circuit.wire_capacity("late.In");
        circuit.launch("late")?;

        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            output.send(message).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_online_extension_matches_batch_binding() {
    // online: the wire is declared while the circuit runs
    let online_capacity = Arc::new(Mutex::new(None));
    let online = Circuit::with_environment("top", test_environment());
    online
        .add_circuitry(
            "e",
            Extender {
                capacity: online_capacity.clone(),
            },
        )
        .unwrap();
    online.feed("e.In", "abc").unwrap();
    online.feed("e.In", "def").unwrap();
    let mut lost = online.tap_lost();

    run_to_end(&online).await.unwrap();

    assert_eq!(
        texts(&reports(&mut lost)),
        vec!["Lost String: pre", "Lost String: abc", "Lost String: def"]
    );
    assert_eq!(online.state_of("late"), Some(GadgetState::Finished));

    // batch: the same declarations up front
    let batch_capacity = Arc::new(Mutex::new(None));
    let seen = batch_capacity.clone();
    let batch = Circuit::with_environment("top", test_environment());
    batch.add("e", "Pipe").unwrap();
    batch.add("late", "Pipe").unwrap();
    batch.feed("late.In", "pre").unwrap();
    batch.connect("e.Out", "late.In", 3).unwrap();
    batch
        .add_circuitry(
            "inspector",
            Inspector::new(move |ctx| {
                *seen.lock().unwrap() = ctx.circuit().wire_capacity("late.In");
                Ok(())
            }),
        )
        .unwrap();

    run_to_end(&batch).await.unwrap();

    assert_eq!(*online_capacity.lock().unwrap(), Some(3));
    assert_eq!(*online_capacity.lock().unwrap(), *batch_capacity.lock().unwrap());
}

#[tokio::test]
async fn test_launch_rules() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add("p", "Pipe").unwrap();
    assert!(matches!(circuit.launch("p"), Err(FlowError::NotRunning(_))));

    let outcome = Arc::new(Mutex::new(Vec::new()));
    let seen = outcome.clone();
    circuit
        .add_circuitry(
            "inspector",
            Inspector::new(move |ctx| {
                let circuit = ctx.circuit();
                seen.lock().unwrap().push(circuit.launch("inspector").unwrap_err());
                seen.lock().unwrap().push(circuit.launch("nope").unwrap_err());
                Ok(())
            }),
        )
        .unwrap();

    run_to_end(&circuit).await.unwrap();

    let errors = outcome.lock().unwrap();
    assert!(matches!(errors[0], FlowError::AlreadyLaunched(_)));
    assert!(matches!(errors[1], FlowError::UnknownGadget { .. }));
    assert!(matches!(
        run_to_end(&circuit).await,
        Err(FlowError::AlreadyStarted(_))
    ));
}

#[tokio::test]
async fn test_construction_errors() {
    let env = test_environment();
    let circuit = Circuit::with_environment("top", env.clone());
    circuit.add("p", "Pipe").unwrap();

    assert!(matches!(
        circuit.add("p", "Pipe"),
        Err(FlowError::DuplicateGadget { .. })
    ));
    assert!(matches!(
        circuit.connect("p.Out", "q.In", 0),
        Err(FlowError::UnknownGadget { .. })
    ));
    assert!(matches!(
        circuit.connect("p.Out", "p.Nope", 0),
        Err(FlowError::UnresolvedPin { .. })
    ));
    assert!(matches!(
        circuit.feed("Nope", "x"),
        Err(FlowError::UnresolvedPin { .. })
    ));
    assert!(matches!(
        circuit.feed("p.Out", "x"),
        Err(FlowError::PinDirection { .. })
    ));
    assert!(matches!(
        circuit.connect("p.In", "p.Out", 0),
        Err(FlowError::PinDirection { .. })
    ));
    assert!(matches!(
        circuit.label("my.In", "p.In"),
        Err(FlowError::QualifiedLabel(_))
    ));

    // unknown types are skipped with a warning unless the registry is strict
    circuit.add("x", "NoSuchType").unwrap();
    assert!(!circuit.contains("x"));

    let mut strict = FlowConfig::quiet();
    strict.strict_registry = true;
    let circuit = Circuit::with_environment("strict", env.with_config(strict));
    assert!(matches!(
        circuit.add("x", "NoSuchType"),
        Err(FlowError::UnknownGadgetType { .. })
    ));
}

#[tokio::test]
async fn test_redeclared_wire_is_additive() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add("a", "Pipe").unwrap();
    circuit.add("b", "Pipe").unwrap();
    circuit.connect("a.Out", "b.In", 1).unwrap();
    circuit.connect("a.Out", "b.In", 4).unwrap();
    circuit.connect("a.Out", "b.In", 2).unwrap();

    let wires = circuit.describe().wires;
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].capacity, 4);
}

#[tokio::test]
async fn test_gadget_panic_propagates_and_unblocks_consumers() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit.add_circuitry("bomb", Bomb).unwrap();
    circuit.add("c", "Counter").unwrap();
    circuit.connect("bomb.Out", "c.In", 0).unwrap();
    let mut lost = circuit.tap_lost();

    let err = run_to_end(&circuit).await.unwrap_err();
    match err {
        FlowError::GadgetFailed { gadget, reason } => {
            assert_eq!(gadget, "top.bomb");
            assert!(reason.contains("bomb went off"));
        }
        other => panic!("unexpected error: {}", other),
    }
    // the counter still saw end-of-stream
    assert_eq!(texts(&reports(&mut lost)), vec!["Lost usize: 0"]);
}

#[tokio::test]
async fn test_nested_failure_reaches_outer_run() {
    let env = test_environment();
    let inner = Circuit::with_environment("inner", env.clone());
    inner.add_circuitry("bomb", Bomb).unwrap();

    let top = Circuit::with_environment("top", env);
    top.add_circuitry("c", inner).unwrap();

    match run_to_end(&top).await {
        Err(FlowError::GadgetFailed { gadget, reason }) => {
            assert_eq!(gadget, "top.c");
            assert!(reason.contains("top.c.bomb"));
        }
        other => panic!("unexpected outcome: {:?}", other.err()),
    }
}

/// Offers `SettingsAPI`, either shared or one instance per consumer
struct SettingsProvider {
    shared: Option<Arc<MemorySettings>>,
}

#[async_trait]
impl Gadget for SettingsProvider {
    fn pins(&self) -> Vec<PinSpec> {
        Vec::new()
    }

    fn provides(&mut self) -> Vec<Provision> {
        match &self.shared {
            Some(settings) => {
                let settings: Arc<dyn SettingsApi> = settings.clone();
                vec![Provision::shared(SETTINGS_API, settings)]
            }
            None => vec![Provision::per_consumer(SETTINGS_API, || {
                Arc::new(MemorySettings::new()) as Arc<dyn SettingsApi>
            })],
        }
    }

    async fn run(self: Box<Self>, _ctx: GadgetContext) -> Result<()> {
        Ok(())
    }
}

/// Writes its own name into the injected settings and reports the visible keys
struct SettingsUser;

#[async_trait]
impl Gadget for SettingsUser {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::output("Out")]
    }

    fn consumes(&self) -> Vec<CapabilityRequest> {
        vec![CapabilityRequest::of::<dyn SettingsApi>(SETTINGS_API)]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let settings = ctx
            .capability::<dyn SettingsApi>(SETTINGS_API)
            .ok_or_else(|| FlowError::Capability("settings not injected".to_string()))?;
        settings.put(ctx.name(), json!(ctx.path()))?;
        let keys = settings.keys("")?;
        ctx.output("Out")?.send(Message::new(keys.len())).await
    }
}

#[tokio::test]
async fn test_per_consumer_capabilities() {
    let env = test_environment();
    let services = Circuit::with_environment("services", env.clone());
    services
        .add_circuitry("settings", SettingsProvider { shared: None })
        .unwrap();

    let top = Circuit::with_environment("top", env.clone());
    top.add_circuitry("services", services).unwrap();
    top.add_circuitry("a", SettingsUser).unwrap();
    top.add_circuitry("b", SettingsUser).unwrap();
    let mut lost = top.tap_lost();

    run_to_end(&top).await.unwrap();

    // each consumer only sees its own key
    assert_eq!(
        texts(&reports(&mut lost)),
        vec!["Lost usize: 1", "Lost usize: 1"]
    );
    assert!(env.capabilities.is_collected());
}

#[tokio::test]
async fn test_shared_capability() {
    let env = test_environment();
    let settings = Arc::new(MemorySettings::new());

    let top = Circuit::with_environment("top", env);
    top.add_circuitry(
        "settings",
        SettingsProvider {
            shared: Some(settings.clone()),
        },
    )
    .unwrap();
    top.add_circuitry("a", SettingsUser).unwrap();
    top.add_circuitry("b", SettingsUser).unwrap();

    run_to_end(&top).await.unwrap();

    assert_eq!(settings.keys("").unwrap(), vec!["a", "b"]);
    assert_eq!(settings.scope().as_deref().map(|s| s.starts_with("top.")), Some(true));
}

#[tokio::test]
async fn test_missing_capability_fails_construction() {
    let top = Circuit::with_environment("top", test_environment());
    top.add_circuitry("a", SettingsUser).unwrap();
    top.add("c", "Counter").unwrap();

    let err = run_to_end(&top).await.unwrap_err();
    assert!(matches!(err, FlowError::Capability(_)));
    assert_eq!(top.state_of("a"), Some(GadgetState::Bound));
}

#[tokio::test]
async fn test_describe_round_trip() {
    let env = test_environment();
    let circuit = Circuit::with_environment("top", env.clone());
    circuit.add("d", "Dispatcher").unwrap();
    circuit.add("c", "Counter").unwrap();
    circuit.add_circuitry("u", Transformer::uppercase()).unwrap();
    circuit.connect("d.Out", "c.In", 2).unwrap();
    circuit.feed("d.In", "abc").unwrap();
    circuit.feed("d.In", Tag::new(DISPATCH, "Pipe")).unwrap();
    circuit.feed("d.In", Message::new(7i64)).unwrap();
    circuit.label("Count", "c.Out").unwrap();

    let description = circuit.describe();
    assert_eq!(description.unregistered, vec!["u"]);
    assert_eq!(description.feeds[1].tag.as_deref(), Some(DISPATCH));
    assert_eq!(description.feeds[1].data, json!("Pipe"));
    assert_eq!(description.labels["Count"], "c.Out");

    let text = description.to_json_pretty().unwrap();
    let parsed = CircuitDescription::from_json(&text).unwrap();
    assert_eq!(parsed, description);

    let rebuilt = Circuit::from_description("copy", &parsed, env).unwrap();
    let mut expected = description.clone();
    expected.unregistered.clear();
    assert_eq!(rebuilt.describe(), expected);
    assert_eq!(rebuilt.pins(), vec![PinSpec::output("Count")]);
}

#[tokio::test]
async fn test_circuit_pins_follow_labels() {
    let env = test_environment();
    let circuit = Circuit::with_environment("rep", env);
    circuit.add("r", "Repeater").unwrap();
    circuit.label("MyIn", "r.In").unwrap();
    circuit.label("MyOut", "r.Out").unwrap();

    assert_eq!(
        circuit.pins(),
        vec![PinSpec::input("MyIn"), PinSpec::output("MyOut")]
    );
}

type SpliceFn = Box<dyn FnOnce(&Circuit, &str) -> Result<()> + Send>;

/// Changes its own circuit while running, then sends one message on `Out`
struct Splicer {
    splice: SpliceFn,
    then_send: &'static str,
}

impl Splicer {
    fn new<F>(splice: F, then_send: &'static str) -> Self
    where
        F: FnOnce(&Circuit, &str) -> Result<()> + Send + 'static,
    {
        Self {
            splice: Box::new(splice),
            then_send,
        }
    }
}

#[async_trait]
impl Gadget for Splicer {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let this = *self;
        (this.splice)(ctx.circuit(), ctx.name())?;
        ctx.output("Out")?.send(this.then_send).await
    }
}

/// Sleeps, then forwards `In` to `Out`
struct Delayed(Duration);

#[async_trait]
impl Gadget for Delayed {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        tokio::time::sleep(self.0).await;
        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            output.send(message).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_online_connect_keeps_unread_feeds() {
    let circuit = Circuit::with_environment("top", test_environment());
    circuit
        .add_circuitry("slow", Delayed(Duration::from_millis(200)))
        .unwrap();
    circuit.feed("slow.In", "a").unwrap();
    circuit.feed("slow.In", "b").unwrap();
    circuit
        .add_circuitry(
            "sp",
            Splicer::new(
                |circuit, name| circuit.connect(&format!("{}.Out", name), "slow.In", 0),
                "c",
            ),
        )
        .unwrap();
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    let reports = reports(&mut lost);
    assert_eq!(
        texts(&reports),
        vec!["Lost String: a", "Lost String: b", "Lost String: c"]
    );
    assert!(reports.iter().all(|r| r.pin == "top.slow.Out"));
}

#[tokio::test]
async fn test_feeds_between_connect_and_launch_size_the_wire() {
    let capacity = Arc::new(Mutex::new(None));
    let seen = capacity.clone();
    let circuit = Circuit::with_environment("top", test_environment());
    circuit
        .add_circuitry(
            "e",
            Splicer::new(
                move |circuit, name| {
                    circuit.add("late", "Pipe")?;
                    circuit.connect(&format!("{}.Out", name), "late.In", 0)?;
                    circuit.feed("late.In", "x")?;
                    circuit.feed("late.In", "y")?;
                    circuit.launch("late")?;
                    *seen.lock().unwrap() = circuit.wire_capacity("late.In");
                    Ok(())
                },
                "from e",
            ),
        )
        .unwrap();
    let mut lost = circuit.tap_lost();

    run_to_end(&circuit).await.unwrap();

    // same order and size as declaring everything before the run
    assert_eq!(
        texts(&reports(&mut lost)),
        vec!["Lost String: x", "Lost String: y", "Lost String: from e"]
    );
    assert_eq!(*capacity.lock().unwrap(), Some(2));
    assert_eq!(circuit.state_of("late"), Some(GadgetState::Finished));
}

#[tokio::test]
async fn test_inner_feed_survives_unconnected_label() {
    let env = test_environment();
    let inner = Circuit::with_environment("inner", env.clone());
    inner.add("p", "Pipe").unwrap();
    inner.feed("p.In", "x").unwrap();
    inner.label("In", "p.In").unwrap();
    inner.label("Out", "p.Out").unwrap();

    let top = Circuit::with_environment("top", env);
    top.add_circuitry("c", inner).unwrap();
    let mut lost = top.tap_lost();

    run_to_end(&top).await.unwrap();

    let reports = reports(&mut lost);
    assert_eq!(texts(&reports), vec!["Lost String: x"]);
    assert_eq!(reports[0].pin, "top.c.Out");
}

#[tokio::test]
async fn test_labeled_input_driven_twice_fails() {
    let env = test_environment();
    let inner = Circuit::with_environment("inner", env.clone());
    inner.add("p", "Pipe").unwrap();
    inner.feed("p.In", "inside").unwrap();
    inner.label("In", "p.In").unwrap();

    let top = Circuit::with_environment("top", env);
    top.add_circuitry("c", inner).unwrap();
    top.feed("c.In", "outside").unwrap();

    match run_to_end(&top).await {
        Err(FlowError::GadgetFailed { gadget, reason }) => {
            assert_eq!(gadget, "top.c");
            assert!(reason.contains("p.In"));
            assert!(reason.contains("driven both"));
        }
        other => panic!("unexpected outcome: {:?}", other.err()),
    }
}

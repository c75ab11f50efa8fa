// Circuits - composable containers of gadgets, wires, feeds and labels

//! # Circuits
//!
//! A [`Circuit`] owns a set of named gadgets plus the declarations that connect
//! them. It is itself a [`Gadget`], so a circuit can be added to another circuit
//! and wired through the external names it exposes with [`Circuit::label`].
//!
//! ## Batch Mode
//!
//! Declare everything, then call [`Circuit::run`]:
//! 1. wires and feed counts are resolved into wire groups (see `resolver`)
//! 2. every gadget pin is bound: boundary port from the parent circuit first
//!    (unless it is a fallback and the pin is wired inside), then its wire
//!    group, then the fallback (null input, discard-sink output)
//! 3. capabilities are injected and every gadget is launched as its own task
//! 4. `run` returns once every launched task (and their helpers) has finished
//!
//! ## Online Mode
//!
//! While a circuit is running, [`Circuit::add`], [`Circuit::connect`],
//! [`Circuit::feed`] and [`Circuit::launch`] act immediately:
//! - a gadget added while running is bound to fallbacks right away
//! - `connect` joins the live group of either endpoint, or allocates a new group
//!   using the same capacity rule as batch mode, and re-targets both ports
//! - `launch` queues pending feed data ahead of the live channel and spawns
//!   exactly that one gadget
//!
//! Running gadgets reach their circuit through [`GadgetContext::circuit`], which
//! is how content-driven topology (a dispatcher splicing in a worker) is built.
//!
//! ## Rust Learning Notes:
//!
//! ### Cheap Handles
//! `Circuit` is a `Clone` wrapper around `Arc<CircuitShared>`. The user, the
//! parent circuit and every running gadget hold handles to the same state.
//!
//! ### Never Hold a std Mutex Across `.await`
//! All mutations happen in short synchronous sections. Anything that waits
//! (task completion, the sink drain) happens after the guard is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::capability::{ErasedCapability, Provision};
use super::discard::{DiscardSink, LostReceiver, LostTap};
use super::environment::Environment;
use super::gadget::{supervise, Gadget, GadgetContext, GadgetState};
use super::lock;
use super::ports::{InputPort, OutputPort, WireGroup};
use super::resolver::{plan_groups, WireSet};
use crate::models::pin::QUALIFIER;
use crate::{
    CircuitDescription, Direction, FeedEntry, FlowError, GadgetEntry, Message, PinName, PinSpec,
    Result, Tag,
};

/// Name used by [`Circuit::new`]
pub const DEFAULT_CIRCUIT_NAME: &str = "main";

struct GadgetSlot {
    /// Registry type name, `None` for ready-made instances
    type_name: Option<String>,
    pins: Vec<PinSpec>,
    state: GadgetState,
    /// The behavior, until it is launched
    gadget: Option<Box<dyn Gadget>>,
    inputs: HashMap<String, InputPort>,
    outputs: HashMap<String, OutputPort>,
    /// Capabilities resolved ahead of a batch launch
    capabilities: Option<HashMap<String, ErasedCapability>>,
}

impl GadgetSlot {
    fn pin(&self, name: &str) -> Option<&PinSpec> {
        self.pins.iter().find(|p| p.name == name)
    }
}

struct CircuitState {
    /// Qualified path, `name` at the top level
    path: String,
    order: Vec<String>,
    gadgets: HashMap<String, GadgetSlot>,
    wires: WireSet,
    /// Feed data not yet pushed into a channel, by resolved pin
    pending: Vec<(String, Message)>,
    feed_log: Vec<FeedEntry>,
    labels: BTreeMap<String, String>,
    /// Resolved pin -> live wire group
    groups: HashMap<String, Arc<WireGroup>>,
    boundary_inputs: HashMap<String, InputPort>,
    boundary_outputs: HashMap<String, OutputPort>,
    sink: Option<DiscardSink>,
    lost_tap: Option<LostTap>,
    tracker: TaskTracker,
    started: bool,
    running: bool,
    run_id: Option<Uuid>,
}

struct CircuitShared {
    name: String,
    environment: Environment,
    state: Mutex<CircuitState>,
    failure: Mutex<Option<FlowError>>,
}

/// Named, composable graph of gadgets
#[derive(Clone)]
pub struct Circuit {
    shared: Arc<CircuitShared>,
}

impl CircuitState {
    fn new(name: &str) -> Self {
        Self {
            path: name.to_string(),
            order: Vec::new(),
            gadgets: HashMap::new(),
            wires: WireSet::new(),
            pending: Vec::new(),
            feed_log: Vec::new(),
            labels: BTreeMap::new(),
            groups: HashMap::new(),
            boundary_inputs: HashMap::new(),
            boundary_outputs: HashMap::new(),
            sink: None,
            lost_tap: None,
            tracker: TaskTracker::new(),
            started: false,
            running: false,
            run_id: None,
        }
    }

    /// Resolve a pin name to `gadget.Pin` and its direction
    ///
    /// Unqualified names go through the label table.
    fn resolve(&self, pin: &str) -> Result<(String, Direction)> {
        let name = PinName::from(pin);
        match name.split() {
            Some((gadget, pin_name)) => {
                let slot = self.gadgets.get(gadget).ok_or_else(|| FlowError::UnknownGadget {
                    circuit: self.path.clone(),
                    name: gadget.to_string(),
                })?;
                let spec = slot.pin(pin_name).ok_or_else(|| FlowError::UnresolvedPin {
                    circuit: self.path.clone(),
                    pin: pin.to_string(),
                })?;
                Ok((pin.to_string(), spec.direction))
            }
            None => {
                let internal = self.labels.get(pin).ok_or_else(|| FlowError::UnresolvedPin {
                    circuit: self.path.clone(),
                    pin: pin.to_string(),
                })?;
                self.resolve(internal)
            }
        }
    }

    fn resolve_as(&self, pin: &str, expected: Direction) -> Result<String> {
        let (resolved, actual) = self.resolve(pin)?;
        if actual != expected {
            return Err(FlowError::PinDirection {
                pin: pin.to_string(),
                expected,
                actual,
            });
        }
        Ok(resolved)
    }

    /// External name under which an internal pin is exposed
    fn label_of(&self, internal: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, target)| target.as_str() == internal)
            .map(|(external, _)| external.as_str())
    }

    fn port_name(&self, pin: &str) -> String {
        format!("{}{}{}", self.path, QUALIFIER, pin)
    }

    /// Give every pin of one gadget a port: boundary, wire group, or fallback
    fn bind(&mut self, name: &str) -> Result<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| FlowError::NotRunning(self.path.clone()))?;
        let pins = match self.gadgets.get(name) {
            Some(slot) => slot.pins.clone(),
            None => {
                return Err(FlowError::UnknownGadget {
                    circuit: self.path.clone(),
                    name: name.to_string(),
                })
            }
        };

        let mut inputs = HashMap::new();
        let mut outputs = HashMap::new();
        for spec in pins {
            let qualified = PinName::qualified(name, &spec.name).0;
            let label = self.label_of(&qualified);
            let group = self.groups.get(&qualified).cloned();
            let port_name = self.port_name(&qualified);

            match spec.direction {
                // a labeled pin takes the parent's port unless that port is a
                // fallback and the pin is wired or fed inside
                Direction::Input => {
                    let boundary = label.and_then(|l| self.boundary_inputs.get(l)).cloned();
                    let port = match (boundary, group) {
                        (Some(port), Some(_)) if !port.is_null() => {
                            return Err(self.boundary_conflict(&qualified))
                        }
                        (Some(port), None) => port,
                        (_, Some(group)) => InputPort::wired(port_name, group),
                        (None, None) => InputPort::null(port_name),
                    };
                    inputs.insert(spec.name, port);
                }
                Direction::Output => {
                    let boundary = label.and_then(|l| self.boundary_outputs.get(l)).cloned();
                    let port = match (boundary, group) {
                        (Some(port), Some(_)) if !port.is_sink() => {
                            return Err(self.boundary_conflict(&qualified))
                        }
                        (Some(port), None) => port,
                        (_, Some(group)) => OutputPort::wired(port_name, group),
                        (None, None) => OutputPort::sink(port_name, sink.clone()),
                    };
                    outputs.insert(spec.name, port);
                }
            }
        }

        if let Some(slot) = self.gadgets.get_mut(name) {
            slot.inputs = inputs;
            slot.outputs = outputs;
            slot.state = GadgetState::Bound;
        }
        Ok(())
    }

    fn boundary_conflict(&self, pin: &str) -> FlowError {
        FlowError::BoundaryConflict {
            circuit: self.path.clone(),
            pin: pin.to_string(),
        }
    }

    fn input_port(&self, pin: &str) -> Result<InputPort> {
        let unresolved = || FlowError::UnresolvedPin {
            circuit: self.path.clone(),
            pin: pin.to_string(),
        };
        let (gadget, name) = pin.split_once(QUALIFIER).ok_or_else(unresolved)?;
        self.gadgets
            .get(gadget)
            .and_then(|slot| slot.inputs.get(name))
            .cloned()
            .ok_or_else(unresolved)
    }

    fn output_port(&self, pin: &str) -> Result<OutputPort> {
        let unresolved = || FlowError::UnresolvedPin {
            circuit: self.path.clone(),
            pin: pin.to_string(),
        };
        let (gadget, name) = pin.split_once(QUALIFIER).ok_or_else(unresolved)?;
        self.gadgets
            .get(gadget)
            .and_then(|slot| slot.outputs.get(name))
            .cloned()
            .ok_or_else(unresolved)
    }

    /// Bind one wire against the live groups
    fn connect_live(&mut self, from: &str, to: &str, capacity: usize) -> Result<()> {
        let output = self.output_port(from)?;
        let input = self.input_port(to)?;
        let rewire = || FlowError::LiveRewire {
            from: from.to_string(),
            to: to.to_string(),
        };

        let live_from = output.group();
        let (live_to, stale_to) = match input.group() {
            Some(group) if group.is_closed() => (None, Some(group)),
            current => (current, None),
        };
        let group = match (live_from, live_to) {
            (Some(a), Some(b)) if !Arc::ptr_eq(&a, &b) => return Err(rewire()),
            (Some(group), _) | (None, Some(group)) => {
                if group.capacity() < capacity {
                    tracing::warn!(
                        group = %group.name(),
                        capacity = group.capacity(),
                        requested = capacity,
                        "live wire keeps its allocated capacity"
                    );
                }
                group
            }
            (None, None) => {
                let feeds = self.pending.iter().filter(|(pin, _)| pin == to).count();
                WireGroup::new(self.port_name(to), capacity.max(feeds))
            }
        };

        // data still buffered on the input's closed wire moves with it
        if let Some(stale) = stale_to {
            let leftover = stale.take_buffered().ok_or_else(rewire)?;
            if !leftover.is_empty() {
                tracing::debug!(pin = to, count = leftover.len(), "buffered data moved to new wire");
                group.preload(leftover);
            }
        }

        input.bind(group.clone())?;
        output.bind(group.clone())?;
        tracing::debug!(from, to, capacity = group.capacity(), "live wire connected");
        self.groups.insert(from.to_string(), group.clone());
        self.groups.insert(to.to_string(), group);
        Ok(())
    }

    /// Queue the pending feed data of one gadget ahead of its live channels
    ///
    /// Called right before launch, so every feed collected since the wire was
    /// declared counts, as in batch mode. On error the feeds stay pending.
    fn push_pending(&mut self, name: &str) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let (mine, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(pin, _)| PinName::from(pin.as_str()).gadget() == Some(name));
        self.pending = rest;

        let mut batches: HashMap<String, Vec<Message>> = HashMap::new();
        for (pin, message) in mine {
            batches.entry(pin).or_default().push(message);
        }

        let ports: Result<Vec<(String, InputPort)>> = batches
            .keys()
            .map(|pin| self.input_port(pin).map(|input| (pin.clone(), input)))
            .collect();
        let ports = match ports {
            Ok(ports) => ports,
            Err(e) => {
                for (pin, messages) in batches {
                    self.pending
                        .extend(messages.into_iter().map(|m| (pin.clone(), m)));
                }
                return Err(e);
            }
        };

        for (pin, input) in ports {
            let messages = batches.remove(&pin).unwrap_or_default();
            let group = match input.group() {
                Some(group) => group,
                None => {
                    let group = WireGroup::new(self.port_name(&pin), messages.len());
                    input.bind(group.clone())?;
                    self.groups.insert(pin.clone(), group.clone());
                    group
                }
            };
            group.preload(messages);
            group.close_if_idle();
        }
        Ok(())
    }

    /// Drop every live port and channel reference held by the circuit
    fn teardown(&mut self) {
        self.running = false;
        self.sink = None;
        self.groups.clear();
        self.boundary_inputs.clear();
        self.boundary_outputs.clear();
        for slot in self.gadgets.values_mut() {
            slot.inputs.clear();
            slot.outputs.clear();
            slot.capabilities = None;
        }
    }
}

impl Circuit {
    /// Circuit named `main` in the process-wide environment
    pub fn new() -> Self {
        Self::with_environment(DEFAULT_CIRCUIT_NAME, Environment::global())
    }

    /// Named circuit in the process-wide environment
    pub fn named(name: &str) -> Self {
        Self::with_environment(name, Environment::global())
    }

    pub fn with_environment(name: &str, environment: Environment) -> Self {
        Self {
            shared: Arc::new(CircuitShared {
                name: name.to_string(),
                environment,
                state: Mutex::new(CircuitState::new(name)),
                failure: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Qualified path; differs from the name once nested and running
    pub fn path(&self) -> String {
        lock(&self.shared.state).path.clone()
    }

    pub fn environment(&self) -> &Environment {
        &self.shared.environment
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Id of the current (or last) run
    pub fn run_id(&self) -> Option<Uuid> {
        lock(&self.shared.state).run_id
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.shared.state).gadgets.contains_key(name)
    }

    /// Gadget names in the order they were added
    pub fn gadget_names(&self) -> Vec<String> {
        lock(&self.shared.state).order.clone()
    }

    pub fn state_of(&self, name: &str) -> Option<GadgetState> {
        lock(&self.shared.state).gadgets.get(name).map(|slot| slot.state)
    }

    /// Allocated capacity of the live channel behind `pin`, while running
    pub fn wire_capacity(&self, pin: &str) -> Option<usize> {
        let state = lock(&self.shared.state);
        let (resolved, _) = state.resolve(pin).ok()?;
        state.groups.get(&resolved).map(|g| g.capacity())
    }

    /// Instantiate `type_name` from the registry under `name`
    ///
    /// An unknown type is only a warning (nothing is added) unless
    /// `strict_registry` is set.
    pub fn add(&self, name: &str, type_name: &str) -> Result<()> {
        let environment = &self.shared.environment;
        match environment.registry.create(type_name) {
            Some(gadget) => self.insert(name, Some(type_name), gadget),
            None if environment.config.strict_registry => Err(FlowError::UnknownGadgetType {
                type_name: type_name.to_string(),
            }),
            None => {
                tracing::warn!(circuit = %self.name(), gadget = name, type_name, "unknown gadget type, not added");
                Ok(())
            }
        }
    }

    /// Add a ready-made gadget, typically a nested circuit
    pub fn add_circuitry<G: Gadget>(&self, name: &str, gadget: G) -> Result<()> {
        self.insert(name, None, Box::new(gadget))
    }

    fn insert(&self, name: &str, type_name: Option<&str>, gadget: Box<dyn Gadget>) -> Result<()> {
        // a nested circuit's pins lock its own state, so read them first
        let pins = gadget.pins();

        let mut state = lock(&self.shared.state);
        if state.gadgets.contains_key(name) {
            return Err(FlowError::DuplicateGadget {
                circuit: state.path.clone(),
                name: name.to_string(),
            });
        }

        state.order.push(name.to_string());
        state.gadgets.insert(
            name.to_string(),
            GadgetSlot {
                type_name: type_name.map(str::to_string),
                pins,
                state: GadgetState::Declared,
                gadget: Some(gadget),
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                capabilities: None,
            },
        );
        tracing::debug!(circuit = %state.path, gadget = name, "gadget added");

        if state.running {
            state.bind(name)?;
        }
        Ok(())
    }

    /// Declare a wire from an output to an input
    ///
    /// While running, the wire is bound immediately against the live groups.
    pub fn connect(&self, from: &str, to: &str, capacity: usize) -> Result<()> {
        let mut state = lock(&self.shared.state);
        let from = state.resolve_as(from, Direction::Output)?;
        let to = state.resolve_as(to, Direction::Input)?;

        state.wires.declare(&from, &to, capacity);
        if state.running {
            state.connect_live(&from, &to, capacity)?;
        }
        Ok(())
    }

    /// Pre-load one message into an input pin
    pub fn feed<M: Into<Message>>(&self, pin: &str, message: M) -> Result<()> {
        let message = message.into();
        let mut state = lock(&self.shared.state);
        let to = state.resolve_as(pin, Direction::Input)?;

        let entry = match message.downcast_ref::<Tag>() {
            Some(tag) => FeedEntry {
                to: to.clone(),
                data: tag.val.to_json(),
                tag: Some(tag.tag.clone()),
            },
            None => FeedEntry {
                to: to.clone(),
                data: message.to_json(),
                tag: None,
            },
        };
        state.feed_log.push(entry);

        let launched = PinName::from(to.as_str())
            .gadget()
            .and_then(|g| state.gadgets.get(g))
            .map_or(false, |slot| {
                matches!(slot.state, GadgetState::Running | GadgetState::Finished)
            });
        if state.running && launched {
            let group = state
                .input_port(&to)?
                .group()
                .filter(|g| !g.is_closed())
                .ok_or_else(|| FlowError::Disconnected(to.clone()))?;
            return group.try_feed(message);
        }

        state.pending.push((to, message));
        Ok(())
    }

    /// Expose an internal pin as `external` on this circuit's boundary
    ///
    /// Labels must be declared before the circuit is added to a parent.
    pub fn label(&self, external: &str, internal: &str) -> Result<()> {
        if external.contains(QUALIFIER) {
            return Err(FlowError::QualifiedLabel(external.to_string()));
        }
        let mut state = lock(&self.shared.state);
        let (resolved, _) = state.resolve(internal)?;
        state.labels.insert(external.to_string(), resolved);
        Ok(())
    }

    /// Install a receiver for every message this circuit discards
    ///
    /// Nested circuits without a tap of their own report to the same one.
    pub fn tap_lost(&self) -> LostReceiver {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        lock(&self.shared.state).lost_tap = Some(tx);
        rx
    }

    /// Serialisable snapshot of the declarations
    pub fn describe(&self) -> CircuitDescription {
        let state = lock(&self.shared.state);
        let mut description = CircuitDescription::default();

        for name in &state.order {
            let Some(slot) = state.gadgets.get(name) else {
                continue;
            };
            match &slot.type_name {
                Some(type_name) => description.gadgets.push(GadgetEntry {
                    name: name.clone(),
                    type_name: type_name.clone(),
                }),
                None => description.unregistered.push(name.clone()),
            }
        }
        description.wires = state.wires.to_vec();
        description.feeds = state.feed_log.clone();
        description.labels = state.labels.clone();
        description
    }

    /// Rebuild a circuit from a description
    ///
    /// Unregistered entries cannot be recreated and are skipped with a warning.
    pub fn from_description(
        name: &str,
        description: &CircuitDescription,
        environment: Environment,
    ) -> Result<Circuit> {
        let circuit = Circuit::with_environment(name, environment);

        for entry in &description.gadgets {
            circuit.add(&entry.name, &entry.type_name)?;
        }
        for name in &description.unregistered {
            tracing::warn!(gadget = %name, "unregistered gadget cannot be rebuilt");
        }
        for (external, internal) in &description.labels {
            circuit.label(external, internal)?;
        }
        for wire in &description.wires {
            circuit.connect(&wire.from, &wire.to, wire.capacity)?;
        }
        for feed in &description.feeds {
            let data = Message::from_json(feed.data.clone());
            match &feed.tag {
                Some(tag) => circuit.feed(&feed.to, Tag::new(tag.clone(), data))?,
                None => circuit.feed(&feed.to, data)?,
            }
        }
        Ok(circuit)
    }

    /// Run the whole circuit and wait for every gadget to finish
    pub async fn run(&self) -> Result<()> {
        self.execute(None).await
    }

    /// Start one gadget of a running circuit
    pub fn launch(&self, name: &str) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if !state.running {
                return Err(FlowError::NotRunning(state.path.clone()));
            }
            let slot = state.gadgets.get(name).ok_or_else(|| FlowError::UnknownGadget {
                circuit: state.path.clone(),
                name: name.to_string(),
            })?;
            if matches!(slot.state, GadgetState::Running | GadgetState::Finished) {
                return Err(FlowError::AlreadyLaunched(format!("{}.{}", state.path, name)));
            }
            state.push_pending(name)?;
        }
        self.spawn_gadget(name)
    }

    /// Capabilities offered by every gadget in this tree, with provider paths
    fn gather_provisions(&self) -> Vec<(String, Provision)> {
        let mut state = lock(&self.shared.state);
        let path = state.path.clone();
        let order = state.order.clone();

        let mut provisions = Vec::new();
        for name in order {
            if let Some(gadget) = state.gadgets.get_mut(&name).and_then(|s| s.gadget.as_mut()) {
                let provider = format!("{}{}{}", path, QUALIFIER, name);
                provisions.extend(gadget.provides().into_iter().map(|p| (provider.clone(), p)));
            }
        }
        provisions
    }

    fn record_failure(&self, failure: FlowError) {
        let mut slot = lock(&self.shared.failure);
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    fn finish(&self, name: &str, failure: Option<FlowError>) {
        if let Some(slot) = lock(&self.shared.state).gadgets.get_mut(name) {
            slot.state = GadgetState::Finished;
        }
        if let Some(failure) = failure {
            self.record_failure(failure);
        }
    }

    /// Hand a bound gadget its context and spawn its task
    fn spawn_gadget(&self, name: &str) -> Result<()> {
        let environment = &self.shared.environment;
        let (gadget, ctx, tracker) = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let path = format!("{}{}{}", state.path, QUALIFIER, name);
            let slot = state.gadgets.get_mut(name).ok_or_else(|| FlowError::UnknownGadget {
                circuit: state.path.clone(),
                name: name.to_string(),
            })?;
            if slot.state != GadgetState::Bound {
                return Err(FlowError::AlreadyLaunched(path));
            }
            let gadget = slot
                .gadget
                .take()
                .ok_or_else(|| FlowError::AlreadyLaunched(path.clone()))?;

            let capabilities = match slot.capabilities.take() {
                Some(capabilities) => capabilities,
                None => match environment.capabilities.inject(
                    name,
                    &path,
                    &gadget.consumes(),
                    &environment.config.injection,
                ) {
                    Ok(capabilities) => capabilities,
                    Err(e) => {
                        slot.gadget = Some(gadget);
                        return Err(e);
                    }
                },
            };

            slot.state = GadgetState::Running;
            let ctx = GadgetContext {
                name: name.to_string(),
                path,
                inputs: slot.inputs.clone(),
                outputs: slot.outputs.clone(),
                capabilities,
                circuit: self.clone(),
                helpers: TaskTracker::new(),
                lost_tap: state.lost_tap.clone(),
            };
            (gadget, ctx, state.tracker.clone())
        };

        tracing::info!(gadget = %ctx.path, "launching gadget");
        let circuit = self.clone();
        let name = name.to_string();
        let policy = environment.config.panic_policy;
        tracker.spawn(async move {
            let failure = supervise(gadget, ctx, policy).await;
            circuit.finish(&name, failure);
        });
        Ok(())
    }

    /// Resolve, bind and inject everything; returns the launch order
    fn prepare(&self) -> Result<Vec<String>> {
        let environment = &self.shared.environment;
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;

        let feeds = std::mem::take(&mut state.pending);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (pin, _) in &feeds {
            *counts.entry(pin.clone()).or_insert(0) += 1;
        }

        let plan = plan_groups(
            state
                .wires
                .iter()
                .map(|w| (w.from.as_str(), w.to.as_str(), w.capacity)),
            &counts,
        );
        for planned in plan {
            let group = WireGroup::new(state.port_name(planned.name()), planned.capacity);
            tracing::debug!(
                group = %group.name(),
                members = planned.members.len(),
                capacity = group.capacity(),
                "wire group allocated"
            );
            for member in planned.members {
                state.groups.insert(member, group.clone());
            }
        }
        for (pin, message) in feeds {
            if let Some(group) = state.groups.get(&pin) {
                group.try_feed(message)?;
            }
        }

        let order = state.order.clone();
        for name in &order {
            state.bind(name)?;
        }
        for group in state.groups.values() {
            group.close_if_idle();
        }

        for name in &order {
            let path = format!("{}{}{}", state.path, QUALIFIER, name);
            if let Some(slot) = state.gadgets.get_mut(name) {
                if let Some(gadget) = &slot.gadget {
                    let injected = environment.capabilities.inject(
                        name,
                        &path,
                        &gadget.consumes(),
                        &environment.config.injection,
                    )?;
                    slot.capabilities = Some(injected);
                }
            }
        }
        Ok(order)
    }

    async fn execute(&self, parent: Option<GadgetContext>) -> Result<()> {
        let environment = self.shared.environment.clone();
        let run_id = Uuid::new_v4();

        let tap = {
            let mut state = lock(&self.shared.state);
            if state.started {
                return Err(FlowError::AlreadyStarted(state.path.clone()));
            }
            state.started = true;
            state.run_id = Some(run_id);
            if let Some(ctx) = parent {
                state.path = ctx.path;
                state.boundary_inputs = ctx.inputs;
                state.boundary_outputs = ctx.outputs;
                if state.lost_tap.is_none() {
                    state.lost_tap = ctx.lost_tap;
                }
            }
            state.lost_tap.clone()
        };
        let path = self.path();
        tracing::info!(circuit = %path, %run_id, "circuit starting");

        environment
            .capabilities
            .collect_once(|| self.gather_provisions(), &environment.config.injection)?;

        let (sink, drain) = DiscardSink::spawn(&path, environment.config.print_lost, tap);
        {
            let mut state = lock(&self.shared.state);
            state.sink = Some(sink);
            state.running = true;
        }

        let prepared = self.prepare();
        let mut outcome = Ok(());
        match prepared {
            Ok(order) => {
                for name in order {
                    if let Err(e) = self.spawn_gadget(&name) {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            Err(e) => outcome = Err(e),
        }
        if outcome.is_err() {
            // unblock anything already launched that waits on a gadget that never will be
            let state = lock(&self.shared.state);
            for slot in state.gadgets.values() {
                if slot.state != GadgetState::Running {
                    slot.outputs.values().for_each(OutputPort::close);
                }
            }
        }

        let tracker = lock(&self.shared.state).tracker.clone();
        tracker.close();
        tracker.wait().await;

        lock(&self.shared.state).teardown();
        if let Err(e) = drain.await {
            tracing::error!(circuit = %path, "discard sink drain failed: {}", e);
        }
        tracing::info!(circuit = %path, %run_id, "circuit finished");

        outcome?;
        match lock(&self.shared.failure).take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("Circuit")
            .field("path", &state.path)
            .field("gadgets", &state.order)
            .field("wires", &state.wires.len())
            .field("labels", &state.labels)
            .field("running", &state.running)
            .finish()
    }
}

#[async_trait]
impl Gadget for Circuit {
    /// One pin per label, with the direction of the pin it exposes
    fn pins(&self) -> Vec<PinSpec> {
        let state = lock(&self.shared.state);
        state
            .labels
            .iter()
            .filter_map(|(external, internal)| {
                state.resolve(internal).ok().map(|(_, direction)| PinSpec {
                    name: external.clone(),
                    direction,
                })
            })
            .collect()
    }

    fn provides(&mut self) -> Vec<Provision> {
        self.gather_provisions().into_iter().map(|(_, p)| p).collect()
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        self.execute(Some(ctx)).await
    }
}

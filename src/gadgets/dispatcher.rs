// Dispatcher - splices sub-workers into its own circuit while running

use async_trait::async_trait;

use crate::engine::{Gadget, GadgetContext};
use crate::{Message, PinSpec, Result, Tag};

/// Tag that asks a dispatcher to attach a sub-worker; the value names its type
pub const DISPATCH: &str = "<dispatch>";
/// Tag a dispatcher echoes on `Out` after handling a dispatch request
pub const DISPATCHED: &str = "<dispatched>";

/// Content-driven router
///
/// Pins: `In`, `Out`, and `Feed`, the output that drives the attached sub-worker.
///
/// - `Tag { "<dispatch>", "Counter" }` adds a fresh `Counter` to the enclosing
///   circuit, wires `Feed` to its `In`, launches it, and echoes
///   `Tag { "<dispatched>", "Counter" }` on `Out`
/// - `Tag { "<dispatch>", "" }` detaches the current sub-worker by closing `Feed`,
///   which lets it see end-of-stream and finish
/// - anything else goes to the attached sub-worker, or to `Out` when none is
#[derive(Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// Name for the next sub-worker of `type_name`, unique in the circuit
    fn worker_name(ctx: &GadgetContext, type_name: &str) -> String {
        let base = format!("{}-{}", ctx.name(), type_name);
        let mut name = base.clone();
        let mut n = 1;
        while ctx.circuit().contains(&name) {
            n += 1;
            name = format!("{}-{}", base, n);
        }
        name
    }

    /// Add, wire and launch a sub-worker; `None` when the type is unknown
    fn attach(ctx: &GadgetContext, type_name: &str) -> Result<Option<String>> {
        let circuit = ctx.circuit();
        let worker = Self::worker_name(ctx, type_name);

        circuit.add(&worker, type_name)?;
        if !circuit.contains(&worker) {
            return Ok(None);
        }
        circuit.connect(&format!("{}.Feed", ctx.name()), &format!("{}.In", worker), 0)?;
        circuit.launch(&worker)?;
        tracing::info!(gadget = %ctx.path(), worker = %worker, "sub-worker attached");
        Ok(Some(worker))
    }
}

#[async_trait]
impl Gadget for Dispatcher {
    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("In"),
            PinSpec::output("Out"),
            PinSpec::output("Feed"),
        ]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        let feed = ctx.output("Feed")?;
        let mut attached: Option<String> = None;

        while let Some(message) = input.recv().await {
            let message = match message.downcast::<Tag>() {
                Ok(tag) if tag.tag == DISPATCH => {
                    let type_name = tag.val.to_text();
                    if let Some(worker) = attached.take() {
                        feed.close();
                        tracing::info!(gadget = %ctx.path(), worker = %worker, "sub-worker detached");
                    }
                    if !type_name.is_empty() {
                        attached = Self::attach(&ctx, &type_name)?;
                    }
                    output.send(Tag::new(DISPATCHED, type_name)).await?;
                    continue;
                }
                Ok(tag) => Message::from(tag),
                Err(message) => message,
            };

            if attached.is_some() {
                feed.send(message).await?;
            } else {
                output.send(message).await?;
            }
        }
        Ok(())
    }
}

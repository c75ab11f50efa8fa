// Basic gadgets - pass-through, transformation, repetition, counting, printing

use async_trait::async_trait;
use chrono::Utc;

use crate::engine::{Gadget, GadgetContext};
use crate::{Message, PinSpec, Result};

type TransformFn = Box<dyn Fn(Message) -> Message + Send + Sync>;

/// Applies a function to every message from `In` and sends the result to `Out`
pub struct Transformer {
    transform: TransformFn,
}

impl Transformer {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        Self {
            transform: Box::new(transform),
        }
    }

    /// Upper-cases string payloads, passes everything else through
    pub fn uppercase() -> Self {
        Self::new(|m| match m.downcast::<String>() {
            Ok(s) => Message::new(s.to_uppercase()),
            Err(other) => other,
        })
    }
}

#[async_trait]
impl Gadget for Transformer {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            output.send((self.transform)(message)).await?;
        }
        Ok(())
    }
}

/// `In` -> `Out` unchanged
#[derive(Debug, Default)]
pub struct Pipe;

#[async_trait]
impl Gadget for Pipe {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            output.send(message).await?;
        }
        Ok(())
    }
}

/// Repeats every `In` message `Num` times on `Out`
///
/// The count is the first message on `Num`; without one every message is
/// passed through once.
#[derive(Debug, Default)]
pub struct Repeater;

#[async_trait]
impl Gadget for Repeater {
    fn pins(&self) -> Vec<PinSpec> {
        vec![
            PinSpec::input("In"),
            PinSpec::input("Num"),
            PinSpec::output("Out"),
        ]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let count = match ctx.input("Num")?.recv().await {
            Some(num) => num.as_count().unwrap_or_else(|| {
                tracing::warn!(gadget = %ctx.path(), "Num is not a count: {}", num);
                1
            }),
            None => 1,
        };

        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            if count == 0 {
                continue;
            }
            for _ in 1..count {
                match message.try_clone() {
                    Some(copy) => output.send(copy).await?,
                    None => {
                        tracing::warn!(gadget = %ctx.path(), "cannot repeat {}", message.type_name());
                        break;
                    }
                }
            }
            output.send(message).await?;
        }
        Ok(())
    }
}

/// Counts `In` messages and sends the total (`usize`) on `Out` at end-of-stream
#[derive(Debug, Default)]
pub struct Counter;

#[async_trait]
impl Gadget for Counter {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        let mut count: usize = 0;
        while input.recv().await.is_some() {
            count += 1;
        }
        ctx.output("Out")?.send(Message::new(count)).await
    }
}

/// Prints every `In` message to stdout
#[derive(Debug, Default)]
pub struct Printer;

#[async_trait]
impl Gadget for Printer {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        while let Some(message) = input.recv().await {
            tracing::info!(gadget = %ctx.path(), type_name = %message.type_name(), "{}", message);
            println!("{}", message);
        }
        Ok(())
    }
}

/// Sends the current UTC time on `Out` ahead of every `In` message
#[derive(Debug, Default)]
pub struct TimeStamp;

#[async_trait]
impl Gadget for TimeStamp {
    fn pins(&self) -> Vec<PinSpec> {
        vec![PinSpec::input("In"), PinSpec::output("Out")]
    }

    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()> {
        let input = ctx.input("In")?;
        let output = ctx.output("Out")?;
        while let Some(message) = input.recv().await {
            output.send(Message::new(Utc::now())).await?;
            output.send(message).await?;
        }
        Ok(())
    }
}

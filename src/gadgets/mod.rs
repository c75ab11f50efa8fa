// Standard gadget library

//! # Standard Gadgets
//!
//! Ready-made gadgets used by the `flow` binary, the documentation and the
//! scenario tests:
//!
//! | Type         | Pins                 | Behavior                                        |
//! |--------------|----------------------|-------------------------------------------------|
//! | `Pipe`       | In -> Out            | pass-through                                    |
//! | `Uppercase`  | In -> Out            | upper-cases strings ([`Transformer::uppercase`]) |
//! | `Repeater`   | In, Num -> Out       | repeats each message `Num` times                |
//! | `Counter`    | In -> Out            | emits the message count at end-of-stream        |
//! | `Printer`    | In                   | prints every message                            |
//! | `TimeStamp`  | In -> Out            | emits a UTC timestamp ahead of each message     |
//! | `Dispatcher` | In -> Out, Feed      | attaches sub-workers on `<dispatch>` tags       |
//!
//! [`register_standard`] installs them into any [`Registry`];
//! [`register_global`] does it once for the process-wide registry.

use std::sync::{Arc, Once};

use crate::engine::{Gadget, GadgetFactory, Registry};
use crate::Result;

pub mod basic;
pub mod dispatcher;

pub use basic::{Counter, Pipe, Printer, Repeater, TimeStamp, Transformer};
pub use dispatcher::{Dispatcher, DISPATCH, DISPATCHED};

static GLOBAL_REGISTRATION: Once = Once::new();

fn factory<G: Gadget>(build: fn() -> G) -> GadgetFactory {
    Arc::new(move || Box::new(build()) as Box<dyn Gadget>)
}

/// Every standard type name with its factory
pub fn standard_types() -> Vec<(&'static str, GadgetFactory)> {
    vec![
        ("Pipe", factory(Pipe::default)),
        ("Uppercase", factory(Transformer::uppercase)),
        ("Repeater", factory(Repeater::default)),
        ("Counter", factory(Counter::default)),
        ("Printer", factory(Printer::default)),
        ("TimeStamp", factory(TimeStamp::default)),
        ("Dispatcher", factory(Dispatcher::default)),
    ]
}

/// Register every standard gadget type
pub fn register_standard(registry: &Registry) -> Result<()> {
    for (type_name, factory) in standard_types() {
        registry.register_factory(type_name, factory)?;
    }
    Ok(())
}

/// Register the standard gadgets into [`Registry::global`], once per process
///
/// Types someone already registered under the same name are left alone.
pub fn register_global() {
    GLOBAL_REGISTRATION.call_once(|| {
        let registry = Registry::global();
        for (type_name, factory) in standard_types() {
            if let Err(e) = registry.register_factory(type_name, factory) {
                tracing::debug!("{}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Circuit, Environment, FlowConfig, LostReceiver};
    use tokio_test::assert_ok;

    fn circuit() -> Circuit {
        let env = Environment::isolated(FlowConfig::quiet());
        register_standard(&env.registry).unwrap();
        Circuit::with_environment("top", env)
    }

    fn drain(lost: &mut LostReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = lost.try_recv() {
            out.push(message.to_string());
        }
        out
    }

    #[test]
    fn test_repeater_without_count_passes_through() {
        let circuit = circuit();
        circuit.add("r", "Repeater").unwrap();
        circuit.feed("r.In", "x").unwrap();
        let mut lost = circuit.tap_lost();

        assert_ok!(tokio_test::block_on(circuit.run()));
        assert_eq!(drain(&mut lost), vec!["Lost String: x"]);
    }

    #[test]
    fn test_timestamp_precedes_each_message() {
        let circuit = circuit();
        circuit.add("ts", "TimeStamp").unwrap();
        circuit.feed("ts.In", "a").unwrap();
        circuit.feed("ts.In", "b").unwrap();
        let mut lost = circuit.tap_lost();

        assert_ok!(tokio_test::block_on(circuit.run()));
        let reports = drain(&mut lost);
        assert_eq!(reports.len(), 4);
        assert!(reports[0].starts_with("Lost DateTime<Utc>: "));
        assert_eq!(reports[1], "Lost String: a");
        assert!(reports[2].starts_with("Lost DateTime<Utc>: "));
        assert_eq!(reports[3], "Lost String: b");
    }

    #[test]
    fn test_dispatcher_without_worker_forwards() {
        let circuit = circuit();
        circuit.add("d", "Dispatcher").unwrap();
        circuit.feed("d.In", "plain").unwrap();
        circuit
            .feed("d.In", crate::Tag::new(DISPATCH, "NoSuchType"))
            .unwrap();
        circuit.feed("d.In", "still plain").unwrap();
        let mut lost = circuit.tap_lost();

        assert_ok!(tokio_test::block_on(circuit.run()));
        // an unknown type attaches nothing, so data keeps flowing to Out
        assert_eq!(
            drain(&mut lost),
            vec![
                "Lost String: plain",
                "Lost Tag: {<dispatched> NoSuchType}",
                "Lost String: still plain",
            ]
        );
        assert!(!circuit.contains("d-NoSuchType"));
    }

    #[test]
    fn test_register_standard() {
        let registry = Registry::new();
        register_standard(&registry).unwrap();
        assert_eq!(
            registry.type_names(),
            vec![
                "Counter",
                "Dispatcher",
                "Pipe",
                "Printer",
                "Repeater",
                "TimeStamp",
                "Uppercase"
            ]
        );
        // a second pass hits the write-once rule
        assert!(register_standard(&registry).is_err());
    }

    #[test]
    fn test_register_global_is_idempotent() {
        register_global();
        register_global();
        assert!(Registry::global().contains("Dispatcher"));
    }
}

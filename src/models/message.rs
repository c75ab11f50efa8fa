// Message domain models - the values that travel over wires

//! # Message Models
//!
//! Everything that moves between gadgets is a [`Message`]: an opaque, boxed value
//! of any `Send + Sync + Debug` type. The engine never looks inside a message; it
//! only remembers enough about the payload to report it when it ends up in the
//! discard sink (`Lost String: abc`) and to project it into a circuit description.
//!
//! A [`Tag`] pairs a string with a payload and is used for out-of-band signalling,
//! e.g. telling a dispatcher which sub-worker to attach.
//!
//! ## Rust Learning Notes:
//!
//! ### Type Erasure with `Any`
//! `Box<dyn Any>` can hold a value of any `'static` type. To get the value back you
//! *downcast* it to the concrete type you expect; this fails (safely) when the
//! guess is wrong.
//!
//! ### Monomorphised Function Pointers
//! `Message::new::<T>` stores `render_debug::<T>` as a plain `fn` pointer. The
//! compiler generates one copy of that function per payload type, which lets us
//! keep `Debug` formatting around after the concrete type has been erased.

use std::any::{type_name, Any};
use std::fmt;

/// Opaque value carried on a port
pub struct Message {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    render: fn(&(dyn Any + Send + Sync)) -> String,
}

fn render_debug<T: Any + fmt::Debug>(value: &(dyn Any + Send + Sync)) -> String {
    value
        .downcast_ref::<T>()
        .map(|v| format!("{:?}", v))
        .unwrap_or_default()
}

impl Message {
    /// Wrap any value into a message
    ///
    /// ```rust
    /// # use circuit_flow::Message;
    /// let m = Message::new(42i64);
    /// assert_eq!(m.downcast_ref::<i64>(), Some(&42));
    /// ```
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
            render: render_debug::<T>,
        }
    }

    /// Fully qualified type name of the payload
    pub fn full_type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name with module paths stripped, e.g. `String` or `Vec<i32>`
    pub fn type_name(&self) -> String {
        short_type_name(self.type_name)
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the payload out, or get the message back unchanged if the type is wrong
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Message> {
        let Message {
            value,
            type_name,
            render,
        } = self;
        value.downcast::<T>().map(|b| *b).map_err(|value| Message {
            value,
            type_name,
            render,
        })
    }

    /// Text form used in lost-message reports: strings verbatim, tags as
    /// `{tag value}`, everything else through `Debug`
    pub fn to_text(&self) -> String {
        if let Some(s) = self.downcast_ref::<String>() {
            return s.clone();
        }
        if let Some(s) = self.downcast_ref::<&'static str>() {
            return (*s).to_string();
        }
        if let Some(tag) = self.downcast_ref::<Tag>() {
            return tag.to_string();
        }
        (self.render)(self.value.as_ref())
    }

    /// Best-effort JSON projection of the payload
    ///
    /// Common scalar types and `serde_json::Value` map to their JSON form; any
    /// other payload becomes its `Debug` text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        if let Some(v) = self.downcast_ref::<Value>() {
            return v.clone();
        }
        if let Some(s) = self.downcast_ref::<String>() {
            return Value::from(s.clone());
        }
        if let Some(s) = self.downcast_ref::<&'static str>() {
            return Value::from(*s);
        }
        if let Some(b) = self.downcast_ref::<bool>() {
            return Value::from(*b);
        }
        if let Some(n) = self.downcast_ref::<i64>() {
            return Value::from(*n);
        }
        if let Some(n) = self.downcast_ref::<i32>() {
            return Value::from(*n);
        }
        if let Some(n) = self.downcast_ref::<u64>() {
            return Value::from(*n);
        }
        if let Some(n) = self.downcast_ref::<u32>() {
            return Value::from(*n);
        }
        if let Some(n) = self.downcast_ref::<usize>() {
            return Value::from(*n as u64);
        }
        if let Some(n) = self.downcast_ref::<f64>() {
            return Value::from(*n);
        }
        if let Some(tag) = self.downcast_ref::<Tag>() {
            return serde_json::json!({ "tag": tag.tag, "data": tag.val.to_json() });
        }
        Value::from(self.to_text())
    }

    /// Inverse of [`Message::to_json`] for plain JSON data
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::String(s) => Message::new(s),
            Value::Bool(b) => Message::new(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Message::new(i)
                } else if let Some(f) = n.as_f64() {
                    Message::new(f)
                } else {
                    Message::new(Value::Number(n))
                }
            }
            other => Message::new(other),
        }
    }

    /// Copy of the message for plain data payloads (strings, scalars, JSON, tags
    /// of those); `None` for anything else
    pub fn try_clone(&self) -> Option<Message> {
        fn copy<T: Any + Clone + Send + Sync + fmt::Debug>(m: &Message) -> Option<Message> {
            m.downcast_ref::<T>().map(|v| Message::new(v.clone()))
        }

        if let Some(tag) = self.downcast_ref::<Tag>() {
            return tag
                .val
                .try_clone()
                .map(|val| Message::new(Tag::new(tag.tag.clone(), val)));
        }
        copy::<String>(self)
            .or_else(|| copy::<&'static str>(self))
            .or_else(|| copy::<bool>(self))
            .or_else(|| copy::<i64>(self))
            .or_else(|| copy::<i32>(self))
            .or_else(|| copy::<u64>(self))
            .or_else(|| copy::<u32>(self))
            .or_else(|| copy::<usize>(self))
            .or_else(|| copy::<f64>(self))
            .or_else(|| copy::<serde_json::Value>(self))
    }

    /// Small integer extraction shared by gadgets that take a count parameter
    pub fn as_count(&self) -> Option<usize> {
        if let Some(n) = self.downcast_ref::<usize>() {
            return Some(*n);
        }
        if let Some(n) = self.downcast_ref::<i64>() {
            return usize::try_from(*n).ok();
        }
        if let Some(n) = self.downcast_ref::<i32>() {
            return usize::try_from(*n).ok();
        }
        if let Some(n) = self.downcast_ref::<u64>() {
            return usize::try_from(*n).ok();
        }
        if let Some(n) = self.downcast_ref::<u32>() {
            return usize::try_from(*n).ok();
        }
        if let Some(v) = self.downcast_ref::<serde_json::Value>() {
            return v.as_u64().and_then(|n| usize::try_from(n).ok());
        }
        None
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), (self.render)(self.value.as_ref()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new(s.to_string())
    }
}

impl From<Tag> for Message {
    fn from(tag: Tag) -> Self {
        Message::new(tag)
    }
}

/// A string tag attached to a payload, for out-of-band signalling
#[derive(Debug)]
pub struct Tag {
    pub tag: String,
    pub val: Message,
}

impl Tag {
    pub fn new<S: Into<String>, M: Into<Message>>(tag: S, val: M) -> Self {
        Self {
            tag: tag.into(),
            val: val.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} {}}}", self.tag, self.val.to_text())
    }
}

/// Strip module paths from every identifier in a type name
///
/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;
    let mut chars = full.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(segment_start);
        } else {
            out.push(c);
            if matches!(c, '<' | '>' | ',' | ' ' | '&' | '(' | ')' | '[' | ']' | ';' | '*') {
                segment_start = out.len();
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_type_names() {
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(short_type_name("i64"), "i64");
        assert_eq!(short_type_name("&str"), "&str");
        assert_eq!(
            short_type_name("alloc::vec::Vec<alloc::string::String>"),
            "Vec<String>"
        );
        assert_eq!(
            short_type_name("std::collections::hash::map::HashMap<alloc::string::String, i32>"),
            "HashMap<String, i32>"
        );
    }

    #[test]
    fn test_downcast_keeps_message_on_mismatch() {
        let m = Message::new("abc".to_string());
        assert!(m.is::<String>());
        let m = m.downcast::<i64>().unwrap_err();
        assert_eq!(m.type_name(), "String");
        assert_eq!(m.downcast::<String>().unwrap(), "abc");
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(Message::from("abc").to_text(), "abc");
        assert_eq!(Message::new(2usize).to_text(), "2");
        let tag = Message::from(Tag::new("<dispatched>", "Counter"));
        assert_eq!(tag.to_text(), "{<dispatched> Counter}");
        assert_eq!(tag.type_name(), "Tag");
        assert_eq!(Message::from(Tag::new("<dispatched>", "")).to_text(), "{<dispatched> }");
    }

    #[test]
    fn test_try_clone_plain_data() {
        let m = Message::from("abc");
        let copy = m.try_clone().unwrap();
        assert_eq!(copy.type_name(), "String");
        assert_eq!(copy.to_text(), "abc");

        let tag = Message::from(Tag::new("k", Message::new(3i64)));
        assert_eq!(tag.try_clone().unwrap().to_text(), "{k 3}");

        #[derive(Debug)]
        struct Opaque;
        assert!(Message::new(Opaque).try_clone().is_none());
    }

    #[test]
    fn test_json_projection() {
        assert_eq!(Message::from("x").to_json(), serde_json::json!("x"));
        assert_eq!(Message::new(3i64).to_json(), serde_json::json!(3));
        assert_eq!(Message::new(true).to_json(), serde_json::json!(true));

        let m = Message::from_json(serde_json::json!(7));
        assert_eq!(m.downcast_ref::<i64>(), Some(&7));
        assert_eq!(m.as_count(), Some(7));

        let m = Message::from_json(serde_json::json!({"a": 1}));
        assert!(m.is::<serde_json::Value>());
        assert_eq!(m.as_count(), None);
    }
}

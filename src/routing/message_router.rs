//! Per-consumer dispatch by declared message type.
//!
//! ```
//! use broadcast_tunnel::domain::{BroadcastMessage, Message};
//! use broadcast_tunnel::routing::MessageRouterBuilder;
//!
//! #[derive(serde::Deserialize)]
//! struct ChatMessage {
//!     text: String,
//! }
//!
//! impl BroadcastMessage for ChatMessage {
//!     const MESSAGE_TYPE: &'static str = "chat_message";
//! }
//!
//! let builder = MessageRouterBuilder::new();
//! builder
//!     .forward(|chat: ChatMessage| println!("{}", chat.text))
//!     .else_do_nothing();
//!
//! let mut handler = builder.handler();
//! let message = Message::new("chat_message", "room1", serde_json::json!({ "text": "hi" }));
//! assert!(handler(&message).is_ok());
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::MessageHandler;
use crate::domain::{BroadcastMessage, Message};
use crate::error::BroadcastError;

/// Action run for one message.
pub type RouteAction = Box<dyn FnMut(&Message) -> Result<(), BroadcastError>>;

/// Maps declared message types to actions, with a fallback for the rest.
pub struct MessageRouter {
    rules: HashMap<String, RouteAction>,
    default: Option<RouteAction>,
}

impl MessageRouter {
    /// Creates a router with no rules whose fallback logs a warning.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
            default: Some(Box::new(log_unhandled)),
        }
    }

    /// Sets the action for `message_type`, replacing any previous one.
    pub fn set_rule(&mut self, message_type: impl Into<String>, action: RouteAction) {
        let message_type = message_type.into();
        if self.rules.insert(message_type.clone(), action).is_some() {
            tracing::debug!(%message_type, "replacing message rule");
        }
    }

    /// Sets the fallback action; `None` ignores unmatched messages.
    pub fn set_default(&mut self, action: Option<RouteAction>) {
        self.default = action;
    }

    /// Whether a rule exists for `message_type`.
    #[must_use]
    pub fn has_rule(&self, message_type: &str) -> bool {
        self.rules.contains_key(message_type)
    }

    /// Runs the action matching the message's declared type, or the
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns whatever the action returns, typically
    /// [`BroadcastError::InvalidPayload`] when the payload does not decode.
    pub fn route_message(&mut self, message: &Message) -> Result<(), BroadcastError> {
        match self.rules.get_mut(&message.declared_type) {
            Some(action) => action(message),
            None => match self.default.as_mut() {
                Some(action) => action(message),
                None => Ok(()),
            },
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("MessageRouter")
            .field("rules", &types)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_unhandled(message: &Message) -> Result<(), BroadcastError> {
    tracing::warn!(
        channel = %message.channel_name,
        message_type = %message.declared_type,
        "no rule for message type, message ignored"
    );
    Ok(())
}

/// Declares the rules of a [`MessageRouter`].
///
/// Clones share the same router, so rules added after
/// [`MessageRouterBuilder::handler`] was taken still apply.
#[derive(Clone, Default)]
pub struct MessageRouterBuilder {
    router: Rc<RefCell<MessageRouter>>,
}

impl MessageRouterBuilder {
    /// Creates a builder for an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes messages of type `T` to `handler`. Payloads that do not
    /// decode into `T` are reported as handler errors.
    pub fn forward<T, F>(&self, mut handler: F) -> &Self
    where
        T: BroadcastMessage,
        F: FnMut(T) + 'static,
    {
        self.router.borrow_mut().set_rule(
            T::MESSAGE_TYPE,
            Box::new(move |message: &Message| -> Result<(), BroadcastError> {
                handler(message.decode::<T>()?);
                Ok(())
            }),
        );
        self
    }

    /// Sends every unmatched message to `handler`.
    pub fn otherwise(&self, mut handler: impl FnMut(&Message) + 'static) -> &Self {
        self.router
            .borrow_mut()
            .set_default(Some(Box::new(move |message: &Message| -> Result<(), BroadcastError> {
                handler(message);
                Ok(())
            })));
        self
    }

    /// Logs a warning for unmatched messages. This is the initial
    /// behaviour.
    pub fn else_log_warning(&self) -> &Self {
        self.router
            .borrow_mut()
            .set_default(Some(Box::new(log_unhandled)));
        self
    }

    /// Silently ignores unmatched messages.
    pub fn else_do_nothing(&self) -> &Self {
        self.router.borrow_mut().set_default(None);
        self
    }

    /// A subscription handler routing through this builder's router.
    #[must_use]
    pub fn handler(&self) -> MessageHandler {
        let router = Rc::clone(&self.router);
        Box::new(move |message: &Message| -> Result<(), BroadcastError> {
            router
                .try_borrow_mut()
                .map_err(|_| BroadcastError::Handler("message router re-entered".to_string()))?
                .route_message(message)
        })
    }
}

impl fmt::Debug for MessageRouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.router.try_borrow() {
            Ok(router) => f.debug_tuple("MessageRouterBuilder").field(&*router).finish(),
            Err(_) => f.write_str("MessageRouterBuilder(<routing>)"),
        }
    }
}

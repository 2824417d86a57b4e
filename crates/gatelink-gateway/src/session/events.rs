//! Events delivered to session handlers

use gatelink_ws::{Callback, CloseFrame};
use serde::Serialize;
use serde_json::Value;

use crate::error::GatewayError;

/// A dispatched gateway event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayEvent {
    /// Event name from the `t` field, e.g. `MESSAGE_CREATE`
    pub name: String,
    /// Event payload, passed through verbatim
    pub data: Value,
    pub sequence: Option<u64>,
}

/// Something the session reports to the host after a tick
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Ready(Value),
    Dispatch(GatewayEvent),
    Error(GatewayError),
    Close(CloseFrame),
}

#[derive(Clone, Default)]
pub(crate) struct SessionHandlers {
    pub(crate) on_ready: Option<Callback<Value>>,
    pub(crate) on_event: Option<Callback<GatewayEvent>>,
    pub(crate) on_error: Option<Callback<GatewayError>>,
    pub(crate) on_close: Option<Callback<CloseFrame>>,
}

impl SessionHandlers {
    pub(crate) fn dispatch(&self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Ready(data) => {
                    if let Some(cb) = &self.on_ready {
                        cb.call(&data);
                    }
                }
                SessionEvent::Dispatch(event) => {
                    if let Some(cb) = &self.on_event {
                        cb.call(&event);
                    }
                }
                SessionEvent::Error(err) => {
                    if let Some(cb) = &self.on_error {
                        cb.call(&err);
                    }
                }
                SessionEvent::Close(frame) => {
                    if let Some(cb) = &self.on_close {
                        cb.call(&frame);
                    }
                }
            }
        }
    }
}

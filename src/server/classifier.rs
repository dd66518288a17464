//! Request classification.
//!
//! First match wins: management paths route to the management dispatcher,
//! a WebSocket handshake on the callback path opens a callback channel,
//! everything else goes through expectation matching.

use crate::api::{parse_management_path, ManagementOp};
use crate::callback::{is_websocket_upgrade, CALLBACK_UPGRADE_PATH};

#[derive(Debug, PartialEq)]
pub enum RequestTarget {
    Management(ManagementOp),
    CallbackUpgrade,
    /// WebSocket handshake on a path the callback socket does not serve
    UnsupportedUpgrade,
    Mock,
}

pub fn classify(path: &str, headers: &hyper::HeaderMap) -> RequestTarget {
    if let Some(op) = parse_management_path(path) {
        return RequestTarget::Management(op);
    }
    if is_websocket_upgrade(headers) {
        return if path == CALLBACK_UPGRADE_PATH {
            RequestTarget::CallbackUpgrade
        } else {
            RequestTarget::UnsupportedUpgrade
        };
    }
    RequestTarget::Mock
}

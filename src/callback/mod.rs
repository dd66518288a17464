//! Callback execution: in-process factories and remote WebSocket channels.

mod channel;
mod local;
mod registry;

pub use channel::{
    handle_upgrade, is_websocket_upgrade, unsupported_upgrade, ClientFrame, ServerFrame,
    CALLBACK_UPGRADE_PATH, CLIENT_REGISTRATION_HEADER,
};
pub use local::{ForwardCallback, LocalCallbackRegistry, ResponseCallback};
pub use registry::{CallbackRegistry, ClientReply, Registration};

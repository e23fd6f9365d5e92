//! Authentication: the broker, the IdP emulator and the stores they share.

mod attributes;
mod broker;
pub mod emulator;
mod error;
pub mod password;
pub mod session_store;
pub mod state;

pub use attributes::{
    AttributeNames, AttributeSource, AuthAttributes, CALLBACK_PATH, CallbackContext,
    EMULATOR_LOGIN_PATH, EMULATOR_LOGOUT_PATH, EmulatedSource, RealTransportSource,
};
pub use broker::{AuthState, AuthenticationBroker, Next, Transition};
pub use emulator::Emulator;
pub use error::AuthError;
pub use session_store::{
    AuthType, SessionRecord, SessionStore, SharedSessionStore, create_session_store,
};
pub use state::{StateManager, create_state_store};

//! Embedded IdP emulator.
//!
//! Simulates the SP/IdP redirect exchange in-process so the federated login
//! path can be exercised without a real identity provider. The SP and IdP
//! share one [`StateManager`](crate::auth::StateManager); the IdP checks
//! credentials against an [`AttributeStore`] of configured test users.

mod attr_store;
mod idp;
mod sp;

use std::sync::Arc;

pub use attr_store::AttributeStore;
pub use idp::{EmulatedIdp, IDP_PATH};
pub use sp::{EmulatedSp, Initiation, SP_COOKIE};

use crate::{
    auth::{AttributeNames, StateManager},
    config::BrokerConfig,
};

/// The emulated SP and IdP, sharing one state manager and attribute store.
#[derive(Clone)]
pub struct Emulator {
    pub sp: EmulatedSp,
    pub idp: EmulatedIdp,
}

impl Emulator {
    pub fn new(state: StateManager, config: &BrokerConfig) -> Self {
        let store = Arc::new(AttributeStore::from_config(&config.emulator));
        let names = AttributeNames::from(&config.federation);
        tracing::info!(users = store.len(), "IdP emulator enabled");
        Self {
            sp: EmulatedSp::new(state.clone(), store.clone(), names.clone()),
            idp: EmulatedIdp::new(state, store, names),
        }
    }
}

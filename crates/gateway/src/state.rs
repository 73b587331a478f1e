//! Shared application state for the gateway

use souk_auth::Authenticator;
use souk_realtime::{ChatHub, Principal};

use crate::error::{GatewayError, GatewayResult};

#[derive(Clone)]
pub struct GatewayState {
    authenticator: Authenticator,
    hub: ChatHub,
}

impl GatewayState {
    pub fn new(authenticator: Authenticator, hub: ChatHub) -> Self {
        Self { authenticator, hub }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    /// Resolve a bearer token to the principal the hub acts for.
    pub async fn authenticate(&self, token: &str) -> GatewayResult<Principal> {
        let (user, _session) = self
            .authenticator
            .authenticate_token(token)
            .await
            .map_err(GatewayError::from)?;

        Ok(Principal {
            user_id: user.id,
            public_id: user.public_id,
        })
    }
}

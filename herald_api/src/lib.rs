use herald_core::HeraldCore;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod result;

/// Shared by every worker. Holds the core handle (and through it the storage
/// pool) and the token service.
pub struct AppState {
    pub core: HeraldCore,
    pub tokens: auth::TokenService,
}

impl AppState {
    pub fn new(core: HeraldCore, tokens: auth::TokenService) -> Self {
        Self { core, tokens }
    }
}

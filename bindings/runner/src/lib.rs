mod common;
mod config;
mod context;
mod correlation;
mod runner_context;

pub mod prelude {
    /// Common operations for order API scenarios.
    ///
    /// This is a good place to start if you are getting started writing scenarios.
    pub use crate::common::*;

    pub use crate::config::{
        merchant_credentials_from_env, OrderApiDefaults, CHANNEL_ID_ENV, MERCHANT_ID_ENV,
        MERCHANT_KEY_ENV,
    };
    pub use crate::context::OrderWorkerContext;
    pub use crate::correlation::CorrelationStore;
    pub use crate::runner_context::OrderRunnerContext;

    /// Re-export of the `load_tunnel_runner` prelude.
    ///
    /// This is for convenience so that you can depend on a single crate for the runner in your scenarios.
    pub use load_tunnel_runner::prelude::*;

    /// Re-export of the instrumented client for convenience.
    pub use order_client_instrumented::prelude::*;
}

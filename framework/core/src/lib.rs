mod abort;
mod shutdown;

pub mod prelude {
    pub use crate::abort::RunAbortError;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}

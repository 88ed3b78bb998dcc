/// Return this error from a scenario hook to abort the whole run.
///
/// Use it for faults that make every following request meaningless, such as a request signer that
/// cannot produce a signature. The runner stops handing out iterations, drains the workers that are
/// mid-iteration and then returns this error from `run`.
///
/// Errors which only affect a single request should be recorded as a failed outcome instead.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("Run aborted: {msg}")]
pub struct RunAbortError {
    msg: String,
}

impl RunAbortError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl Default for RunAbortError {
    fn default() -> Self {
        Self {
            msg: "Scenario requested an abort".to_string(),
        }
    }
}

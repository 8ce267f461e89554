#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    /// The declared spec asks for something the operator refuses to do
    /// (storage shrinkage, malformed sizes). Reported in status and
    /// returned until the spec changes.
    #[error("Spec violation: {0}")]
    SpecViolation(String),

    #[error("Invalid resource quantity '{0}'")]
    Quantity(String),

    #[error("Status write for '{0}' still conflicted after {1} attempts")]
    StatusConflict(String, u32),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

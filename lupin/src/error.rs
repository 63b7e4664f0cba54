//! Error types for lupin

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while declaring models, constructing inference
/// instances, or running them.
#[derive(Debug, Error)]
pub enum Error {
    /// Latent and approximating variables disagree on shape
    #[error("shape mismatch between latent `{latent}` {latent_shape:?} and approximation `{approx}` {approx_shape:?}")]
    ShapeMismatch {
        latent: String,
        approx: String,
        latent_shape: Vec<usize>,
        approx_shape: Vec<usize>,
    },

    /// Observed data does not have the observed variable's shape
    #[error("data bound to `{variable}` has shape {data_shape:?}, expected {expected:?}")]
    DataShape {
        variable: String,
        expected: Vec<usize>,
        data_shape: Vec<usize>,
    },

    /// Scale multipliers must be finite and strictly positive
    #[error("scale for `{variable}` must be finite and > 0, got {scale}")]
    NonPositiveScale { variable: String, scale: f64 },

    /// The node id does not exist in this model
    #[error("`{0}` is not part of the model graph")]
    UnknownVariable(String),

    /// A handle created by another model was used
    #[error("`{0}` belongs to a different model")]
    ForeignNode(String),

    /// A mapping key must be a random variable
    #[error("`{0}` is not a random variable")]
    NotRandom(String),

    /// A latent appears twice in the latent mapping
    #[error("latent `{0}` appears more than once in the latent mapping")]
    DuplicateLatent(String),

    /// A variable is listed both as latent and as observed
    #[error("`{0}` is mapped both as a latent and as observed data")]
    LatentObserved(String),

    /// The approximating variable depends on its own latent
    #[error("approximation `{approx}` depends on its latent `{latent}`")]
    SelfDependentApproximation { latent: String, approx: String },

    /// The family cannot be used by this algorithm
    #[error("{algorithm} cannot use `{variable}` ({family})")]
    UnsupportedFamily {
        algorithm: &'static str,
        variable: String,
        family: &'static str,
    },

    /// Invalid configuration or model declaration
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A placeholder was evaluated without a feed
    #[error("placeholder `{0}` was not fed")]
    UnfedPlaceholder(String),

    /// Aliased bindings form a cycle
    #[error("binding cycle detected at `{0}`")]
    Cycle(String),

    /// Empirical distributions have no closed-form log density
    #[error("log density unavailable for `{0}`")]
    LogProbUnavailable(String),

    /// `update()` was invoked before `initialize()`
    #[error("{inference}: update() called before initialize()")]
    NotInitialized { inference: String },

    /// `initialize()` was invoked twice
    #[error("{inference}: initialize() called more than once")]
    AlreadyInitialized { inference: String },

    /// A composition has no stages
    #[error("composition has no stages")]
    EmptyComposition,

    /// Error from the tensor engine
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

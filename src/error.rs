use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Invalid sampler configuration: {0}")]
    Configuration(String),
    #[error("Proposal {name} is unavailable: {reason}")]
    ProposalUnavailable { name: String, reason: String },
    #[error("Likelihood function returned unrecoverable error")]
    LikelihoodEvaluation(#[source] anyhow::Error),
    #[error("Non-finite log posterior difference")]
    NumericalDegeneracy,
    #[error("Could not access checkpoint at {path}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("Chain {chain} exceeded the round timeout")]
    Timeout { chain: usize },
    #[error("Could not find a valid initial position: {0}")]
    Initialization(String),
}

pub type Result<T> = std::result::Result<T, SamplerError>;

impl SamplerError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SamplerError::Configuration(msg.into())
    }

    pub(crate) fn checkpoint(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        SamplerError::CheckpointIo {
            path: path.into(),
            source: source.into(),
        }
    }
}

use crate::api::ApiError;
use crate::judge::JudgeError;
use crate::RunStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("preprocessing failed: {0}")]
    Preprocessing(#[source] ApiError),

    #[error("all {attempted} candidate generations failed: {}", .reasons.join("; "))]
    UpstreamGeneration {
        attempted: usize,
        reasons: Vec<String>,
    },

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("result rejected by quality check: similarity to the reference is low")]
    QualityRejected,

    #[error("gave up after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<SynthesisError>,
    },
}

impl SynthesisError {
    /// Whether a fresh run could succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::RetryExhausted { .. })
    }

    /// The underlying failure, looking through `RetryExhausted`
    pub fn root(&self) -> &SynthesisError {
        match self {
            Self::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Stage of the run that produced this error
    pub fn stage(&self) -> RunStage {
        match self {
            Self::Validation(_) => RunStage::Init,
            Self::Preprocessing(_) => RunStage::Preprocessing,
            Self::UpstreamGeneration { .. } => RunStage::Generating,
            Self::Judge(_) | Self::QualityRejected => RunStage::Judging,
            Self::RetryExhausted { last, .. } => last.stage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_exhaustion() {
        let err = SynthesisError::RetryExhausted {
            attempts: 2,
            last: Box::new(SynthesisError::QualityRejected),
        };

        assert!(matches!(err.root(), SynthesisError::QualityRejected));
        assert_eq!(err.stage(), RunStage::Judging);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_generation_error_lists_reasons() {
        let err = SynthesisError::UpstreamGeneration {
            attempted: 2,
            reasons: vec!["#0: timeout".to_string(), "#1: 500".to_string()],
        };

        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "all 2 candidate generations failed: #0: timeout; #1: 500"
        );
    }
}

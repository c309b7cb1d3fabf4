use thiserror::Error;

/// Per-unit failure taxonomy. Everything here is caught at the orchestrator
/// boundary and recorded against the work unit; nothing aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// DNS failure, timeout, connection reset.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// 2xx response with an implausibly short body. Upstream soft-block.
    #[error("empty body ({0} bytes)")]
    EmptyBody(usize),

    /// Markup drift: no table matched any strategy after comment stripping.
    #[error("no table found for stat type '{0}'")]
    NoTableFound(String),

    /// Stat type has no configured field mapping. Never retried.
    #[error("no field mapping for stat type '{0}'")]
    MappingMismatch(String),

    /// Upsert batch failed; nothing from the batch was written.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Whether the orchestrator should spend another attempt on this unit.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::MappingMismatch(_))
    }

    /// Short tag stored in the progress error history, so markup-drift
    /// failures can be told apart from transient network ones at a glance.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Network(_) => "network",
            PipelineError::HttpStatus(_) => "http",
            PipelineError::EmptyBody(_) => "soft-block",
            PipelineError::NoTableFound(_) => "no-table",
            PipelineError::MappingMismatch(_) => "mapping",
            PipelineError::Persistence(_) => "persistence",
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(code) => PipelineError::HttpStatus(code.as_u16()),
            None => PipelineError::Network(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(PipelineError::Network("reset".into()).is_retryable());
        assert!(PipelineError::HttpStatus(503).is_retryable());
        assert!(PipelineError::EmptyBody(12).is_retryable());
        assert!(PipelineError::NoTableFound("shooting".into()).is_retryable());
        assert!(!PipelineError::MappingMismatch("lineups".into()).is_retryable());
    }

    #[test]
    fn test_categories_are_distinct() {
        let errs = [
            PipelineError::Network(String::new()),
            PipelineError::HttpStatus(500),
            PipelineError::EmptyBody(0),
            PipelineError::NoTableFound(String::new()),
            PipelineError::MappingMismatch(String::new()),
            PipelineError::Persistence(String::new()),
        ];
        let cats: std::collections::HashSet<_> = errs.iter().map(|e| e.category()).collect();
        assert_eq!(cats.len(), errs.len());
    }
}

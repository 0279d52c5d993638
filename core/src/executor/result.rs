use std::fmt;

/// Outcome of work that may fail in several independent places.
///
/// `Failed` carries every failure observed, in the order they were merged.
#[derive(Debug)]
#[must_use]
pub enum ExecutionResult<T> {
    Succeeded(T),
    Failed(Vec<anyhow::Error>),
}

impl<T> ExecutionResult<T> {
    pub fn succeeded(value: T) -> Self {
        Self::Succeeded(value)
    }

    pub fn failed(failure: impl Into<anyhow::Error>) -> Self {
        Self::Failed(vec![failure.into()])
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn failures(&self) -> &[anyhow::Error] {
        match self {
            Self::Succeeded(_) => &[],
            Self::Failed(failures) => failures,
        }
    }

    pub fn into_failures(self) -> Vec<anyhow::Error> {
        match self {
            Self::Succeeded(_) => Vec::new(),
            Self::Failed(failures) => failures,
        }
    }

    /// Appends the failures of `other`, if any, after this result's own.
    pub fn with_failures<U>(self, other: ExecutionResult<U>) -> Self {
        let extra = other.into_failures();
        if extra.is_empty() {
            return self;
        }
        match self {
            Self::Succeeded(_) => Self::Failed(extra),
            Self::Failed(mut failures) => {
                failures.extend(extra);
                Self::Failed(failures)
            }
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        match self {
            Self::Succeeded(value) => ExecutionResult::Succeeded(f(value)),
            Self::Failed(failures) => ExecutionResult::Failed(failures),
        }
    }

    /// Returns the value, or an error carrying the failures. A single failure
    /// is returned as is.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            Self::Succeeded(value) => Ok(value),
            Self::Failed(mut failures) if failures.len() == 1 => Err(failures.remove(0)),
            Self::Failed(failures) => Err(anyhow::Error::new(MultipleFailures { failures })),
        }
    }

    pub fn assert_no_failures(self) -> anyhow::Result<()> {
        self.into_result().map(drop)
    }
}

impl ExecutionResult<()> {
    pub fn ok() -> Self {
        Self::Succeeded(())
    }

    /// Succeeds if `failures` is empty.
    pub fn maybe_failed(failures: Vec<anyhow::Error>) -> Self {
        if failures.is_empty() {
            Self::Succeeded(())
        } else {
            Self::Failed(failures)
        }
    }
}

/// Error returned by [`ExecutionResult::into_result`] for more than one
/// failure.
#[derive(Debug)]
pub struct MultipleFailures {
    failures: Vec<anyhow::Error>,
}

impl MultipleFailures {
    pub fn failures(&self) -> &[anyhow::Error] {
        &self.failures
    }
}

impl fmt::Display for MultipleFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failures:", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            write!(f, "\n  {}: {failure:#}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultipleFailures {}

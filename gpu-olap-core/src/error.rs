use thiserror::Error;

/// Errors reported by column construction and kernel launches.
///
/// `InvalidArgument`, `TypeMismatch` and `OutOfBounds` are raised at call
/// time, before anything is queued. `Allocation` and `Execution` come from
/// the device side and may only show up when a launched task is awaited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

impl KernelError {
    /// True for shape/type precondition failures.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, KernelError::InvalidArgument(_) | KernelError::TypeMismatch(_))
    }

    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, KernelError::OutOfBounds(_))
    }

    /// Recover a `KernelError` that travelled through the execution queue.
    pub fn from_queue(err: anyhow::Error) -> Self {
        match err.downcast::<KernelError>() {
            Ok(kernel) => kernel,
            Err(other) => KernelError::Execution(format!("{:#}", other)),
        }
    }

    pub(crate) fn allocation(err: anyhow::Error) -> Self {
        KernelError::Allocation(format!("{:#}", err))
    }
}

/// Creates a formatted message for length mismatches between two operands.
pub fn length_mismatch(fname: &str, lhs: usize, rhs: usize) -> String {
    format!("{} => Length mismatch: LHS {} RHS {}", fname, lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_errors_round_trip() {
        let original = KernelError::OutOfBounds("index 9".into());
        let through_queue = anyhow::Error::from(original.clone());
        assert_eq!(KernelError::from_queue(through_queue), original);

        let foreign = anyhow::anyhow!("driver lost");
        assert!(matches!(
            KernelError::from_queue(foreign),
            KernelError::Execution(msg) if msg.contains("driver lost")
        ));
    }

    #[test]
    fn categories() {
        assert!(KernelError::TypeMismatch(String::new()).is_invalid_argument());
        assert!(!KernelError::Execution(String::new()).is_invalid_argument());
        assert!(KernelError::OutOfBounds(String::new()).is_out_of_bounds());
        assert_eq!(length_mismatch("gather", 3, 4), "gather => Length mismatch: LHS 3 RHS 4");
    }
}

//! # Error Handling
//!
//! Error types for the translation core, plus [`Partial`], the best-effort
//! result carried out of every synthesis pass.

pub mod types;

pub use types::{Error, Result};

/// A possibly incomplete value together with every error hit while producing it.
///
/// Synthesis keeps going past failures that only affect one backend or one
/// route; callers decide whether the partial value is deployable.
#[derive(Debug)]
#[must_use]
pub struct Partial<T> {
    pub value: T,
    pub errors: Vec<Error>,
}

impl<T> Partial<T> {
    pub fn new(value: T) -> Self {
        Self { value, errors: Vec::new() }
    }

    pub fn with_errors(value: T, errors: Vec<Error>) -> Self {
        Self { value, errors }
    }

    /// True when no error was recorded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Move the errors of `other` into `self` and hand back its value.
    pub fn absorb<U>(&mut self, other: Partial<U>) -> U {
        self.errors.extend(other.errors);
        other.value
    }

    /// Split into the value and the joined error, if any.
    pub fn into_parts(self) -> (T, Option<Error>) {
        (self.value, Error::join(self.errors))
    }

    /// Reject the value if anything failed.
    pub fn into_result(self) -> Result<T> {
        match Error::join(self.errors) {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_moves_errors() {
        let mut outer = Partial::new(Vec::<u32>::new());
        let inner = Partial::with_errors(7u32, vec![Error::internal("inner")]);

        let value = outer.absorb(inner);
        outer.value.push(value);

        assert_eq!(outer.value, vec![7]);
        assert_eq!(outer.errors.len(), 1);
        assert!(!outer.is_complete());
    }

    #[test]
    fn into_result_rejects_partial_values() {
        let partial = Partial::with_errors(
            "clusters",
            vec![Error::resolution("a", "x"), Error::resolution("b", "y")],
        );
        let err = partial.into_result().unwrap_err();
        assert_eq!(err.leaves().len(), 2);

        assert_eq!(Partial::new(3).into_result().unwrap(), 3);
    }

    #[test]
    fn into_parts_keeps_value() {
        let (value, error) =
            Partial::with_errors(vec![1, 2], vec![Error::internal("late")]).into_parts();
        assert_eq!(value, vec![1, 2]);
        assert!(matches!(error, Some(Error::Internal { .. })));
    }
}

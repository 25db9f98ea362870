// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Error accumulation
//!
//! Construction and batch operations keep going after a failure and report
//! everything at once.

use super::TreeflowError;

/// A list of errors collected without short-circuiting
#[derive(Debug, Clone, Default)]
pub struct ErrorGroup {
    errors: Vec<TreeflowError>,
}

impl ErrorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: TreeflowError) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = TreeflowError>) {
        self.errors.extend(errs);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[TreeflowError] {
        &self.errors
    }

    /// Collapse the group into a single error, `Ok` when nothing was collected
    pub fn into_result(self) -> Result<(), TreeflowError> {
        let mut errors = self.errors;
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(TreeflowError::Aggregate {
                errors: errors.iter().map(|e| e.to_string()).collect(),
            }),
        }
    }
}

impl IntoIterator for ErrorGroup {
    type Item = TreeflowError;
    type IntoIter = std::vec::IntoIter<TreeflowError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl FromIterator<TreeflowError> for ErrorGroup {
    fn from_iter<I: IntoIterator<Item = TreeflowError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_group_is_ok() {
        assert!(ErrorGroup::new().into_result().is_ok());
    }

    #[test]
    fn test_single_error_is_returned_as_is() {
        let mut group = ErrorGroup::new();
        group.push(TreeflowError::EmptyPipelineName);

        assert!(matches!(
            group.into_result(),
            Err(TreeflowError::EmptyPipelineName)
        ));
    }

    #[test]
    fn test_many_errors_are_aggregated() {
        let group: ErrorGroup = vec![
            TreeflowError::EmptyPipelineName,
            TreeflowError::StageNotFound { stage: "x".into() },
        ]
        .into_iter()
        .collect();

        match group.into_result() {
            Err(TreeflowError::Aggregate { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {:?}", other),
        }
    }
}

//! Error-context helpers, grounded on `rvoip-infra-common::errors::context`.
//!
//! Component-boundary errors in each crate are typed `thiserror` enums;
//! this module adds a uniform way to attach "which component, which
//! operation" context when an error crosses a boundary, without forcing
//! every crate to carry the context fields on every variant.

use std::fmt;

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {} during {}", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// Adds `ErrorContext` to any `std::error::Error`, wrapping it as a string
/// so the call site doesn't need a matching `Error` variant per context.
pub trait ErrorExt: Sized {
    fn with_context<S: Into<String>, T: Into<String>>(
        self,
        component: S,
        operation: T,
    ) -> String;
}

impl<E: fmt::Display> ErrorExt for E {
    fn with_context<S: Into<String>, T: Into<String>>(
        self,
        component: S,
        operation: T,
    ) -> String {
        format!("{} [{}]", self, ErrorContext::new(component, operation))
    }
}

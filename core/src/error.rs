//! Error types for registry operations.

use crate::id::ComponentId;
use thiserror::Error;

/// Errors returned by registry operations that callers may want to react to.
///
/// Hot-path code treats these as benign: the interception protocol logs them
/// and lets the request proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The component was never registered or was already torn down
    #[error("Component '{0}' is not registered")]
    ComponentNotRegistered(ComponentId),

    /// A request tag was supplied without the mandatory component identity
    #[error("Request tag is missing its component identity")]
    MissingComponentId,
}

//! Error types for the ECS public surface.

/// Errors surfaced by fallible ECS operations.
///
/// Mutating operations (`set`, `remove`, `destroy`) are silent no-ops on
/// invalid handles and never produce these; only accessors fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The handle's version does not match the referenced slot (or the handle
    /// belongs to a different world).
    #[error("invalid handle: version mismatch or foreign world")]
    InvalidHandle,

    /// The entity's archetype does not store the requested component type.
    #[error("entity has no `{type_name}` component")]
    MissingComponent {
        /// Name of the requested component type.
        type_name: &'static str,
    },

    /// A directory or column growth request exceeded addressable capacity.
    #[error("storage growth exceeded capacity limits")]
    CapacityOverflow,

    /// Internal consistency violation. This indicates a bug in the ECS itself,
    /// not in calling code.
    #[error("framework invariant violated: {0}")]
    FrameworkInvariant(&'static str),
}

/// Result alias for ECS operations.
pub type Result<T> = std::result::Result<T, Error>;

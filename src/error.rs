use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error
{
    /// Promotion of a weak handle whose object is gone, or that never
    /// observed one.
    #[error("weak handle refers to an object that has already been released")]
    DeadReference,

    /// Shared-from-this on an object that no shared handle owns (any more).
    #[error("object is not owned by any shared handle")]
    NoOwningObject,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

use sera_geom::GridError;

/// Everything that can go wrong when asking the rig to do something.
///
/// None of these are retried: they're reported to the operator, and the
/// coordinator stays usable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// The request didn't make it, timed out, or came back with a failure
    /// status and no explanation.
    #[error("couldn't talk to the rig: {0}")]
    Transport(String),
    /// The controller understood the request and said no.
    #[error("the rig refused: {0}")]
    Device(String),
    #[error("there is no position {} (the grid has {len})", .index.saturating_add(1))]
    IndexOutOfRange { index: usize, len: usize },
    /// Another move (or a tour) already holds the rig.
    #[error("the rig is busy with another move")]
    Busy,
}

impl From<GridError> for MoveError {
    fn from(e: GridError) -> Self {
        match e {
            GridError::IndexOutOfRange { index, len } => MoveError::IndexOutOfRange { index, len },
        }
    }
}

//! Synchronization pass state.

/// Where a synchronization pass currently is.
///
/// A pass moves `Idle -> Pushing(t0) -> Pulling(t0) -> Pushing(t1) -> ... -> Idle`
/// on success and ends in `Aborted` on the first stage error. Tables finished
/// before the failure keep their committed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Pushing { table: &'static str },
    Pulling { table: &'static str },
    Aborted { error: String },
}

pub mod checkin;
pub mod error;
pub mod remote;
pub mod state;
pub mod sync;

pub use checkin::{CheckinOutcome, CheckinRules, LastCheckin, PointsAction};
pub use error::{StoreError, SyncError};
pub use remote::{HfHubStore, LocalDirStore, MemoryRemote, RemoteStore};
pub use state::{PersistedState, StateStore};
pub use sync::{LoadOutcome, SyncAdapter, SyncStats};

pub mod command;
pub mod log;
pub mod status;
pub mod sync;

pub use command::{GitRepo, GitSession};
pub use log::{SyncLog, SyncLogEntry, SyncOperation};
pub use status::{ChangeArea, ChangeSummary, FileChange, RepoLayout, StatusEntry};
pub use sync::{PullOutcome, PushOutcome, SyncConfig, SyncEngine, SyncState, SyncStatus};

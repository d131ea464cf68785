pub mod flags;
pub mod patch;
pub mod record;
pub mod sync_token;
pub mod work_item;

pub use flags::{Flag, FlagSet};
pub use patch::{JsonPatchOperation, PatchOp};
pub use record::{Classification, FailureReason, Phase, RecordState, RecordStateError, Requirement};
pub use sync_token::{SyncToken, SyncTokenError};
pub use work_item::{WorkItem, WorkItemId, WorkItemRelation};

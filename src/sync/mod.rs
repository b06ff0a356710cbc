/// Operation-log synchronization engine.
///
/// Each group is held client-side as a base snapshot plus an ordered log of
/// pending operations. Reads materialize the group by replaying the log over
/// the base; server pushes replace the base and trim every operation the
/// server reports as already incorporated.
///
/// # Module structure
/// - `ids`: OpHash, IdGenerator seam
/// - `limits`: Pending-log guardrail constants
/// - `config`: SyncConfig, ReferencePolicy
/// - `model`: Group, Member, Transaction, ClientGroup
/// - `ops`: Operation, OperationPayload, content hashing
/// - `eval`: Pure evaluator (base + log → Group)
/// - `cache`: Identity-keyed evaluation cache
/// - `reconcile`: Server snapshot reconciliation
/// - `store`: ClientGroupStore: mutation entry points and getters
pub mod cache;
pub mod config;
pub mod eval;
pub mod ids;
pub mod limits;
pub mod model;
pub mod ops;
pub mod reconcile;
pub mod store;

// Re-export core types for convenience
pub use cache::{CacheStats, EvaluationCache};
pub use config::{ReferencePolicy, SyncConfig};
pub use eval::{evaluate, EvalError};
pub use ids::{is_local_id, IdGenerator, OpHash, UuidGenerator};
pub use limits::{check_log_limits, LogLimitStatus, LogLimits};
pub use model::{
    ClientGroup, ClientGroupChanges, Group, GroupOptions, LocalGroupOptions, Member,
    MemberChanges, Participant, SharedGroupOptions, Transaction, TransactionChanges,
};
pub use ops::{Operation, OperationName, OperationPayload, OpError};
pub use reconcile::{on_server_update, ReconcileOutcome, ServerUpdate, SyncError};
pub use store::{ClientGroupStore, StoreError, SyncStatus};

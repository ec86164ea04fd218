//! Shared domain types for agentdesk: validated task ids, the task status
//! state machine, and the persisted records the orchestration engine works on.

pub mod ids;
pub mod model;
pub mod status;

pub use ids::{IdError, MAX_TASK_ID_LEN, TaskId};
pub use model::{
    AuditEntry, AuditKind, Importance, InboxEntry, Message, MessageDelivery, NewMessage, NewTask,
    Reservation, ReviewQueueEntry, Session, Task, TestRun,
};
pub use status::{SessionState, TaskStatus, TransitionError, is_valid_transition, transition};

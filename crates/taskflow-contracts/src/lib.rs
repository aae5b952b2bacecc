//! Shared transport and boundary contracts for Taskflow.
//!
//! Plain serde DTOs for the domain records that cross the core/storage/CLI
//! boundary: sessions, messages, tasks, and subagent records. These carry no
//! behavior — lifecycle mutation lives on the owning subsystem
//! (`taskflow-core`), not on these structs.

pub mod message;
pub mod schedule;
pub mod session;
pub mod subagent;
pub mod task;

pub use message::{ContentBlock, Message, MessageRole};
pub use schedule::{ScheduleEntry, ScheduleKind};
pub use session::{QueueMode, Session};
pub use subagent::{SubagentRecord, SubagentStatus};
pub use task::{Task, TaskStatus};

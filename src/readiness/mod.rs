pub mod predicate;
pub mod waiter;

pub use predicate::{
    init_completed, is_ready, is_running, InitCompleted, PodCondition, Ready, Running,
};
pub use waiter::{evaluate, CollectionWaiter, WaitProgress};

//! Low-level process control for the confine sandbox: process groups,
//! termination escalation and POSIX resource limits.

pub mod process_group;
#[cfg(unix)]
pub mod rlimit;

pub use process_group::{
    DEFAULT_TERMINATION_GRACE, KillSignal, TerminationOutcome, is_process_running, kill_process,
    set_parent_death_signal, set_process_group,
};
#[cfg(unix)]
pub use process_group::{kill_process_group, kill_process_group_by_pid, terminate_process_group};
#[cfg(unix)]
pub use rlimit::RlimitPlan;

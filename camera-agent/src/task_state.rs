//! The per-camera task state machine.
//!
//! Tracks `device_status`, the currently executing task and the most
//! recently completed task between polling exchanges. Invariant:
//! `device_status == Executing` exactly when `executing_task_id` is set.
//! A completed task id is reported in exactly one successful polling
//! request and cleared afterwards.

use director_types::DeviceStatus;
use ptz_control::InterruptFlag;
use tracing::{debug, info};

pub struct TaskStateMachine {
    device_status: DeviceStatus,
    executing_task_id: Option<String>,
    completed_task_id: Option<String>,
    interrupt: InterruptFlag,
}

impl TaskStateMachine {
    pub fn new(interrupt: InterruptFlag) -> Self {
        TaskStateMachine {
            device_status: DeviceStatus::Idle,
            executing_task_id: None,
            completed_task_id: None,
            interrupt,
        }
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.device_status
    }

    pub fn executing_task_id(&self) -> Option<&String> {
        self.executing_task_id.as_ref()
    }

    pub fn completed_task_id(&self) -> Option<&String> {
        self.completed_task_id.as_ref()
    }

    /// Accept a new task: transition to `Executing` unless the device is
    /// busy or the task was already seen (currently executing, or completed
    /// but not yet reported).
    pub fn try_begin(&mut self, task_id: &str) -> bool {
        if self.device_status == DeviceStatus::Executing {
            return false;
        }
        if self.executing_task_id.as_deref() == Some(task_id)
            || self.completed_task_id.as_deref() == Some(task_id)
        {
            return false;
        }
        // Task-state reset clears any interrupt left over from a prior
        // exchange.
        self.interrupt.clear();
        self.device_status = DeviceStatus::Executing;
        self.executing_task_id = Some(task_id.to_string());
        self.check_invariants();
        true
    }

    /// Record task completion (success or failure alike): the id becomes
    /// reportable and the device returns to idle.
    pub fn finish(&mut self, task_id: &str) {
        if self.executing_task_id.as_deref() == Some(task_id) {
            self.executing_task_id = None;
            self.device_status = DeviceStatus::Idle;
        }
        self.completed_task_id = Some(task_id.to_string());
        debug!("task {} completed", task_id);
        self.check_invariants();
    }

    /// An `interrupt=true` polling response: signal the executor and return
    /// to idle immediately.
    pub fn request_interrupt(&mut self) {
        info!("interrupt observed");
        self.interrupt.request();
        if self.device_status == DeviceStatus::Executing {
            self.executing_task_id = None;
            self.device_status = DeviceStatus::Idle;
        }
        self.check_invariants();
    }

    /// Consume the completed id after the polling request carrying it
    /// succeeded.
    pub fn clear_completed(&mut self, reported: &str) {
        if self.completed_task_id.as_deref() == Some(reported) {
            self.completed_task_id = None;
        }
    }

    fn check_invariants(&self) {
        debug_assert_eq!(
            self.device_status == DeviceStatus::Executing,
            self.executing_task_id.is_some()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_finish_cycle() {
        let mut sm = TaskStateMachine::new(InterruptFlag::new());
        assert_eq!(sm.device_status(), DeviceStatus::Idle);

        assert!(sm.try_begin("T1"));
        assert_eq!(sm.device_status(), DeviceStatus::Executing);
        assert_eq!(sm.executing_task_id().map(|s| s.as_str()), Some("T1"));

        // Busy: no second task, and no restart of the same task.
        assert!(!sm.try_begin("T2"));
        assert!(!sm.try_begin("T1"));

        sm.finish("T1");
        assert_eq!(sm.device_status(), DeviceStatus::Idle);
        assert!(sm.executing_task_id().is_none());
        assert_eq!(sm.completed_task_id().map(|s| s.as_str()), Some("T1"));
    }

    #[test]
    fn completed_id_reported_once() {
        let mut sm = TaskStateMachine::new(InterruptFlag::new());
        sm.try_begin("T1");
        sm.finish("T1");

        // Not yet reported: the same task is not restarted.
        assert!(!sm.try_begin("T1"));

        sm.clear_completed("T1");
        assert!(sm.completed_task_id().is_none());
        // After the report cleared, the id may legitimately run again.
        assert!(sm.try_begin("T1"));
    }

    #[test]
    fn interrupt_resets_to_idle() {
        let interrupt = InterruptFlag::new();
        let mut sm = TaskStateMachine::new(interrupt.clone());
        sm.try_begin("T1");

        sm.request_interrupt();
        assert_eq!(sm.device_status(), DeviceStatus::Idle);
        assert!(sm.executing_task_id().is_none());
        assert!(interrupt.is_requested());

        // Late completion from the executor still records the id.
        sm.finish("T1");
        assert_eq!(sm.completed_task_id().map(|s| s.as_str()), Some("T1"));
    }

    #[test]
    fn starting_a_task_clears_stale_interrupt() {
        let interrupt = InterruptFlag::new();
        let mut sm = TaskStateMachine::new(interrupt.clone());
        interrupt.request();
        assert!(sm.try_begin("T1"));
        assert!(!interrupt.is_requested());
    }
}

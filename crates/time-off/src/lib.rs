//! Time off: employee leave requests and their approval (event-sourced).

pub mod leave;

pub use leave::{
    Leave, LeaveAction, LeaveCommand, LeaveEvent, LeaveId, LeavePeriod, LeaveRequested,
    LeaveState, LeaveTransitioned, LeaveType, RequestLeave,
};

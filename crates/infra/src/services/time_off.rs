use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{AggregateId, AggregateRoot, TenantId, UserId};
use kestrel_time_off::{Leave, LeaveAction, LeaveCommand, LeaveId, LeavePeriod, LeaveType, RequestLeave};

use super::{found, listed, ServiceResult, Services};
use crate::command_dispatcher::DispatchError;
use crate::projections::Snapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveInput {
    /// Defaults to the requesting user.
    pub employee_id: Option<UserId>,
    pub leave_type: LeaveType,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveTransition {
    Approve,
    Refuse,
    Cancel,
    Reset,
}

impl Services {
    /// Request time off. An employee cannot hold two active leaves that overlap.
    pub fn request_leave(&self, tenant_id: TenantId, actor: UserId, input: LeaveInput) -> ServiceResult<Snapshot<Leave>> {
        let leave_id = LeaveId::new(AggregateId::new());
        let employee_id = input.employee_id.unwrap_or(actor);
        self.write(|s| {
            if let Ok(period) = LeavePeriod::new(input.date_from, input.date_to) {
                s.ensure_no_overlap(tenant_id, employee_id, &period, None)?;
            }
            s.execute::<Leave>(
                tenant_id,
                leave_id.0,
                LeaveCommand::Request(RequestLeave {
                    tenant_id,
                    leave_id,
                    employee_id,
                    leave_type: input.leave_type,
                    from: input.date_from,
                    to: input.date_to,
                    reason: input.reason.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.leave(tenant_id, leave_id)
    }

    pub fn leave_action(
        &self,
        tenant_id: TenantId,
        leave_id: LeaveId,
        actor: UserId,
        transition: LeaveTransition,
    ) -> ServiceResult<Snapshot<Leave>> {
        let action = LeaveAction {
            tenant_id,
            leave_id,
            actor,
            occurred_at: Utc::now(),
        };
        self.write(|s| {
            let command = match transition {
                LeaveTransition::Approve => LeaveCommand::Approve(action),
                LeaveTransition::Refuse => LeaveCommand::Refuse(action),
                LeaveTransition::Cancel => LeaveCommand::Cancel(action),
                LeaveTransition::Reset => {
                    // Back in `confirm`, the leave blocks the calendar again.
                    let leave = found(&s.views().leaves, tenant_id, leave_id.0)?.aggregate;
                    if let (Some(employee_id), Some(period)) = (leave.employee_id(), leave.period()) {
                        s.ensure_no_overlap(tenant_id, employee_id, &period, Some(leave_id))?;
                    }
                    LeaveCommand::Reset(action)
                }
            };
            s.execute::<Leave>(tenant_id, leave_id.0, command)
        })?;
        self.leave(tenant_id, leave_id)
    }

    pub fn leave(&self, tenant_id: TenantId, leave_id: LeaveId) -> ServiceResult<Snapshot<Leave>> {
        found(&self.views().leaves, tenant_id, leave_id.0)
    }

    pub fn leaves(&self, tenant_id: TenantId) -> Vec<Snapshot<Leave>> {
        listed(&self.views().leaves, tenant_id)
    }

    fn ensure_no_overlap(
        &self,
        tenant_id: TenantId,
        employee_id: UserId,
        period: &LeavePeriod,
        except: Option<LeaveId>,
    ) -> ServiceResult<()> {
        let clash = self.views().leaves.list(tenant_id).into_iter().any(|snapshot| {
            let leave = snapshot.aggregate;
            Some(*leave.id()) != except
                && leave.employee_id() == Some(employee_id)
                && leave.state().is_active()
                && leave.period().is_some_and(|p| p.overlaps(period))
        });
        if clash {
            return Err(DispatchError::field(
                "date_from",
                "the employee already has time off overlapping this period",
            ));
        }
        Ok(())
    }
}

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use kestrel_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaveId(pub AggregateId);

impl LeaveId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LeaveId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveType {
    Paid,
    Sick,
    Unpaid,
    Compensatory,
}

/// `confirm`: waiting for approval, `validate`: approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveState {
    Confirm,
    Validate,
    Refuse,
    Cancel,
}

impl LeaveState {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveState::Confirm => "to approve",
            LeaveState::Validate => "approved",
            LeaveState::Refuse => "refused",
            LeaveState::Cancel => "canceled",
        }
    }

    /// Whether the leave still blocks the employee's calendar.
    pub fn is_active(self) -> bool {
        matches!(self, LeaveState::Confirm | LeaveState::Validate)
    }
}

/// Inclusive date range of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl LeavePeriod {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DomainError> {
        if from > to {
            return Err(DomainError::field("date_to", "the end date cannot be before the start date"));
        }
        Ok(Self { from, to })
    }

    /// Working days (Monday to Friday) in the period.
    pub fn working_days(&self) -> u32 {
        self.from
            .iter_days()
            .take_while(|d| *d <= self.to)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .count() as u32
    }

    pub fn overlaps(&self, other: &LeavePeriod) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

/// Aggregate root: Leave (time-off request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    id: LeaveId,
    tenant_id: Option<TenantId>,
    employee_id: Option<UserId>,
    leave_type: LeaveType,
    period: Option<LeavePeriod>,
    days: u32,
    reason: Option<String>,
    state: LeaveState,
    version: u64,
    created: bool,
}

impl Leave {
    pub fn empty(id: LeaveId) -> Self {
        Self {
            id,
            tenant_id: None,
            employee_id: None,
            leave_type: LeaveType::Paid,
            period: None,
            days: 0,
            reason: None,
            state: LeaveState::Confirm,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn state(&self) -> LeaveState {
        self.state
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn employee_id(&self) -> Option<UserId> {
        self.employee_id
    }

    pub fn leave_type(&self) -> LeaveType {
        self.leave_type
    }

    pub fn period(&self) -> Option<LeavePeriod> {
        self.period
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl AggregateRoot for Leave {
    type Id = LeaveId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLeave {
    pub tenant_id: TenantId,
    pub leave_id: LeaveId,
    pub employee_id: UserId,
    pub leave_type: LeaveType,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of approve / refuse / cancel / reset. `actor` is the user acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveAction {
    pub tenant_id: TenantId,
    pub leave_id: LeaveId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveCommand {
    Request(RequestLeave),
    Approve(LeaveAction),
    Refuse(LeaveAction),
    Cancel(LeaveAction),
    Reset(LeaveAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequested {
    pub tenant_id: TenantId,
    pub leave_id: LeaveId,
    pub employee_id: UserId,
    pub leave_type: LeaveType,
    pub period: LeavePeriod,
    pub days: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveTransitioned {
    pub tenant_id: TenantId,
    pub leave_id: LeaveId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveEvent {
    Requested(LeaveRequested),
    Approved(LeaveTransitioned),
    Refused(LeaveTransitioned),
    Canceled(LeaveTransitioned),
    Reset(LeaveTransitioned),
}

impl Event for LeaveEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LeaveEvent::Requested(_) => "time_off.leave.requested",
            LeaveEvent::Approved(_) => "time_off.leave.approved",
            LeaveEvent::Refused(_) => "time_off.leave.refused",
            LeaveEvent::Canceled(_) => "time_off.leave.canceled",
            LeaveEvent::Reset(_) => "time_off.leave.reset",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LeaveEvent::Requested(e) => e.occurred_at,
            LeaveEvent::Approved(e)
            | LeaveEvent::Refused(e)
            | LeaveEvent::Canceled(e)
            | LeaveEvent::Reset(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Leave {
    type Command = LeaveCommand;
    type Event = LeaveEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LeaveEvent::Requested(e) => {
                self.id = e.leave_id;
                self.tenant_id = Some(e.tenant_id);
                self.employee_id = Some(e.employee_id);
                self.leave_type = e.leave_type;
                self.period = Some(e.period);
                self.days = e.days;
                self.reason = e.reason.clone();
                self.state = LeaveState::Confirm;
                self.created = true;
            }
            LeaveEvent::Approved(_) => self.state = LeaveState::Validate,
            LeaveEvent::Refused(_) => self.state = LeaveState::Refuse,
            LeaveEvent::Canceled(_) => self.state = LeaveState::Cancel,
            LeaveEvent::Reset(_) => self.state = LeaveState::Confirm,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        use LeaveState::*;

        match command {
            LeaveCommand::Request(cmd) => self.handle_request(cmd),
            LeaveCommand::Approve(cmd) => self.transition(cmd, &[Confirm], "approved", LeaveEvent::Approved),
            LeaveCommand::Refuse(cmd) => {
                self.transition(cmd, &[Confirm, Validate], "refused", LeaveEvent::Refused)
            }
            LeaveCommand::Cancel(cmd) => {
                self.ensure_existing(cmd)?;
                let started = self
                    .period
                    .is_some_and(|p| cmd.occurred_at.date_naive() >= p.from);
                if started {
                    return Err(DomainError::invariant("a leave that has already started cannot be canceled"));
                }
                self.transition(cmd, &[Confirm, Validate], "canceled", LeaveEvent::Canceled)
            }
            LeaveCommand::Reset(cmd) => self.transition(cmd, &[Refuse, Cancel], "reset", LeaveEvent::Reset),
        }
    }
}

impl Leave {
    fn ensure_existing(&self, cmd: &LeaveAction) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(cmd.tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn transition(
        &self,
        cmd: &LeaveAction,
        allowed: &[LeaveState],
        action: &str,
        event: fn(LeaveTransitioned) -> LeaveEvent,
    ) -> Result<Vec<LeaveEvent>, DomainError> {
        self.ensure_existing(cmd)?;
        if !allowed.contains(&self.state) {
            let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
            return Err(DomainError::invariant(format!(
                "only {} leaves can be {action}",
                names.join(" or ")
            )));
        }
        Ok(vec![event(LeaveTransitioned {
            tenant_id: cmd.tenant_id,
            leave_id: cmd.leave_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request(&self, cmd: &RequestLeave) -> Result<Vec<LeaveEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("leave already exists"));
        }
        let period = LeavePeriod::new(cmd.from, cmd.to)?;
        let days = period.working_days();
        if days == 0 {
            return Err(DomainError::field("date_from", "the requested period has no working days"));
        }

        Ok(vec![LeaveEvent::Requested(LeaveRequested {
            tenant_id: cmd.tenant_id,
            leave_id: cmd.leave_id,
            employee_id: cmd.employee_id,
            leave_type: cmd.leave_type,
            period,
            days,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kestrel_events::execute;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn requested(from: NaiveDate, to: NaiveDate) -> Result<Leave, DomainError> {
        let leave_id = LeaveId::new(AggregateId::new());
        let mut leave = Leave::empty(leave_id);
        execute(
            &mut leave,
            &LeaveCommand::Request(RequestLeave {
                tenant_id: TenantId::new(),
                leave_id,
                employee_id: UserId::new(),
                leave_type: LeaveType::Paid,
                from,
                to,
                reason: Some("family trip".to_string()),
                occurred_at: at(2024, 5, 1),
            }),
        )?;
        Ok(leave)
    }

    fn action(leave: &Leave, occurred_at: DateTime<Utc>) -> LeaveAction {
        LeaveAction {
            tenant_id: leave.tenant_id().unwrap(),
            leave_id: *leave.id(),
            actor: UserId::new(),
            occurred_at,
        }
    }

    #[test]
    fn days_count_working_days_only() {
        // Friday 2024-06-07 to Monday 2024-06-10.
        let leave = requested(date(2024, 6, 7), date(2024, 6, 10)).unwrap();
        assert_eq!(leave.days(), 2);
        assert_eq!(leave.state(), LeaveState::Confirm);
    }

    #[test]
    fn end_before_start_is_a_field_error() {
        let err = requested(date(2024, 6, 10), date(2024, 6, 7)).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("date_to"), .. }));

        let err = requested(date(2024, 6, 8), date(2024, 6, 9)).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("date_from"), .. }));
    }

    #[test]
    fn approve_refuse_reset() {
        let mut leave = requested(date(2024, 6, 10), date(2024, 6, 14)).unwrap();
        let cmd = LeaveCommand::Approve(action(&leave, at(2024, 5, 2)));
        execute(&mut leave, &cmd).unwrap();
        assert_eq!(leave.state(), LeaveState::Validate);

        let err = leave.handle(&LeaveCommand::Approve(action(&leave, at(2024, 5, 2)))).unwrap_err();
        assert_eq!(err, DomainError::invariant("only to approve leaves can be approved"));

        let cmd = LeaveCommand::Refuse(action(&leave, at(2024, 5, 3)));
        execute(&mut leave, &cmd).unwrap();
        let cmd = LeaveCommand::Reset(action(&leave, at(2024, 5, 4)));
        execute(&mut leave, &cmd).unwrap();
        assert_eq!(leave.state(), LeaveState::Confirm);
        assert_eq!(leave.version(), 4);
    }

    #[test]
    fn started_leaves_cannot_be_canceled() {
        let mut leave = requested(date(2024, 6, 10), date(2024, 6, 14)).unwrap();
        let err = leave.handle(&LeaveCommand::Cancel(action(&leave, at(2024, 6, 10)))).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let cmd = LeaveCommand::Cancel(action(&leave, at(2024, 6, 9)));
        execute(&mut leave, &cmd).unwrap();
        assert_eq!(leave.state(), LeaveState::Cancel);
    }

    #[test]
    fn periods_overlap_inclusively() {
        let a = LeavePeriod::new(date(2024, 6, 10), date(2024, 6, 14)).unwrap();
        let b = LeavePeriod::new(date(2024, 6, 14), date(2024, 6, 20)).unwrap();
        let c = LeavePeriod::new(date(2024, 6, 15), date(2024, 6, 20)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}

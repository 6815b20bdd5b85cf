use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;

/// Partner identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartnerId(pub AggregateId);

impl PartnerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartnerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What the company does with this partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerKind {
    Customer,
    Vendor,
    Both,
}

impl PartnerKind {
    pub fn is_customer(self) -> bool {
        matches!(self, PartnerKind::Customer | PartnerKind::Both)
    }

    pub fn is_vendor(self) -> bool {
        matches!(self, PartnerKind::Vendor | PartnerKind::Both)
    }
}

/// Contact information for a partner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Aggregate root: Partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    id: PartnerId,
    tenant_id: Option<TenantId>,
    kind: PartnerKind,
    name: String,
    contact: ContactInfo,
    archived: bool,
    version: u64,
    created: bool,
}

impl Partner {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PartnerId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: PartnerKind::Customer,
            name: String::new(),
            contact: ContactInfo::default(),
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PartnerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> PartnerKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }
}

impl AggregateRoot for Partner {
    type Id = PartnerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterPartner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPartner {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub kind: PartnerKind,
    pub name: String,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePartner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePartner {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    pub kind: Option<PartnerKind>,
    /// Optional new contact info (if None, keep existing).
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePartner {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePartner {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerCommand {
    Register(RegisterPartner),
    Update(UpdatePartner),
    Archive(ArchivePartner),
    Restore(RestorePartner),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRegistered {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub kind: PartnerKind,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerUpdated {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub kind: PartnerKind,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerArchived {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRestored {
    pub tenant_id: TenantId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerEvent {
    Registered(PartnerRegistered),
    Updated(PartnerUpdated),
    Archived(PartnerArchived),
    Restored(PartnerRestored),
}

impl Event for PartnerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartnerEvent::Registered(_) => "partners.partner.registered",
            PartnerEvent::Updated(_) => "partners.partner.updated",
            PartnerEvent::Archived(_) => "partners.partner.archived",
            PartnerEvent::Restored(_) => "partners.partner.restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartnerEvent::Registered(e) => e.occurred_at,
            PartnerEvent::Updated(e) => e.occurred_at,
            PartnerEvent::Archived(e) => e.occurred_at,
            PartnerEvent::Restored(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Partner {
    type Command = PartnerCommand;
    type Event = PartnerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartnerEvent::Registered(e) => {
                self.id = e.partner_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.archived = false;
                self.created = true;
            }
            PartnerEvent::Updated(e) => {
                self.kind = e.kind;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            PartnerEvent::Archived(_) => self.archived = true,
            PartnerEvent::Restored(_) => self.archived = false,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartnerCommand::Register(cmd) => self.handle_register(cmd),
            PartnerCommand::Update(cmd) => self.handle_update(cmd),
            PartnerCommand::Archive(cmd) => self.handle_archive(cmd),
            PartnerCommand::Restore(cmd) => self.handle_restore(cmd),
        }
    }
}

impl Partner {
    fn ensure_existing(&self, tenant_id: TenantId, partner_id: PartnerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != partner_id {
            return Err(DomainError::invariant("partner_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterPartner) -> Result<Vec<PartnerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("partner already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::field("name", "name cannot be empty"));
        }

        Ok(vec![PartnerEvent::Registered(PartnerRegistered {
            tenant_id: cmd.tenant_id,
            partner_id: cmd.partner_id,
            kind: cmd.kind,
            name: cmd.name.trim().to_string(),
            contact: cmd.contact.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdatePartner) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.partner_id)?;
        if self.archived {
            return Err(DomainError::invariant("archived partners cannot be updated"));
        }

        let name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::field("name", "name cannot be empty"));
        }

        Ok(vec![PartnerEvent::Updated(PartnerUpdated {
            tenant_id: cmd.tenant_id,
            partner_id: cmd.partner_id,
            kind: cmd.kind.unwrap_or(self.kind),
            name: name.trim().to_string(),
            contact: cmd.contact.clone().unwrap_or_else(|| self.contact.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchivePartner) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.partner_id)?;
        if self.archived {
            return Err(DomainError::conflict("partner is already archived"));
        }

        Ok(vec![PartnerEvent::Archived(PartnerArchived {
            tenant_id: cmd.tenant_id,
            partner_id: cmd.partner_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestorePartner) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.partner_id)?;
        if !self.archived {
            return Err(DomainError::conflict("partner is not archived"));
        }

        Ok(vec![PartnerEvent::Restored(PartnerRestored {
            tenant_id: cmd.tenant_id,
            partner_id: cmd.partner_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_events::execute;

    fn registered(tenant_id: TenantId) -> Partner {
        let partner_id = PartnerId::new(AggregateId::new());
        let mut partner = Partner::empty(partner_id);
        execute(
            &mut partner,
            &PartnerCommand::Register(RegisterPartner {
                tenant_id,
                partner_id,
                kind: PartnerKind::Vendor,
                name: "Azure Interior".to_string(),
                contact: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        partner
    }

    #[test]
    fn register_trims_name_and_marks_created() {
        let tenant_id = TenantId::new();
        let partner = registered(tenant_id);
        assert_eq!(partner.name(), "Azure Interior");
        assert_eq!(partner.tenant_id(), Some(tenant_id));
        assert!(partner.kind().is_vendor());
        assert!(!partner.kind().is_customer());
        assert_eq!(partner.version(), 1);
    }

    #[test]
    fn register_rejects_blank_name_with_field() {
        let partner = Partner::empty(PartnerId::new(AggregateId::new()));
        let err = partner
            .handle(&PartnerCommand::Register(RegisterPartner {
                tenant_id: TenantId::new(),
                partner_id: partner.id_typed(),
                kind: PartnerKind::Customer,
                name: "  ".to_string(),
                contact: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::field("name", "name cannot be empty"));
    }

    #[test]
    fn archived_partner_cannot_be_updated_until_restored() {
        let tenant_id = TenantId::new();
        let mut partner = registered(tenant_id);
        let partner_id = partner.id_typed();

        execute(
            &mut partner,
            &PartnerCommand::Archive(ArchivePartner { tenant_id, partner_id, occurred_at: Utc::now() }),
        )
        .unwrap();

        let update = PartnerCommand::Update(UpdatePartner {
            tenant_id,
            partner_id,
            name: Some("Deco Addict".to_string()),
            kind: Some(PartnerKind::Both),
            contact: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(partner.handle(&update), Err(DomainError::InvariantViolation(_))));

        execute(
            &mut partner,
            &PartnerCommand::Restore(RestorePartner { tenant_id, partner_id, occurred_at: Utc::now() }),
        )
        .unwrap();
        execute(&mut partner, &update).unwrap();
        assert_eq!(partner.name(), "Deco Addict");
        assert_eq!(partner.kind(), PartnerKind::Both);
    }

    #[test]
    fn commands_on_unknown_partner_are_not_found() {
        let partner = Partner::empty(PartnerId::new(AggregateId::new()));
        let err = partner
            .handle(&PartnerCommand::Archive(ArchivePartner {
                tenant_id: TenantId::new(),
                partner_id: partner.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}

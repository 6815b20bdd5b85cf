use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;

/// Stock location identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What a location represents. Only `internal` locations hold company stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationUsage {
    Supplier,
    Customer,
    Internal,
    Inventory,
    Transit,
    View,
}

impl LocationUsage {
    pub fn is_internal(self) -> bool {
        self == LocationUsage::Internal
    }
}

/// A location as seen by a stock operation: its id plus usage.
///
/// Operations are validated against usage without loading the location stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRef {
    pub id: LocationId,
    pub usage: LocationUsage,
}

impl LocationRef {
    pub fn new(id: LocationId, usage: LocationUsage) -> Self {
        Self { id, usage }
    }
}

/// Aggregate root: Location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    id: LocationId,
    tenant_id: Option<TenantId>,
    name: String,
    usage: LocationUsage,
    archived: bool,
    version: u64,
    created: bool,
}

impl Location {
    pub fn empty(id: LocationId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            usage: LocationUsage::Internal,
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> LocationUsage {
        self.usage
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn location_ref(&self) -> LocationRef {
        LocationRef::new(self.id, self.usage)
    }
}

impl AggregateRoot for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocation {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    /// Full path name, e.g. `WH/Stock`.
    pub name: String,
    pub usage: LocationUsage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationCommand {
    Create(CreateLocation),
    Archive(ArchiveLocation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCreated {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub name: String,
    pub usage: LocationUsage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationArchived {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationEvent {
    Created(LocationCreated),
    Archived(LocationArchived),
}

impl Event for LocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LocationEvent::Created(_) => "inventory.location.created",
            LocationEvent::Archived(_) => "inventory.location.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LocationEvent::Created(e) => e.occurred_at,
            LocationEvent::Archived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Location {
    type Command = LocationCommand;
    type Event = LocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LocationEvent::Created(e) => {
                self.id = e.location_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.usage = e.usage;
                self.created = true;
            }
            LocationEvent::Archived(_) => self.archived = true,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LocationCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("location already exists"));
                }
                if cmd.name.trim().is_empty() {
                    return Err(DomainError::field("name", "name cannot be empty"));
                }
                Ok(vec![LocationEvent::Created(LocationCreated {
                    tenant_id: cmd.tenant_id,
                    location_id: cmd.location_id,
                    name: cmd.name.trim().to_string(),
                    usage: cmd.usage,
                    occurred_at: cmd.occurred_at,
                })])
            }
            LocationCommand::Archive(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) {
                    return Err(DomainError::invariant("tenant mismatch"));
                }
                if self.archived {
                    return Err(DomainError::conflict("location is already archived"));
                }
                Ok(vec![LocationEvent::Archived(LocationArchived {
                    tenant_id: cmd.tenant_id,
                    location_id: cmd.location_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_events::execute;

    #[test]
    fn create_and_archive_location() {
        let tenant_id = TenantId::new();
        let location_id = LocationId::new(AggregateId::new());
        let mut location = Location::empty(location_id);

        execute(
            &mut location,
            &LocationCommand::Create(CreateLocation {
                tenant_id,
                location_id,
                name: "WH/Stock/Shelf 1".to_string(),
                usage: LocationUsage::Internal,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(location.usage().is_internal());

        let archive = LocationCommand::Archive(ArchiveLocation {
            tenant_id,
            location_id,
            occurred_at: Utc::now(),
        });
        execute(&mut location, &archive).unwrap();
        assert!(location.is_archived());
        assert!(matches!(location.handle(&archive), Err(DomainError::Conflict(_))));
    }
}

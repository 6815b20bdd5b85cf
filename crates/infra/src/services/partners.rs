use chrono::Utc;
use serde::Deserialize;

use kestrel_core::{AggregateId, TenantId};
use kestrel_partners::{
    ArchivePartner, ContactInfo, Partner, PartnerCommand, PartnerId, PartnerKind, RegisterPartner,
    RestorePartner, UpdatePartner,
};

use super::{found, listed, ServiceResult, Services};
use crate::command_dispatcher::DispatchError;
use crate::projections::Snapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct PartnerInput {
    pub name: String,
    pub kind: PartnerKind,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl PartnerInput {
    fn contact(&self) -> ContactInfo {
        ContactInfo {
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartnerChanges {
    pub name: Option<String>,
    pub kind: Option<PartnerKind>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl Services {
    pub fn register_partner(&self, tenant_id: TenantId, input: PartnerInput) -> ServiceResult<Snapshot<Partner>> {
        let partner_id = PartnerId::new(AggregateId::new());
        self.write(|s| {
            s.execute::<Partner>(
                tenant_id,
                partner_id.0,
                PartnerCommand::Register(RegisterPartner {
                    tenant_id,
                    partner_id,
                    kind: input.kind,
                    name: input.name.clone(),
                    contact: Some(input.contact()),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.partner(tenant_id, partner_id)
    }

    /// Contact fields that are absent keep their current value.
    pub fn update_partner(
        &self,
        tenant_id: TenantId,
        partner_id: PartnerId,
        changes: PartnerChanges,
    ) -> ServiceResult<Snapshot<Partner>> {
        let current = self.partner(tenant_id, partner_id)?;
        let contact = if changes.email.is_some() || changes.phone.is_some() || changes.address.is_some() {
            let old = current.aggregate.contact();
            Some(ContactInfo {
                email: changes.email.or_else(|| old.email.clone()),
                phone: changes.phone.or_else(|| old.phone.clone()),
                address: changes.address.or_else(|| old.address.clone()),
            })
        } else {
            None
        };

        self.write(|s| {
            s.execute::<Partner>(
                tenant_id,
                partner_id.0,
                PartnerCommand::Update(UpdatePartner {
                    tenant_id,
                    partner_id,
                    name: changes.name,
                    kind: changes.kind,
                    contact,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.partner(tenant_id, partner_id)
    }

    pub fn archive_partner(&self, tenant_id: TenantId, partner_id: PartnerId) -> ServiceResult<Snapshot<Partner>> {
        self.write(|s| {
            s.execute::<Partner>(
                tenant_id,
                partner_id.0,
                PartnerCommand::Archive(ArchivePartner {
                    tenant_id,
                    partner_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.partner(tenant_id, partner_id)
    }

    pub fn restore_partner(&self, tenant_id: TenantId, partner_id: PartnerId) -> ServiceResult<Snapshot<Partner>> {
        self.write(|s| {
            s.execute::<Partner>(
                tenant_id,
                partner_id.0,
                PartnerCommand::Restore(RestorePartner {
                    tenant_id,
                    partner_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.partner(tenant_id, partner_id)
    }

    pub fn partner(&self, tenant_id: TenantId, partner_id: PartnerId) -> ServiceResult<Snapshot<Partner>> {
        found(&self.views().partners, tenant_id, partner_id.0)
    }

    pub fn partners(&self, tenant_id: TenantId) -> Vec<Snapshot<Partner>> {
        listed(&self.views().partners, tenant_id)
    }

    /// An active partner usable as a vendor.
    pub(crate) fn vendor(&self, tenant_id: TenantId, partner_id: PartnerId, field: &'static str) -> ServiceResult<Partner> {
        let partner = self.active_partner(tenant_id, partner_id, field)?;
        if !partner.kind().is_vendor() {
            return Err(DispatchError::field(field, "the partner is not a vendor"));
        }
        Ok(partner)
    }

    /// An active partner usable as a customer.
    pub(crate) fn customer(&self, tenant_id: TenantId, partner_id: PartnerId, field: &'static str) -> ServiceResult<Partner> {
        let partner = self.active_partner(tenant_id, partner_id, field)?;
        if !partner.kind().is_customer() {
            return Err(DispatchError::field(field, "the partner is not a customer"));
        }
        Ok(partner)
    }

    pub(crate) fn active_partner(
        &self,
        tenant_id: TenantId,
        partner_id: PartnerId,
        field: &'static str,
    ) -> ServiceResult<Partner> {
        let partner = self
            .views()
            .partners
            .get(tenant_id, partner_id.0)
            .ok_or_else(|| DispatchError::field(field, "the selected partner does not exist"))?
            .aggregate;
        if partner.is_archived() {
            return Err(DispatchError::field(field, "the selected partner is archived"));
        }
        Ok(partner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor_input(name: &str) -> PartnerInput {
        PartnerInput {
            name: name.to_string(),
            kind: PartnerKind::Vendor,
            email: Some("sales@woodcorner.test".to_string()),
            phone: None,
            address: None,
        }
    }

    #[test]
    fn register_and_update_keep_unchanged_contact_fields() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        let partner = services.register_partner(tenant, vendor_input("Wood Corner")).unwrap();
        let id = partner.aggregate.id_typed();

        let updated = services
            .update_partner(
                tenant,
                id,
                PartnerChanges {
                    phone: Some("+1 555 0100".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let contact = updated.aggregate.contact();
        assert_eq!(contact.email.as_deref(), Some("sales@woodcorner.test"));
        assert_eq!(contact.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(updated.aggregate.name(), "Wood Corner");
    }

    #[test]
    fn archived_partners_cannot_be_used_as_vendors() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        let id = services
            .register_partner(tenant, vendor_input("Wood Corner"))
            .unwrap()
            .aggregate
            .id_typed();
        services.archive_partner(tenant, id).unwrap();

        let err = services.vendor(tenant, id, "partner_id").unwrap_err();
        assert!(matches!(err, DispatchError::Validation { field: Some("partner_id"), .. }));

        services.restore_partner(tenant, id).unwrap();
        assert!(services.vendor(tenant, id, "partner_id").is_ok());
    }

    #[test]
    fn partners_are_tenant_scoped() {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        let id = services
            .register_partner(tenant, vendor_input("Wood Corner"))
            .unwrap()
            .aggregate
            .id_typed();

        assert!(matches!(services.partner(TenantId::new(), id), Err(DispatchError::NotFound)));
        assert_eq!(services.partners(tenant).len(), 1);
    }
}

//! Partners domain module (customers and vendors, event-sourced).
//!
//! Business rules for the contacts a company buys from and sells to,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod partner;

pub use partner::{
    ArchivePartner, ContactInfo, Partner, PartnerArchived, PartnerCommand, PartnerEvent,
    PartnerId, PartnerKind, PartnerRegistered, PartnerRestored, PartnerUpdated, RegisterPartner,
    RestorePartner, UpdatePartner,
};

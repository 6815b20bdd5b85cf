//! Accounting module: double-entry ledger and payments (event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod ledger;
pub mod payment;

pub use ledger::{
    Account, AccountKind, JournalCommand, JournalEntryLine, JournalEntryPosted, Ledger,
    LedgerEvent, LedgerId, PostJournalEntry,
};
pub use payment::{
    Payment, PaymentAction, PaymentCommand, PaymentConfirmed, PaymentEvent, PaymentId,
    PaymentMarkedPaid, PaymentPosting, PaymentRegistered, PaymentState, PaymentType,
    PaymentUnposted, RegisterPayment,
};

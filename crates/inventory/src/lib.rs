//! Inventory domain module (event-sourced).
//!
//! Locations, stock operations (receipts, deliveries, internal transfers,
//! dropships) and physical counts, implemented purely as deterministic domain
//! logic (no IO, no HTTP, no storage).

pub mod location;
pub mod operation;
pub mod quant;

pub use location::{
    ArchiveLocation, CreateLocation, Location, LocationArchived, LocationCommand, LocationCreated,
    LocationEvent, LocationId, LocationRef, LocationUsage,
};
pub use operation::{
    AddMove, AvailableQuantity, BackorderRequest, CancelOperation, CheckAvailability,
    CreateOperation, CreatedMove, DoneMove, LineInput, MarkAsTodo, MoveAdded, MoveDemandUpdated,
    MoveLine, MoveLinesAssigned, MoveLinesSet, MoveRemoved, MoveState, NewMove, Operation,
    MAX_MOVE_QUANTITY,
    OperationCanceled, OperationCommand, OperationConfirmed, OperationCreated, OperationEvent,
    OperationId, OperationState, OperationType, OperationValidated, ProductQuantityLine,
    RemoveMove, RequestReturn, ReturnRequested, SetMoveLines, ShippingPolicy, SourceDocument,
    SourceDocumentKind, StockMove, StockReserved, UpdateMoveDemand, ValidateOperation,
};
pub use quant::{
    ApplyCount, ClearCount, CountApplied, CountCleared, CountQuantity, ProductQuantity,
    ProductQuantityCommand, ProductQuantityEvent, ProductQuantityId, QuantityCounted,
};

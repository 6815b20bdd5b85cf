/// Execute an aggregate command deterministically (no IO, no persistence).
///
/// 1. **Decide**: `aggregate.handle(command)` produces events without mutation.
/// 2. **Evolve**: each event is applied to the aggregate in order.
///
/// Used by domain tests and anywhere a command must be run inline. The full
/// pipeline (load, append with optimistic concurrency, publish) lives in the
/// infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: kestrel_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

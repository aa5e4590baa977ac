/// Decide and evolve in one step, without storage.
///
/// Used by domain tests and by workflows that need a scratch copy of an
/// aggregate. The persisted path goes through the infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: kedai_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

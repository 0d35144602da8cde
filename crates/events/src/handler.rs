/// Decide and evolve in one step, without persistence.
///
/// Calls `handle` and, only if it succeeds, applies every produced event in order. A
/// rejected command therefore leaves `aggregate` untouched. Used by domain tests and by
/// callers that keep an aggregate in memory; the stored pipeline lives in the infra
/// dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: ledgerpos_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

//! Concrete inner handlers (spec.md §4.7): `IdHandler`, `AccelerateHandler`,
//! `QueryHandler`, `ScheduledQueryHandler`, `Dt4aInfoHandler`, plus the
//! unauthenticated `ping`.

pub mod accelerate;
pub mod dt4a_info;
pub mod id;
pub mod ping;
pub mod query;
pub mod scheduled_query;

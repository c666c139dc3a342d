//! Span model: ids, activities and the records they produce.
mod activity;
mod id;
mod span;
mod tracer;

pub use activity::{Activity, DetachedActivity};
pub(crate) use activity::SpanState;
pub use id::{IdGenerator, RandomIdGenerator, SpanId, TraceId};
pub use span::{SpanEvent, SpanKind, SpanRecord, Status};
pub use tracer::{Tracer, TracerProvider, TracerProviderBuilder, DEFAULT_TENANT};

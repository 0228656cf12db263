//! CLI commands module.

mod apply;
mod collect;
mod counts;
mod estimate;
mod sparsify;
mod util;

pub use apply::ApplyClassTransformCommand;
pub use collect::CollectClassSamplesCommand;
pub use counts::AccumulateCountsCommand;
pub use estimate::EstimateClassPcaCommand;
pub use sparsify::SparsifyPosteriorsCommand;

pub(crate) use util::*;

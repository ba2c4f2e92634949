pub use self::pipeline::PipelineOutcome;
pub use self::reconcile::{DownloadOutput, Reconciler};

pub mod pipeline;
pub mod reconcile;

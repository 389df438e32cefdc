//! CASK - cron scheduling and background jobs
//!
//! Embed the runtime in an application to register job handlers and
//! programmatic tasks before starting it:
//!
//! ```no_run
//! use cask::prelude::*;
//!
//! # async fn start(config: CaskConfig) -> Result<()> {
//! let mut builder = Cask::builder().config(config);
//! builder.register("SendEmail", |_ctx, payload| async move {
//!     tracing::info!(%payload, "sending email");
//!     Ok(())
//! })?;
//! builder.build().await?.run().await
//! # }
//! ```

mod runtime;

#[doc(hidden)]
pub use cask_core;
pub use cask_runtime;

pub use runtime::prelude;
pub use runtime::{open_queue, Cask, CaskBuilder};

//! Round layer.
//!
//! - [`RoundState`]: the live round and its responses
//! - [`score_round`] / [`ScoreState`]: first-responder-takes-all scoring
//! - [`RoundRecord`] and the provided [`ResultSink`](crate::core::ResultSink)s
//! - [`ResponseAggregator`]: the Collecting stage (requires `sync`)
//! - [`RoundController`]: the session driver (requires `sync`)

mod record;
mod scoring;
mod state;

#[cfg(feature = "sync")]
mod aggregator;
#[cfg(feature = "sync")]
mod controller;

pub use record::*;
pub use scoring::*;
pub use state::*;

#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub use aggregator::*;
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub use controller::*;

pub mod observation;

pub use observation::{Observation, Platform, UNPARSED_FOLLOWERS};

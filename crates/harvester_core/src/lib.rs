//! Harvester core: pure cursor, seed and outcome logic.
mod cursor;
mod outcome;
mod seed;

pub use cursor::{delta, CursorWalker, Delta, ItemRef, ListingPage};
pub use outcome::{Message, MessageCode, Outcome, Severity, COUNTER_PHOTO, COUNTER_USER};
pub use seed::{HarvestOptions, Seed, DEFAULT_SIZES};

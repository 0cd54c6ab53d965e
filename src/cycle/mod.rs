mod rating;
mod reminder;

pub use rating::{CommitPolicy, RatingCycle, RatingOutcome};
pub use reminder::{ReminderCycle, ReminderOutcome};

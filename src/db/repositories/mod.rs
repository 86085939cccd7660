mod chats;
mod notes;
mod queue;
mod summaries;
mod words;

pub use words::compute_streak;

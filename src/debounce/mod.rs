pub mod engine;
#[cfg(test)]
mod tests;

pub use engine::{Decision, DebounceEngine};

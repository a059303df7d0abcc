pub mod analysis;
pub mod budget;
pub mod checklist;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod platform;
pub mod prompts;
pub mod rules;

#[cfg(test)]
mod test_helpers;

pub mod groups;
pub mod members;
pub mod messages;
pub mod read_state;
pub mod users;
pub mod visibility;

#[cfg(test)]
mod concurrency;
#[cfg(test)]
mod scenarios;

pub mod admin;
pub mod dispatch;
pub mod intake;
pub mod lifecycle;
pub mod progress;
pub mod queue;
pub mod reconciler;
pub mod signature;
pub mod transitions;

#[cfg(test)]
pub(crate) mod testing;

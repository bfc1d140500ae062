pub mod coordinator;
pub mod notifications;
pub mod reconciler;

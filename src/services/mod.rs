// Services module - Business logic

pub mod certification;
pub mod dispatcher;
pub mod emails;
pub mod events;
pub mod mailer;
pub mod token_store;

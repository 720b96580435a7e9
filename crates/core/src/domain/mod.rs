pub mod equipment;
pub mod quote;
pub mod reply;
pub mod scheduling;
pub mod session;

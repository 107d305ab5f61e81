pub mod assembler;
pub mod clause;
pub mod dispatcher;
pub mod formatter;
pub mod intent;
pub mod retrieval;
pub mod session;

mod credentials;
mod driver;
mod expect;
mod prompt;
mod session;
mod spawn;

pub use session::{Interrupter, Session, SessionState};

use std::future::Future;

use crate::error::Result;
use crate::models::Record;
use crate::statements::Statement;

/// A graph store able to run membership statements atomically.
///
/// Stores are built once at startup and shared by reference; they hold no per-request state.
pub trait GraphStore: Send + Sync + 'static {
    type Session: StoreSession;

    /// Acquires a request-scoped session. Dropping the session releases it.
    fn open_session(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

pub trait StoreSession: Send {
    /// Runs one statement as a single atomic unit and returns its rows.
    ///
    /// Each row carries exactly the columns named by [`Statement::columns`].
    fn run(&mut self, statement: &Statement) -> impl Future<Output = Result<Vec<Record>>> + Send;
}

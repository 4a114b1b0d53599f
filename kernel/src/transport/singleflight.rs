//! One-shot lazy construction shared by concurrent callers.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

enum State<T, E> {
    Idle,
    InFlight(Flight<T, E>),
    Ready(T),
}

/// Lazily constructs a value exactly once.
///
/// The first caller starts the construction; callers arriving while it is
/// running wait for that same attempt and observe its outcome. A success is
/// kept forever. A failure is handed to every waiter of that attempt and is
/// not kept: the next call starts a fresh attempt.
pub struct SingleFlight<T, E> {
    state: Mutex<State<T, E>>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the constructed value, running `init` if no value exists and
    /// no construction is in flight.
    ///
    /// # Errors
    ///
    /// Returns the error of the construction attempt this call waited on.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut state = self.state.lock();
            match &*state {
                State::Ready(value) => return Ok(value.clone()),
                State::InFlight(flight) => flight.clone(),
                State::Idle => {
                    let flight = init().boxed().shared();
                    *state = State::InFlight(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut state = self.state.lock();
        if let State::InFlight(current) = &*state {
            if current.ptr_eq(&flight) {
                *state = match &result {
                    Ok(value) => State::Ready(value.clone()),
                    Err(_) => State::Idle,
                };
            }
        }
        result
    }

    /// The constructed value, if construction has succeeded.
    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Removes the constructed value, returning the cell to its idle state.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Idle) {
            State::Ready(value) => Some(value),
            State::InFlight(flight) => {
                *state = State::InFlight(flight);
                None
            }
            State::Idle => None,
        }
    }
}

//! Process-wide default group.
//!
//! Simple single-scheduler programs can install one [`Group`] at startup
//! and use the free functions here instead of passing the group around.
//! Nothing is created implicitly: until [`install`] is called every
//! function returns [`RuntimeError::NoGlobalGroup`].

use std::any::Any;

use once_cell::sync::OnceCell;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::event::{Event, EventKey};
use crate::runtime::scheduler::{BodyExit, CancelHandle, Co, Group};

static GLOBAL: OnceCell<Group> = OnceCell::new();

/// Install `group` as the process-wide default. Only the first call succeeds.
pub fn install(group: Group) -> RuntimeResult<()> {
    GLOBAL
        .set(group)
        .map_err(|_| RuntimeError::GlobalAlreadyInstalled)
}

/// The installed group.
pub fn get() -> RuntimeResult<&'static Group> {
    GLOBAL.get().ok_or(RuntimeError::NoGlobalGroup)
}

/// Spawn a top-level coroutine on the default group.
pub fn spawn<F, R>(body: F) -> RuntimeResult<CancelHandle>
where
    F: FnOnce(&Co) -> R + Send + 'static,
    R: BodyExit,
{
    get()?.spawn(body)
}

/// Post an event to the default group.
pub fn post(event: impl Into<Event>) -> RuntimeResult<()> {
    get()?.post(event);
    Ok(())
}

/// Post an event with a payload to the default group.
pub fn post_with<T>(
    key: impl Into<EventKey>,
    payload: T,
) -> RuntimeResult<()>
where
    T: Any + Send + Sync,
{
    get()?.post_with(key, payload);
    Ok(())
}

/// Tick the default group.
pub fn tick() -> RuntimeResult<()> {
    get()?.tick();
    Ok(())
}

/// Stop the default group.
pub fn stop() -> RuntimeResult<()> {
    get()?.stop();
    Ok(())
}

use std::sync::Arc;

use tracing::info;

use crate::attach::ManagedRuntime;
use crate::dispatch::{StreamStatus, Upcalls, dispatcher};
use crate::driver::{DriverLoader, NativeDriver};
use crate::error::{Error, Result};
use crate::session::Session;

/// Upper bound on enumerated driver names.
pub const MAX_DRIVERS: usize = 32;

/// Snapshot of the process-wide stream state.
pub fn stream_status() -> StreamStatus {
    dispatcher().status()
}

/// Driver enumeration and the currently loaded driver.
pub struct Host<L: DriverLoader> {
    loader: L,
    current: Option<(String, Arc<dyn NativeDriver>)>,
}

impl<L: DriverLoader> Host<L> {
    /// Host enumerating drivers through `loader`.
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            current: None,
        }
    }

    /// The loader drivers come from.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Up to `capacity` installed driver names, never more than [`MAX_DRIVERS`].
    pub fn driver_names(&self, capacity: usize) -> Vec<String> {
        let mut names = self.loader.driver_names();
        names.truncate(capacity.min(MAX_DRIVERS));
        names
    }

    /// Load `name`, unloading any other current driver first. Returns the already
    /// loaded driver when the name matches.
    pub fn load_driver(&mut self, name: &str) -> Result<Arc<dyn NativeDriver>> {
        if let Some((current, driver)) = &self.current {
            if current == name {
                return Ok(driver.clone());
            }
        }
        if !self.driver_names(MAX_DRIVERS).iter().any(|n| n == name) {
            return Err(Error::DeviceUnavailable);
        }
        self.remove_current_driver()?;
        let driver = self.loader.load(name).ok_or(Error::DeviceUnavailable)?;
        info!(driver = name, "driver loaded");
        self.current = Some((name.to_string(), driver.clone()));
        Ok(driver)
    }

    /// Name of the loaded driver.
    pub fn current_driver_name(&self) -> Option<&str> {
        self.current.as_ref().map(|(name, _)| name.as_str())
    }

    /// Enumeration index of the loaded driver.
    pub fn current_driver_index(&self) -> Option<usize> {
        let name = self.current_driver_name()?;
        self.driver_names(MAX_DRIVERS).iter().position(|n| n == name)
    }

    /// Unload the current driver. Fails while a session is open.
    pub fn remove_current_driver(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        if dispatcher().bindings().is_some() {
            return Err(Error::InvalidMode("a driver session is still open"));
        }
        if let Some((name, _)) = self.current.take() {
            info!(driver = %name, "driver removed");
        }
        Ok(())
    }

    /// Load `name` and initialize a session on it.
    pub fn open_session(
        &mut self,
        name: &str,
        runtime: Arc<dyn ManagedRuntime>,
        upcalls: Arc<dyn Upcalls>,
    ) -> Result<Session> {
        let driver = self.load_driver(name)?;
        Session::init(driver, runtime, upcalls)
    }
}

//! Name registration lifecycle.
//!
//! A [`Registration`] binds a [`ServiceName`] to the endpoint's address for as
//! long as it lives. It only exists once the directory has accepted the name,
//! and it removes exactly that name/address pair again, either explicitly via
//! [`Registration::release`] or on drop (error paths, panics).
//!
//! # Example
//!
//! ```ignore
//! let registration = Registration::register(NbpDirectory::new(), name, endpoint.address())?;
//! // ... serve until interrupted ...
//! registration.release();
//! ```

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::ddp::AtAddress;
use crate::name::ServiceName;

/// A network-wide name directory.
pub trait NameDirectory: Send + Sync {
    /// Announce `name` at `address`.
    fn register(&self, name: &ServiceName, address: AtAddress) -> Result<()>;

    /// Withdraw `name` at `address`. Removing an unknown name must be harmless.
    fn unregister(&self, name: &ServiceName, address: AtAddress) -> Result<()>;
}

/// A live name registration. Unregisters once, on release or drop.
#[derive(Debug)]
pub struct Registration<D: NameDirectory> {
    directory: D,
    name: ServiceName,
    address: AtAddress,
    released: bool,
}

impl<D: NameDirectory> Registration<D> {
    /// Register `name` at `address`.
    ///
    /// # Errors
    ///
    /// Returns the directory's error. No guard is created, so nothing will be
    /// unregistered for a failed registration.
    pub fn register(directory: D, name: ServiceName, address: AtAddress) -> Result<Self> {
        log::info!("Registering NBP name {name}");
        directory.register(&name, address)?;
        Ok(Self {
            directory,
            name,
            address,
            released: false,
        })
    }

    /// Unregister now.
    pub fn release(mut self) {
        self.unregister_once();
    }

    fn unregister_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        log::info!("Unregistering NBP name {}", self.name);
        if let Err(e) = self.directory.unregister(&self.name, self.address) {
            log::warn!("Failed to unregister {}: {e:#}", self.name);
        }
    }
}

impl<D: NameDirectory> Drop for Registration<D> {
    fn drop(&mut self) {
        self.unregister_once();
    }
}

/// One call observed by a [`MemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    /// `register(name, address)`
    Register(ServiceName, AtAddress),
    /// `unregister(name, address)`
    Unregister(ServiceName, AtAddress),
}

/// In-process directory that records every call.
///
/// Clones share state, so a test can keep one handle while the service owns
/// another. Mirrors the NBP daemon's rules: a name can be held by one address
/// at a time and removing an unknown name succeeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<MemoryDirectoryState>>,
}

#[derive(Debug, Default)]
struct MemoryDirectoryState {
    entries: Vec<(ServiceName, AtAddress)>,
    calls: Vec<DirectoryCall>,
    refuse_registrations: bool,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent registrations fail.
    pub fn refuse_registrations(&self) {
        self.lock().refuse_registrations = true;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.lock().calls.clone()
    }

    /// Names currently registered.
    pub fn entries(&self) -> Vec<(ServiceName, AtAddress)> {
        self.lock().entries.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryDirectoryState> {
        // A poisoned lock only means another test thread panicked.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl NameDirectory for MemoryDirectory {
    fn register(&self, name: &ServiceName, address: AtAddress) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .push(DirectoryCall::Register(name.clone(), address));
        if state.refuse_registrations {
            anyhow::bail!("directory refused {name}");
        }
        if state.entries.iter().any(|(n, _)| n == name) {
            anyhow::bail!("{name} is already registered");
        }
        state.entries.push((name.clone(), address));
        Ok(())
    }

    fn unregister(&self, name: &ServiceName, address: AtAddress) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .push(DirectoryCall::Unregister(name.clone(), address));
        state.entries.retain(|(n, a)| !(n == name && *a == address));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: AtAddress = AtAddress {
        net: 65280,
        node: 12,
        port: 129,
    };

    fn name() -> ServiceName {
        ServiceName::resolve("Foo:Bar@*").unwrap()
    }

    #[test]
    fn test_release_unregisters_exactly_once() {
        let directory = MemoryDirectory::new();
        let registration = Registration::register(directory.clone(), name(), ADDRESS).unwrap();
        assert_eq!(directory.entries().len(), 1);

        registration.release();

        assert_eq!(
            directory.calls(),
            vec![
                DirectoryCall::Register(name(), ADDRESS),
                DirectoryCall::Unregister(name(), ADDRESS),
            ]
        );
        assert!(directory.entries().is_empty());
    }

    #[test]
    fn test_drop_unregisters() {
        let directory = MemoryDirectory::new();
        {
            let _registration =
                Registration::register(directory.clone(), name(), ADDRESS).unwrap();
        }
        assert_eq!(
            directory.calls().last(),
            Some(&DirectoryCall::Unregister(name(), ADDRESS))
        );
        assert!(directory.entries().is_empty());
    }

    #[test]
    fn test_failed_registration_leaves_nothing_to_release() {
        let directory = MemoryDirectory::new();
        directory.refuse_registrations();

        let result = Registration::register(directory.clone(), name(), ADDRESS);
        assert!(result.is_err());
        assert_eq!(directory.calls(), vec![DirectoryCall::Register(name(), ADDRESS)]);
    }

    #[test]
    fn test_duplicate_name_is_refused() {
        let directory = MemoryDirectory::new();
        let _first = Registration::register(directory.clone(), name(), ADDRESS).unwrap();
        let second = Registration::register(directory.clone(), name(), ADDRESS.with_port(130));
        assert!(second.is_err());
        assert_eq!(directory.entries(), vec![(name(), ADDRESS)]);
    }

    #[test]
    fn test_unregistering_unknown_name_is_harmless() {
        let directory = MemoryDirectory::new();
        directory.unregister(&name(), ADDRESS).unwrap();
        directory.unregister(&name(), ADDRESS).unwrap();
    }
}

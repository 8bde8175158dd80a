//! # Symbol Tables
//!
//! Name/address maps built from module export tables.
//!
//! There are two independently refreshed namespaces:
//! - **user**: exports of the modules loaded in the current process
//! - **kernel**: exports of the kernel modules
//!
//! They are enumerated through different structures in the target and go
//! stale at different rates, so each has its own reload. After either reload
//! the merged view is rebuilt from scratch: kernel entries first, user entries
//! layered over them, so a user symbol wins a name or address collision.
//!
//! Qualified names have the form `module!export`, e.g. `ntdll.dll!NtClose`.
//!
//! Each address keeps a single name. When two exports share an address the
//! later one wins and the earlier name is remembered as shadowed, so a lookup
//! of it reports what replaced it instead of failing as unknown.

mod store;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::forensics::{ExportRecord, ModuleRecord};
use crate::types::Address;

/// A resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolEntry
{
    /// Qualified `module!export` name
    pub name: String,
    /// Absolute address
    pub address: Address,
}

/// A module together with its export table, the input of a reload.
#[derive(Debug, Clone)]
pub struct ModuleExports
{
    /// The module
    pub module: ModuleRecord,
    /// Its export slots
    pub exports: Vec<ExportRecord>,
}

/// Which namespace an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace
{
    /// Current process's modules
    User,
    /// Kernel modules
    Kernel,
}

/// A pair of maps kept as a bijection
///
/// Every `name -> address` entry has the matching `address -> name` entry and
/// vice versa. Inserting a name that reuses an address (an export alias) or an
/// address that reuses a name evicts the older pairing, so both maps always
/// describe the same set of pairs. Names evicted by an alias are kept on the
/// side with the name that replaced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolNamespace
{
    by_name: HashMap<String, Address>,
    by_address: HashMap<Address, String>,
    #[serde(default)]
    shadowed: HashMap<String, String>,
}

impl SymbolNamespace
{
    /// Create an empty namespace.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Build a namespace from module export tables.
    ///
    /// Export slots without a usable name are skipped. The absolute address of
    /// an export is `module.base + rva`.
    pub fn from_modules<I>(modules: I) -> Self
    where
        I: IntoIterator<Item = ModuleExports>,
    {
        let mut namespace = Self::new();
        for ModuleExports { module, exports } in modules {
            for export in exports {
                let Some(export_name) = export.name.as_deref().filter(|n| !n.is_empty()) else {
                    trace!(module = %module.name, ordinal = export.ordinal, "skipping unnamed export");
                    continue;
                };
                namespace.insert(format!("{}!{export_name}", module.name), module.base + export.rva);
            }
        }
        namespace
    }

    /// Insert a pair, evicting any pairing that conflicts with it.
    pub fn insert(&mut self, name: String, address: Address)
    {
        if let Some(old_address) = self.by_name.remove(&name) {
            self.by_address.remove(&old_address);
        }
        if let Some(old_name) = self.by_address.remove(&address) {
            self.by_name.remove(&old_name);
            trace!(shadowed = %old_name, by = %name, %address, "export alias shadows earlier name");
            for winner in self.shadowed.values_mut().filter(|w| **w == old_name) {
                *winner = name.clone();
            }
            self.shadowed.insert(old_name, name.clone());
        }
        self.shadowed.remove(&name);
        self.by_address.insert(address, name.clone());
        self.by_name.insert(name, address);
    }

    /// Address of a qualified name.
    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<Address>
    {
        self.by_name.get(name).copied()
    }

    /// Name at an exact address.
    #[must_use]
    pub fn name_at(&self, address: Address) -> Option<&str>
    {
        self.by_address.get(&address).map(String::as_str)
    }

    /// The name that replaced `name` at its address, if an alias evicted it.
    #[must_use]
    pub fn shadowed_by(&self, name: &str) -> Option<&str>
    {
        self.shadowed.get(name).map(String::as_str)
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.by_name.len()
    }

    /// Whether the namespace holds no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.by_name.is_empty()
    }

    /// Iterate over all entries (unordered).
    pub fn entries(&self) -> impl Iterator<Item = SymbolEntry> + '_
    {
        self.by_name.iter().map(|(name, address)| SymbolEntry {
            name: name.clone(),
            address: *address,
        })
    }

    /// Forward map (`name -> address`).
    #[must_use]
    pub fn by_name(&self) -> &HashMap<String, Address>
    {
        &self.by_name
    }

    /// Reverse map (`address -> name`).
    #[must_use]
    pub fn by_address(&self) -> &HashMap<Address, String>
    {
        &self.by_address
    }

    /// Whether the forward and reverse maps describe exactly the same pairs.
    #[must_use]
    pub fn is_consistent(&self) -> bool
    {
        self.by_name.len() == self.by_address.len()
            && self
                .by_name
                .iter()
                .all(|(name, address)| self.by_address.get(address) == Some(name))
    }

    fn layer(&mut self, other: &SymbolNamespace)
    {
        for (name, address) in &other.by_name {
            self.insert(name.clone(), *address);
        }
        for (name, winner) in &other.shadowed {
            if !self.by_name.contains_key(name) {
                self.shadowed.entry(name.clone()).or_insert_with(|| winner.clone());
            }
        }
    }
}

/// User and kernel namespaces plus the merged lookup view.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    user: SymbolNamespace,
    kernel: SymbolNamespace,
    merged: SymbolNamespace,
}

impl SymbolTable
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Replace the user namespace from the current process's modules.
    ///
    /// Returns the number of symbols loaded.
    pub fn reload_process<I>(&mut self, modules: I) -> usize
    where
        I: IntoIterator<Item = ModuleExports>,
    {
        self.user = SymbolNamespace::from_modules(modules);
        self.rebuild_merged();
        info!(symbols = self.user.len(), "process symbols reloaded");
        self.user.len()
    }

    /// Replace the kernel namespace from the kernel's modules.
    ///
    /// Returns the number of symbols loaded.
    pub fn reload_kernel<I>(&mut self, modules: I) -> usize
    where
        I: IntoIterator<Item = ModuleExports>,
    {
        self.kernel = SymbolNamespace::from_modules(modules);
        self.rebuild_merged();
        info!(symbols = self.kernel.len(), "kernel symbols reloaded");
        self.kernel.len()
    }

    /// Symbol name at an exact address in the merged view.
    #[must_use]
    pub fn resolve_address(&self, address: Address) -> Option<&str>
    {
        self.merged.name_at(address)
    }

    /// Address of a qualified name in the merged view.
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> Option<Address>
    {
        self.merged.address_of(name)
    }

    /// The name that shadows `name` in the merged view.
    #[must_use]
    pub fn shadowed_by(&self, name: &str) -> Option<&str>
    {
        self.merged.shadowed_by(name)
    }

    /// One namespace.
    #[must_use]
    pub fn namespace(&self, which: Namespace) -> &SymbolNamespace
    {
        match which {
            Namespace::User => &self.user,
            Namespace::Kernel => &self.kernel,
        }
    }

    /// The merged lookup view.
    #[must_use]
    pub fn merged(&self) -> &SymbolNamespace
    {
        &self.merged
    }

    fn rebuild_merged(&mut self)
    {
        let mut merged = self.kernel.clone();
        merged.layer(&self.user);
        self.merged = merged;
    }

    fn replace(&mut self, user: SymbolNamespace, kernel: SymbolNamespace)
    {
        self.user = user;
        self.kernel = kernel;
        self.rebuild_merged();
    }
}

//! Configuration handed to [`crate::init_debug`].

/// Runtime configuration for the debug stub, supplied once at
/// [`crate::init_debug`] time.
#[derive(Debug, Clone, Copy)]
pub struct DebugConfig {
    /// The platform-defined "safe floor": addresses below this value are
    /// rejected by the memory guard that every `m`/`M`/`X` command consults
    /// (4.F). A runtime value rather than a compile-time constant, so host
    /// firmware can describe its own memory map.
    pub safe_floor: u32,
}

impl DebugConfig {
    /// Builds a configuration with the given safe floor.
    #[must_use]
    pub const fn new(safe_floor: u32) -> Self {
        Self { safe_floor }
    }
}

impl Default for DebugConfig {
    /// A floor of zero, i.e. no address is rejected. Firmware targeting a
    /// platform with a genuine unmapped low region should override this.
    fn default() -> Self {
        Self { safe_floor: 0 }
    }
}

//! Function-object runtime configuration

use std::sync::OnceLock;

/// Bailouts tolerated before compiled code is discarded
pub const DEOPT_THRESHOLD: u32 = 10;

static ENV_CONFIG: OnceLock<FunctionConfig> = OnceLock::new();

/// Tunables for closure creation, inline caches and tiering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionConfig {
    /// Allocate inline cache blocks at closure creation instead of on first
    /// use. `OTTER_EAGER_INLINE_CACHES=1`.
    pub eager_inline_caches: bool,
    /// Tag every cache slot with its kind and assert on cross-kind reuse.
    /// Only honored with debug assertions. `OTTER_IC_KIND_TAGS=0` disables.
    pub checked_cache_kinds: bool,
    /// JIT bailouts before a function is deoptimized.
    /// `OTTER_JIT_DEOPT_THRESHOLD=<u32>`.
    pub deopt_threshold: u32,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            eager_inline_caches: false,
            checked_cache_kinds: cfg!(debug_assertions),
            deopt_threshold: DEOPT_THRESHOLD,
        }
    }
}

impl FunctionConfig {
    /// Configuration from `OTTER_*` environment variables, read once per
    /// process.
    pub fn from_env() -> Self {
        *ENV_CONFIG.get_or_init(|| Self::from_lookup(|name| std::env::var(name).ok()))
    }

    /// Configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            eager_inline_caches: lookup("OTTER_EAGER_INLINE_CACHES")
                .is_some_and(|v| parse_env_truthy(&v)),
            checked_cache_kinds: lookup("OTTER_IC_KIND_TAGS")
                .map(|v| parse_env_truthy(&v))
                .unwrap_or(defaults.checked_cache_kinds),
            deopt_threshold: lookup("OTTER_JIT_DEOPT_THRESHOLD")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|threshold| *threshold > 0)
                .unwrap_or(defaults.deopt_threshold),
        }
    }
}

fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

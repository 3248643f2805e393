//! Environment variable overrides.
//!
//! `TRACKFUSION_<SECTION>_<KEY>` sets `<key>` in `[<section>]` before the
//! INI is parsed, so overrides go through the same validation and clamping
//! as file values. For example `TRACKFUSION_FUSION_WINDOW_MS=15000`.

use ini::Ini;

/// Prefix of every override variable.
pub const ENV_PREFIX: &str = "TRACKFUSION_";

/// Sections that accept overrides.
const SECTIONS: &[&str] = &[
    "fusion",
    "health",
    "priority",
    "providers",
    "bus",
    "lifecycle",
    "retention",
    "logging",
];

/// Apply matching variables from `vars` to `ini`. Returns how many applied.
pub(super) fn apply_env_overrides(
    ini: &mut Ini,
    vars: impl IntoIterator<Item = (String, String)>,
) -> usize {
    let mut applied = 0;
    for (name, value) in vars {
        let Some((section, key)) = split_override(&name) else {
            continue;
        };
        tracing::debug!(variable = %name, section, key = %key, "Applying config override from environment");
        ini.with_section(Some(section)).set(key, value);
        applied += 1;
    }
    applied
}

/// Map `TRACKFUSION_FUSION_WINDOW_MS` to `("fusion", "window_ms")`.
fn split_override(name: &str) -> Option<(&'static str, String)> {
    let rest = name.strip_prefix(ENV_PREFIX)?.to_lowercase();
    let (section, key) = rest.split_once('_')?;
    let section = SECTIONS.iter().copied().find(|s| *s == section)?;
    if key.is_empty() {
        return None;
    }
    Some((section, key.to_string()))
}

//! Engine version selection
//!
//! Calls are negotiated against the union of versions both engine
//! generations advertise. The legacy engine's own version string is the
//! discriminator: any other negotiated version means the modern engine.

use crate::engine::EngineFactory;
use serde::{Deserialize, Serialize};

/// Known-good legacy version used when the debug override is on
pub const FORCED_LEGACY_VERSION: &str = "4.1.2";

/// Outcome of engine selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSelection {
    /// Run the modern engine
    pub use_modern: bool,
    /// Version to run
    pub version: String,
    /// Peer-to-peer allowed after selection
    pub allow_p2p: bool,
}

/// Choose the engine generation for a negotiated version
pub fn select_engine(
    requested_version: &str,
    legacy_version: &str,
    allow_p2p: bool,
    force_legacy: bool,
) -> EngineSelection {
    if force_legacy {
        EngineSelection {
            use_modern: false,
            version: FORCED_LEGACY_VERSION.to_string(),
            allow_p2p: false,
        }
    } else {
        EngineSelection {
            use_modern: requested_version != legacy_version,
            version: requested_version.to_string(),
            allow_p2p,
        }
    }
}

/// A version this client can negotiate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedVersion {
    /// Version string
    pub version: String,
    /// Whether calls at this version can carry video
    pub supports_video: bool,
}

/// Versions to advertise during call negotiation
///
/// `include_experimental` is accepted for interface parity; neither engine
/// currently ships experimental versions.
pub fn versions(
    factory: &dyn EngineFactory,
    _include_experimental: bool,
    include_reference: bool,
    force_legacy: bool,
) -> Vec<SupportedVersion> {
    if force_legacy {
        return vec![SupportedVersion {
            version: factory.legacy_version(),
            supports_video: true,
        }];
    }

    std::iter::once(SupportedVersion {
        version: factory.legacy_version(),
        supports_video: false,
    })
    .chain(
        factory
            .modern_versions(include_reference)
            .into_iter()
            .map(|version| SupportedVersion {
                version,
                supports_video: true,
            }),
    )
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_version_selects_legacy() {
        let selection = select_engine("2.7.7", "2.7.7", true, false);
        assert_eq!(
            selection,
            EngineSelection {
                use_modern: false,
                version: "2.7.7".to_string(),
                allow_p2p: true,
            }
        );
    }

    #[test]
    fn test_other_version_selects_modern() {
        let selection = select_engine("7.0.0", "2.7.7", false, false);
        assert!(selection.use_modern);
        assert_eq!(selection.version, "7.0.0");
        assert!(!selection.allow_p2p);
    }

    #[test]
    fn test_debug_override_forces_legacy() {
        let selection = select_engine("7.0.0", "2.7.7", true, true);
        assert_eq!(
            selection,
            EngineSelection {
                use_modern: false,
                version: "4.1.2".to_string(),
                allow_p2p: false,
            }
        );
    }

    #[test]
    fn test_versions_ignore_experimental_flag() {
        let factory = crate::testing::ScriptedEngineFactory::new();
        let advertised = versions(&factory, false, true, false);
        assert_eq!(advertised, versions(&factory, true, true, false));

        let listed: Vec<_> = advertised
            .iter()
            .map(|v| (v.version.as_str(), v.supports_video))
            .collect();
        assert_eq!(
            listed,
            vec![("2.4.4", false), ("2.7.7", true), ("5.0.0", true), ("4.0.2", true)]
        );
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic(
            requested in "[0-9]\\.[0-9]\\.[0-9]",
            legacy in "[0-9]\\.[0-9]\\.[0-9]",
            allow_p2p in any::<bool>(),
            force in any::<bool>(),
        ) {
            let first = select_engine(&requested, &legacy, allow_p2p, force);
            let second = select_engine(&requested, &legacy, allow_p2p, force);
            prop_assert_eq!(&first, &second);
            if force {
                prop_assert!(!first.use_modern);
                prop_assert_eq!(first.version.as_str(), FORCED_LEGACY_VERSION);
                prop_assert!(!first.allow_p2p);
            } else {
                prop_assert_eq!(first.use_modern, requested != legacy);
            }
        }
    }
}

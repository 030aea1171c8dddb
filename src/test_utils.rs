//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid package name (lowercase alphanumeric with underscores)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,20}"
    }

    /// Generate a package version, optionally with a pre-release part
    ///
    /// Elements mix numbers and short alphanumeric runs so the natural
    /// comparison sees both kinds of chunk.
    pub fn package_version() -> impl Strategy<Value = String> {
        let element = prop_oneof![
            (0u32..200).prop_map(|n| n.to_string()),
            "[0-9]{1,3}[a-z]{0,2}",
            "[a-z]{1,3}[0-9]{0,2}",
        ];
        (
            prop::collection::vec(element, 1..5),
            prop::option::of("(alpha|beta|rc)[0-9]{0,2}"),
        )
            .prop_map(|(elements, pre)| {
                let bare = elements.join(".");
                match pre {
                    Some(pre) => format!("{bare}~{pre}"),
                    None => bare,
                }
            })
    }

    /// Generate an architecture tag
    pub fn architecture() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("x86_64".to_string()),
            Just("x86_gcc2".to_string()),
            Just("arm64".to_string()),
            Just("riscv64".to_string()),
            Just("any".to_string()),
            Just("source".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_package_name_generator(name in package_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains('-'));
        }

        #[test]
        fn test_package_version_generator(version in package_version()) {
            prop_assert!(!version.is_empty());
            prop_assert!(!version.contains('-'));
            prop_assert!(version.matches('~').count() <= 1);
        }
    }
}

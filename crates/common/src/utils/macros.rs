//! Macros for reducing boilerplate code
//!
//! Lifecycle and outcome enums across the workspace share the same string
//! form for audit metadata, CSV export and configuration parsing.

/// Implements Display and FromStr traits for status enums
///
/// - Display: converts enum variants to their configured lowercase string
/// - FromStr: parses case-insensitive strings back to enum variants
///
/// # Example
///
/// ```rust,ignore
/// use aegis_common::impl_status_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum KeyState {
///     Active,
///     Retiring,
///     Retired,
/// }
///
/// impl_status_conversions!(KeyState {
///     Active => "active",
///     Retiring => "retiring",
///     Retired => "retired",
/// });
///
/// assert_eq!(KeyState::Retiring.to_string(), "retiring");
/// ```
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

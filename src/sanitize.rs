//! Allow-list validation for values that cross into a shell or container
//! invocation.
//!
//! Each boundary gets its own type: [`ContainerId`], [`ImageName`] and
//! [`ShellCommand`]. The inner string is private and the only way to obtain
//! one is through the matching `sanitize_*` function, so code that builds a
//! container runtime argv cannot be handed a raw `&str` by mistake.
//!
//! A value that fails validation is `None`. There is no partial cleanup: the
//! caller must refuse the operation rather than fall back to the raw input.

use std::fmt;

use serde::Serialize;

macro_rules! sanitized_value {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Returns the validated value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

sanitized_value!(
    /// A container name or id that is safe to pass to the runtime.
    ContainerId
);

sanitized_value!(
    /// An image reference (`registry/namespace/repo:tag`) that is safe to pass
    /// to the runtime.
    ImageName
);

sanitized_value!(
    /// A shell command free of command substitution.
    ShellCommand
);

/// Validate a container id or name.
///
/// Must start with an ASCII alphanumeric character, followed by any number of
/// ASCII alphanumerics, `_`, `.` or `-`.
pub fn sanitize_container_id(raw: &str) -> Option<ContainerId> {
    let mut chars = raw.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphanumeric() {
        return None;
    }
    if chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')) {
        Some(ContainerId(raw.to_string()))
    } else {
        None
    }
}

/// Validate an image reference.
///
/// Only ASCII alphanumerics and `_ . - : /` are allowed, which covers
/// `registry/namespace/repo:tag` forms.
pub fn sanitize_image_name(raw: &str) -> Option<ImageName> {
    if raw.is_empty() {
        return None;
    }
    for ch in raw.chars() {
        if !ch.is_ascii_alphanumeric() && !"_.-:/".contains(ch) {
            return None;
        }
    }
    Some(ImageName(raw.to_string()))
}

/// Validate a shell command.
///
/// Rejects blank commands, backticks and `$(` command substitution.
/// Redirection, pipes and backgrounding are allowed. An accepted command is
/// returned unchanged.
pub fn sanitize_shell_command(raw: &str) -> Option<ShellCommand> {
    if raw.trim().is_empty() {
        return None;
    }
    if raw.contains('`') || raw.contains("$(") {
        return None;
    }
    Some(ShellCommand(raw.to_string()))
}

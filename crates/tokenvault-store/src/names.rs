//! Logical secret name derivation and file name validation.
//!
//! The stored file name is the configured label with every character's code
//! point shifted by a constant. This only keeps the label out of directory
//! listings at a glance; file names are not secret and the shift is not a
//! security control.

use tokenvault_core::{VaultError, VaultResult};

/// Longest leaf name accepted, in bytes (common filesystem limit).
const MAX_NAME_BYTES: usize = 255;

/// Shift every character of `label` by `shift` code points.
pub fn obfuscate_label(label: &str, shift: u32) -> VaultResult<String> {
    let name = label
        .chars()
        .map(|c| {
            (c as u32)
                .checked_add(shift)
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    VaultError::InvalidName(format!("label {label:?} shifted by {shift}"))
                })
        })
        .collect::<VaultResult<String>>()?;
    validate_file_name(&name)?;
    Ok(name)
}

/// Reject anything that is not a single path component.
pub fn validate_file_name(name: &str) -> VaultResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > MAX_NAME_BYTES
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_ascii_control());
    if invalid {
        return Err(VaultError::InvalidName(name.escape_debug().to_string()));
    }
    Ok(())
}

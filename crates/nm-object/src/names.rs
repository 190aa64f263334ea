//! Mapping between remote property names and local property names.
//!
//! Remote names are capitalized words (`DeviceType`), local names are
//! lowercase and hyphen separated (`device-type`). Consumers register
//! local names, so this mapping has to be exact.

/// Converts a remote property name to its local form.
///
/// Each uppercase ASCII letter is lowercased. A hyphen goes in front of it
/// unless the output is still empty, or the character two positions back
/// is already a hyphen. A run of capitals therefore yields one hyphen:
/// `IPv4` becomes `i-pv4`.
pub fn canonical_name(remote: &str) -> String {
    let mut out = String::with_capacity(remote.len() + 4);
    for c in remote.chars() {
        if c.is_ascii_uppercase() {
            let bytes = out.as_bytes();
            let len = bytes.len();
            if len > 0 && (len < 2 || bytes[len - 2] != b'-') {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
